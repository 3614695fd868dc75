use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::util::io_timeout;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("line exceeds configured limit of {limit} bytes")]
    TooLong { limit: usize },
    #[error("connection closed in the middle of a line")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads one `\n`-terminated line into `buf`, raw bytes included.
///
/// Returns `Ok(0)` when the peer closed the stream before sending anything.
/// Each fill of the underlying buffer is bounded by `timeout_dur`.
pub async fn read_line<S>(
    reader: &mut BufReader<S>,
    buf: &mut Vec<u8>,
    timeout_dur: Duration,
    max_len: usize,
) -> Result<usize, LineError>
where
    S: AsyncRead + Unpin,
{
    buf.clear();

    loop {
        let available = io_timeout(timeout_dur, reader.fill_buf(), "reading line").await?;

        if available.is_empty() {
            if buf.is_empty() {
                return Ok(0);
            }
            return Err(LineError::Truncated);
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if buf.len().saturating_add(consume) > max_len {
            return Err(LineError::TooLong { limit: max_len });
        }

        buf.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            return Ok(buf.len());
        }
    }
}
