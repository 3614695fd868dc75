use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::forward_error::ProxyError;
use crate::util::io_timeout;

/// Response bytes kept aside for reading the status line, whether or not the capture survives.
const STATUS_LINE_PREFIX: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    pub chunk_size: usize,
    pub max_object_size: usize,
    pub origin_timeout: Duration,
    pub client_timeout: Duration,
}

/// What the relay kept aside for the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// The whole response, byte for byte.
    Complete(Bytes),
    /// The response outgrew the object-size limit; nothing is offered to the cache.
    Truncated,
    /// Growing the capture buffer failed; the response was still delivered.
    AllocationFailed,
    /// The origin sent nothing.
    Empty,
}

impl Capture {
    pub fn label(&self) -> &'static str {
        match self {
            Capture::Complete(_) => "complete",
            Capture::Truncated => "truncated",
            Capture::AllocationFailed => "allocation_failed",
            Capture::Empty => "empty",
        }
    }
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub bytes_forwarded: u64,
    /// Status code from the relayed status line, if the origin sent a recognizable one.
    pub status: Option<u16>,
    pub capture: Capture,
}

#[derive(Debug, Error)]
#[error("{source} after {bytes_forwarded} bytes forwarded")]
pub struct RelayError {
    pub bytes_forwarded: u64,
    #[source]
    pub source: ProxyError,
}

#[derive(Debug, PartialEq, Eq)]
enum CaptureState {
    Capturing,
    Truncated,
    AllocationFailed,
}

struct CaptureBuffer {
    buf: Vec<u8>,
    limit: usize,
    state: CaptureState,
}

impl CaptureBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            state: CaptureState::Capturing,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.state != CaptureState::Capturing {
            return;
        }
        if self.buf.len() + chunk.len() > self.limit {
            self.abandon(CaptureState::Truncated);
            return;
        }
        if self.buf.try_reserve(chunk.len()).is_err() {
            self.abandon(CaptureState::AllocationFailed);
            return;
        }
        self.buf.extend_from_slice(chunk);
    }

    fn abandon(&mut self, state: CaptureState) {
        self.state = state;
        self.buf = Vec::new();
    }

    fn finish(mut self) -> Capture {
        match self.state {
            CaptureState::Truncated => Capture::Truncated,
            CaptureState::AllocationFailed => Capture::AllocationFailed,
            CaptureState::Capturing if self.buf.is_empty() => Capture::Empty,
            CaptureState::Capturing => {
                self.buf.shrink_to_fit();
                Capture::Complete(Bytes::from(self.buf))
            }
        }
    }
}

/// Reads the status code out of an `HTTP/x.y NNN ...` response, if it has one.
pub fn sniff_status(response: &[u8]) -> Option<u16> {
    let line_end = response.iter().position(|byte| *byte == b'\n')?;
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    let mut parts = line.split_ascii_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Streams `origin` to `client` until end of stream, keeping a copy of the response for the
/// cache while it fits within `limits.max_object_size`.
///
/// Every chunk is written to the client as soon as it is read. An I/O failure on either side
/// ends the transfer; bytes already forwarded stay forwarded and no capture is produced.
pub async fn relay_response<R, W>(
    origin: &mut R,
    client: &mut W,
    limits: RelayLimits,
) -> Result<RelayOutcome, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; limits.chunk_size.max(1)];
    let mut capture = CaptureBuffer::new(limits.max_object_size);
    let mut status_prefix = Vec::with_capacity(STATUS_LINE_PREFIX);
    let mut bytes_forwarded = 0u64;

    let fail = |bytes_forwarded: u64, stage: &'static str, source: std::io::Error| RelayError {
        bytes_forwarded,
        source: ProxyError::transfer(stage, source),
    };

    loop {
        let n = io_timeout(
            limits.origin_timeout,
            origin.read(&mut chunk),
            "reading from origin",
        )
        .await
        .map_err(|err| fail(bytes_forwarded, "reading from origin", err))?;
        if n == 0 {
            break;
        }

        io_timeout(
            limits.client_timeout,
            client.write_all(&chunk[..n]),
            "writing to client",
        )
        .await
        .map_err(|err| fail(bytes_forwarded, "writing to client", err))?;
        bytes_forwarded += n as u64;
        let room = STATUS_LINE_PREFIX - status_prefix.len();
        status_prefix.extend_from_slice(&chunk[..n.min(room)]);
        capture.push(&chunk[..n]);
    }

    io_timeout(limits.client_timeout, client.flush(), "flushing client")
        .await
        .map_err(|err| fail(bytes_forwarded, "flushing client", err))?;

    Ok(RelayOutcome {
        bytes_forwarded,
        status: sniff_status(&status_prefix),
        capture: capture.finish(),
    })
}
