use std::time::Duration;

use tokio::io::{AsyncRead, BufReader};

use super::forward_error::ProxyError;
use super::forward_limits::HeaderBudget;
use super::line::read_line;

/// The three tokens of an HTTP request line. The target is kept exactly as sent, since it
/// doubles as the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    /// `METHOD path VERSION\r\n`, the origin-form line sent upstream.
    pub fn origin_form(&self, path: &str) -> String {
        format!("{} {} {}\r\n", self.method, path, self.version)
    }
}

/// Splits a raw request line into method, target, and version. Any method is accepted;
/// tokens after the third are ignored.
pub fn parse_request_line(raw: &[u8]) -> Result<RequestLine, ProxyError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProxyError::MalformedRequestLine("request line is not valid UTF-8".into()))?;
    let mut parts = text.split_ascii_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) => Ok(RequestLine {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
        }),
        _ => Err(ProxyError::MalformedRequestLine(
            text.trim_end().to_string(),
        )),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeadLimits {
    pub max_line_length: usize,
    pub max_header_size: usize,
    pub read_timeout: Duration,
}

/// The outgoing request head and what the client declared about its body.
#[derive(Debug)]
pub struct ForwardHead {
    pub bytes: Vec<u8>,
    pub content_length: Option<u64>,
    /// Raw header bytes read from the client, terminator included.
    pub client_bytes: usize,
}

/// Reads client header lines up to and including the blank terminator line, appending each
/// unchanged after `request_line`.
pub async fn read_forward_head<S>(
    reader: &mut BufReader<S>,
    request_line: String,
    limits: HeadLimits,
) -> Result<ForwardHead, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut budget = HeaderBudget::new(limits.max_header_size);
    budget.record(request_line.len())?;

    let mut bytes = request_line.into_bytes();
    let mut line = Vec::new();
    let mut content_length = None;
    let mut client_bytes = 0;

    loop {
        let n = read_line(
            reader,
            &mut line,
            limits.read_timeout,
            limits.max_line_length,
        )
        .await
        .map_err(|err| ProxyError::from_header_line(err, limits.max_header_size))?;
        if n == 0 {
            return Err(ProxyError::HeaderRead(
                "connection closed before end of headers".into(),
            ));
        }

        budget.record(n)?;
        client_bytes += n;
        bytes.extend_from_slice(&line);

        if is_header_terminator(&line) {
            break;
        }

        if let Some(length) = parse_content_length(&line)? {
            match content_length {
                Some(existing) if existing != length => {
                    return Err(ProxyError::HeaderRead(
                        "conflicting Content-Length headers".into(),
                    ));
                }
                _ => content_length = Some(length),
            }
        }
    }

    Ok(ForwardHead {
        bytes,
        content_length,
        client_bytes,
    })
}

fn is_header_terminator(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

fn parse_content_length(line: &[u8]) -> Result<Option<u64>, ProxyError> {
    let Some(colon) = line.iter().position(|byte| *byte == b':') else {
        return Ok(None);
    };
    if !line[..colon].eq_ignore_ascii_case(b"content-length") {
        return Ok(None);
    }
    let value = std::str::from_utf8(&line[colon + 1..])
        .ok()
        .map(str::trim)
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| ProxyError::HeaderRead("invalid Content-Length header".into()))?;
    Ok(Some(value))
}
