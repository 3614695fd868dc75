use std::io;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::forward_error::ErrorPage;
use crate::util::io_timeout;

const SERVER_FOOTER: &str = "<hr><em>The cacheproxy Web server</em>\r\n";

fn render_body(cause: &str, status: StatusCode, short_message: &str, long_message: &str) -> String {
    let mut body = String::with_capacity(256);
    body.push_str("<html><title>cacheproxy Error</title>");
    body.push_str("<body bgcolor=\"ffffff\">\r\n");
    body.push_str(&format!("{}: {}\r\n", status.as_u16(), short_message));
    body.push_str(&format!("<p>{long_message}: {cause}\r\n"));
    body.push_str(SERVER_FOOTER);
    body
}

/// Builds a complete HTTP/1.0 error response whose `Content-length` is the exact body size.
pub fn render_error_response(
    cause: &str,
    status: StatusCode,
    short_message: &str,
    long_message: &str,
) -> Vec<u8> {
    let body = render_body(cause, status, short_message, long_message);
    let head = format!(
        "HTTP/1.0 {} {}\r\nContent-type: text/html\r\nContent-length: {}\r\n\r\n",
        status.as_u16(),
        short_message,
        body.len()
    );
    let mut response = Vec::with_capacity(head.len() + body.len());
    response.extend_from_slice(head.as_bytes());
    response.extend_from_slice(body.as_bytes());
    response
}

/// Writes the error response for `page`, returning the number of bytes sent.
pub async fn report<W>(writer: &mut W, page: &ErrorPage, timeout_dur: Duration) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let response = render_error_response(
        &page.cause,
        page.status,
        page.short_message,
        page.long_message,
    );
    io_timeout(timeout_dur, writer.write_all(&response), "writing error page").await?;
    io_timeout(timeout_dur, writer.flush(), "flushing error page").await?;
    Ok(response.len())
}
