use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const EXCHANGE_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// A loopback port with nothing listening on it.
pub fn find_closed_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Sends `request` on a fresh connection, half-closes, and reads until the proxy closes.
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to proxy at {addr}"))?;
    stream.write_all(request).await?;
    stream.shutdown().await?;

    let mut response = Vec::new();
    timeout(EXCHANGE_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .context("timed out waiting for proxy response")??;
    Ok(response)
}

pub fn get_request(target: &str, host: &str) -> Vec<u8> {
    format!("GET {target} HTTP/1.0\r\nHost: {host}\r\n\r\n").into_bytes()
}
