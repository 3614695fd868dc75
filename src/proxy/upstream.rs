use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use super::forward_error::ProxyError;
use super::resolver::ResolvedTarget;
use crate::util::io_timeout;

/// Opens a plain TCP connection to the origin named by `target`, trying each resolved
/// address in turn. Name resolution and each connect attempt share `connect_timeout`.
///
/// A target with no host or with a port outside the TCP range cannot be connected to and
/// is reported like any other unreachable origin.
pub async fn connect_origin(
    target: &ResolvedTarget,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr), ProxyError> {
    let authority = target.authority();
    let unavailable = |source: io::Error| ProxyError::OriginUnavailable {
        authority: authority.clone(),
        source,
    };

    if target.host.is_empty() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "request target names no host",
        )));
    }
    let port = target.port_number().ok_or_else(|| {
        unavailable(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid port {}", target.port),
        ))
    })?;

    let addrs: Vec<SocketAddr> = io_timeout(
        connect_timeout,
        lookup_host((target.host.as_str(), port)),
        "resolving origin",
    )
    .await
    .map_err(&unavailable)?
    .collect();

    connect_to_addrs(&addrs, connect_timeout)
        .await
        .map_err(unavailable)
}

/// Attempt to connect to the supplied socket addresses without performing name resolution.
pub async fn connect_to_addrs(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
) -> io::Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(
                        host = %addr.ip(),
                        port = addr.port(),
                        error = %err,
                        "failed to set TCP_NODELAY on origin stream"
                    );
                }
                debug!(host = %addr.ip(), port = addr.port(), "connected to origin");
                return Ok((stream, *addr));
            }
            Ok(Err(err)) => last_err = Some(err),
            Err(_) => {
                last_err = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection to {addr} timed out"),
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses resolved for origin",
        )
    }))
}

/// Writes the rewritten request head, then copies exactly `body_length` bytes of request
/// body from the client. Returns the number of body bytes forwarded.
pub async fn send_request<C, O>(
    client: &mut C,
    origin: &mut O,
    head: &[u8],
    body_length: u64,
    client_timeout: Duration,
    origin_timeout: Duration,
) -> Result<u64, ProxyError>
where
    C: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    io_timeout(origin_timeout, origin.write_all(head), "writing request head")
        .await
        .map_err(|err| ProxyError::transfer("writing request head", err))?;

    let mut body = client.take(body_length);
    let mut chunk = [0u8; 8192];
    let mut forwarded = 0u64;
    while forwarded < body_length {
        let n = io_timeout(client_timeout, body.read(&mut chunk), "reading request body")
            .await
            .map_err(|err| ProxyError::transfer("reading request body", err))?;
        if n == 0 {
            return Err(ProxyError::transfer(
                "reading request body",
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("client sent {forwarded} of {body_length} body bytes"),
                ),
            ));
        }
        io_timeout(
            origin_timeout,
            origin.write_all(&chunk[..n]),
            "writing request body",
        )
        .await
        .map_err(|err| ProxyError::transfer("writing request body", err))?;
        forwarded += n as u64;
    }

    io_timeout(origin_timeout, origin.flush(), "flushing request")
        .await
        .map_err(|err| ProxyError::transfer("flushing request", err))?;
    Ok(forwarded)
}
