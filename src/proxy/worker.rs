use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::AppContext;
use super::error_page::report;
use super::forward_error::{ProxyError, ProxyErrorKind, log_proxy_error};
use super::forward_limits::check_body_length;
use super::line::{LineError, read_line};
use super::cache::HttpCache;
use super::relay::{Capture, RelayLimits, relay_response, sniff_status};
use super::request::{HeadLimits, RequestLine, parse_request_line, read_forward_head};
use super::resolver::resolve_target;
use super::upstream::{connect_origin, send_request};
use crate::logging::AccessLogBuilder;
use crate::util::io_timeout;

const LINGER_TIMEOUT: Duration = Duration::from_millis(250);
const LINGER_MAX_BYTES: usize = 64 * 1024;

/// Owns one client connection for exactly one request/response transaction.
pub struct ConnectionWorker<S> {
    reader: BufReader<S>,
    peer: SocketAddr,
    app: AppContext,
    access: AccessLogBuilder,
    bytes_in: u64,
    bytes_out: u64,
}

impl<S> ConnectionWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, app: AppContext) -> Self {
        Self {
            reader: BufReader::new(stream),
            peer,
            app,
            access: AccessLogBuilder::new(peer),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Serves the transaction, reports any failure to the client when that is still
    /// possible, closes the connection, and emits the access log.
    pub async fn run(mut self) {
        let started = Instant::now();
        let mut target = String::new();

        let result = self.transact(&mut target).await;
        if let Err(err) = result {
            log_proxy_error(&err, self.peer, &target);
            if err.kind() == ProxyErrorKind::OriginUnavailable {
                crate::metrics::record_origin_error("connect");
            }
            self.note(|log| {
                log.error_reason(err.kind().label())
                    .error_detail(err.to_string())
            });
            if let Some(page) = err.error_page()
                && self.bytes_out == 0
            {
                match report(&mut self.reader, &page, self.app.settings.client_timeout()).await {
                    Ok(written) => {
                        self.bytes_out += written as u64;
                        self.note(|log| log.status(page.status.as_u16()));
                    }
                    Err(write_err) => {
                        debug!(peer = %self.peer, error = %write_err, "failed to send error page");
                    }
                }
            }
        }

        let ConnectionWorker {
            reader,
            peer,
            access,
            bytes_in,
            bytes_out,
            ..
        } = self;
        linger_close(reader, peer).await;
        access
            .bytes(bytes_in, bytes_out)
            .elapsed(started.elapsed())
            .log();
    }

    async fn transact(&mut self, target: &mut String) -> Result<(), ProxyError> {
        let settings = self.app.settings.clone();
        let client_timeout = settings.client_timeout();

        let line = self.read_request_line(settings.max_line_length, client_timeout).await?;
        *target = line.target.clone();
        self.note(|log| {
            log.method(line.method.as_str())
                .target(line.target.as_str())
        });

        if let Some(payload) = self.app.cache.lookup(&line.target) {
            self.note(|log| log.cache_lookup("hit"));
            if let Some(status) = sniff_status(&payload) {
                self.note(|log| log.status(status));
            }
            return self.serve_cached(payload, client_timeout).await;
        }
        self.note(|log| log.cache_lookup("miss"));

        let resolved = resolve_target(&line.target)?;
        self.note(|log| {
            let log = log.host(resolved.host.as_str()).path(resolved.path.as_str());
            match resolved.port_number() {
                Some(port) => log.port(port),
                None => log,
            }
        });

        let head = read_forward_head(
            &mut self.reader,
            line.origin_form(&resolved.path),
            HeadLimits {
                max_line_length: settings.max_line_length,
                max_header_size: settings.max_header_size,
                read_timeout: client_timeout,
            },
        )
        .await?;
        self.bytes_in += head.client_bytes as u64;
        let body_length = head.content_length.unwrap_or(0);
        check_body_length(body_length, settings.max_request_body_size)?;

        let (mut origin, origin_addr) =
            connect_origin(&resolved, settings.upstream_connect_timeout()).await?;
        self.note(|log| log.upstream_addr(origin_addr.to_string()));

        let forwarded = send_request(
            &mut self.reader,
            &mut origin,
            &head.bytes,
            body_length,
            client_timeout,
            settings.upstream_timeout(),
        )
        .await;
        let forwarded = match forwarded {
            Ok(forwarded) => forwarded,
            Err(err) => {
                crate::metrics::record_origin_error("forward");
                return Err(err);
            }
        };
        self.bytes_in += forwarded;

        let limits = RelayLimits {
            chunk_size: settings.relay_chunk_size,
            max_object_size: self.app.cache.max_object_size(),
            origin_timeout: settings.upstream_timeout(),
            client_timeout,
        };
        let relayed = relay_response(&mut origin, &mut self.reader, limits).await;

        if let Err(err) = origin.shutdown().await {
            trace!(peer = %self.peer, error = %err, "origin shutdown failed");
        }

        let outcome = match relayed {
            Ok(outcome) => outcome,
            Err(err) => {
                self.bytes_out += err.bytes_forwarded;
                self.note(|log| log.cache_store("aborted"));
                return Err(err.source);
            }
        };
        self.bytes_out += outcome.bytes_forwarded;
        if let Some(status) = outcome.status {
            self.note(|log| log.status(status));
        }

        let store_label = store_capture(&self.app.cache, &line.target, outcome.capture);
        self.note(|log| log.cache_store(store_label));
        Ok(())
    }

    fn note(&mut self, update: impl FnOnce(AccessLogBuilder) -> AccessLogBuilder) {
        let access = std::mem::replace(&mut self.access, AccessLogBuilder::new(self.peer));
        self.access = update(access);
    }

    async fn read_request_line(
        &mut self,
        max_line_length: usize,
        client_timeout: Duration,
    ) -> Result<RequestLine, ProxyError> {
        let mut raw = Vec::new();
        let read = read_line(&mut self.reader, &mut raw, client_timeout, max_line_length).await;
        match read {
            Ok(0) => Err(ProxyError::EmptyRequest),
            Ok(n) => {
                self.bytes_in += n as u64;
                parse_request_line(&raw)
            }
            Err(LineError::TooLong { limit }) => Err(ProxyError::MalformedRequestLine(format!(
                "request line exceeds {limit} bytes"
            ))),
            Err(LineError::Truncated) => {
                self.bytes_in += raw.len() as u64;
                parse_request_line(&raw)
            }
            Err(LineError::Io(err)) => Err(ProxyError::transfer("reading request line", err)),
        }
    }

    async fn serve_cached(&mut self, payload: Bytes, client_timeout: Duration) -> Result<(), ProxyError> {
        io_timeout(client_timeout, self.reader.write_all(&payload), "writing cached response")
            .await
            .map_err(|err| ProxyError::transfer("writing cached response", err))?;
        io_timeout(client_timeout, self.reader.flush(), "flushing cached response")
            .await
            .map_err(|err| ProxyError::transfer("flushing cached response", err))?;
        self.bytes_out += payload.len() as u64;
        Ok(())
    }
}

/// Offers a finished capture to the cache. Only a complete response is inserted; every other
/// outcome is counted and dropped. Returns the access-log label for the store.
fn store_capture(cache: &HttpCache, target: &str, capture: Capture) -> &'static str {
    match capture {
        Capture::Complete(payload) => cache.insert(target, payload).label(),
        other => {
            crate::metrics::record_cache_store(other.label());
            other.label()
        }
    }
}

/// Half-closes the client connection, then drains unread request bytes for a short while so
/// the peer sees an orderly close instead of a reset.
async fn linger_close<S>(mut reader: BufReader<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(err) = reader.shutdown().await {
        trace!(peer = %peer, error = %err, "client shutdown failed");
        return;
    }

    let mut scratch = [0u8; 4096];
    let mut drained = 0usize;
    let drain = async {
        while drained < LINGER_MAX_BYTES {
            match reader.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    };
    if timeout(LINGER_TIMEOUT, drain).await.is_err() {
        trace!(peer = %peer, "client did not close within linger period");
    }
}
