use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpListener,
};

use crate::proxy::line::read_line;
use crate::util::timeout_with_context;

const METRICS_PATH: &str = "/metrics";
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_MAX_LINE_BYTES: usize = 4096;
const METRICS_MAX_HEADER_LINES: usize = 64;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Proxy transactions by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "request_duration_seconds",
        "Wall time of a proxy transaction",
    );
    let histogram = Histogram::with_opts(opts).expect("create histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("register request_duration_seconds");
    histogram
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookups_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookups_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_stores_total", "Cache store attempts by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_stores_total");
    vec
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_evictions_total", "Entries evicted from the cache")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_bytes", "Bytes resident in the cache").expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_bytes");
    gauge
});

static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge =
        IntGauge::new("cache_entries", "Entries resident in the cache").expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_entries");
    gauge
});

static ORIGIN_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("origin_errors_total", "Origin failures by kind");
    let vec = IntCounterVec::new(opts, &["kind"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register origin_errors_total");
    vec
});

static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("active_connections", "Client connections being served")
        .expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register active_connections");
    gauge
});

fn normalize_label(value: &str, empty: &'static str) -> String {
    if value.is_empty() {
        empty.to_string()
    } else {
        value.to_string()
    }
}

pub fn record_request(outcome: &str, elapsed: Duration) {
    let outcome = normalize_label(outcome, "unknown");
    REQUESTS_TOTAL.with_label_values(&[outcome.as_str()]).inc();
    REQUEST_DURATION_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store(result: &str) {
    CACHE_STORE_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_cache_evictions(count: usize) {
    if count > 0 {
        CACHE_EVICTIONS_TOTAL.inc_by(count as u64);
    }
}

pub fn set_cache_usage(entries: usize, bytes: usize) {
    CACHE_ENTRIES.set(entries as i64);
    CACHE_BYTES.set(bytes as i64);
}

pub fn record_origin_error(kind: &str) {
    ORIGIN_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn inc_active_connections() {
    ACTIVE_CONNECTIONS.inc();
}

pub fn dec_active_connections() {
    ACTIVE_CONNECTIONS.dec();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
    }
    buffer
}

/// Serves the text exposition on `GET /metrics` until the listener fails.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream).await {
                tracing::debug!(error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(stream: S) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let bytes = read_line(
        &mut reader,
        &mut line,
        METRICS_READ_TIMEOUT,
        METRICS_MAX_LINE_BYTES,
    )
    .await?;
    if bytes == 0 {
        return Ok(());
    }

    let request_line = String::from_utf8_lossy(&line).into_owned();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let uri = parts.next().unwrap_or_default();

    // Consume and ignore headers until empty line.
    for _ in 0..METRICS_MAX_HEADER_LINES {
        let n = read_line(
            &mut reader,
            &mut line,
            METRICS_READ_TIMEOUT,
            METRICS_MAX_LINE_BYTES,
        )
        .await?;
        if n == 0 || line == b"\r\n" || line == b"\n" {
            break;
        }
    }

    let response = if method == "GET" && uri == METRICS_PATH {
        let body = gather();
        build_response(200, TextEncoder::new().format_type(), body)
    } else {
        build_response(404, "text/plain", b"not found".to_vec())
    };

    let stream = reader.get_mut();
    timeout_with_context(
        METRICS_READ_TIMEOUT,
        stream.write_all(&response),
        "writing metrics response",
    )
    .await?;
    stream.shutdown().await?;
    Ok(())
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}
