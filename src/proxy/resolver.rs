use thiserror::Error;

const SCHEME_SEPARATOR: &str = "://";
const DEFAULT_HTTP_PORT: &str = "80";
const DEFAULT_HTTPS_PORT: &str = "443";

/// Origin coordinates derived from a request target.
///
/// Host and port are kept as written; whether they name a reachable origin is only decided
/// when connecting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub host: String,
    pub port: String,
    pub path: String,
}

impl ResolvedTarget {
    /// `host:port` as it appears in log lines and connect errors.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The port as a TCP port number, or `None` when it is out of range.
    pub fn port_number(&self) -> Option<u16> {
        self.port.parse().ok()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("request target is empty")]
    EmptyTarget,
}

/// Splits an absolute URI or bare `host[:port][/path]` target into origin host, port, and path.
///
/// The scheme only selects the default port; `https` targets are still reached over plain TCP.
/// Only an empty target is rejected. A missing host or an unusable port surfaces later as a
/// failed connect.
pub fn resolve_target(target: &str) -> Result<ResolvedTarget, ResolveError> {
    if target.is_empty() {
        return Err(ResolveError::EmptyTarget);
    }

    let (host_start, default_port) = match target.find(SCHEME_SEPARATOR) {
        Some(idx) => {
            let scheme = &target[..idx];
            let port = if scheme.eq_ignore_ascii_case("https") {
                DEFAULT_HTTPS_PORT
            } else {
                DEFAULT_HTTP_PORT
            };
            (&target[idx + SCHEME_SEPARATOR.len()..], port)
        }
        None => (target, DEFAULT_HTTP_PORT),
    };

    let host_end = host_start.find(['/', ':']).unwrap_or(host_start.len());
    let host = &host_start[..host_end];

    let mut port = default_port;
    if let Some(after_colon) = host_start[host_end..].strip_prefix(':') {
        let digits_len = after_colon
            .bytes()
            .take_while(|byte| byte.is_ascii_digit())
            .count();
        if digits_len > 0 {
            port = &after_colon[..digits_len];
        }
    }

    let path = match host_start.find('/') {
        Some(idx) => host_start[idx..].to_string(),
        None => "/".to_string(),
    };

    Ok(ResolvedTarget {
        host: host.to_string(),
        port: port.to_string(),
        path,
    })
}
