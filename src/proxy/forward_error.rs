use std::io;
use std::net::SocketAddr;

use http::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use super::line::LineError;
use super::resolver::ResolveError;

/// Failures that end a proxy transaction.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no request data")]
    EmptyRequest,
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),
    #[error("invalid request target: {0}")]
    InvalidTarget(#[from] ResolveError),
    #[error("failed reading request headers: {0}")]
    HeaderRead(String),
    #[error("request header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
    #[error("request body of {length} bytes exceeds {limit} bytes")]
    BodyTooLarge { length: u64, limit: usize },
    #[error("cannot connect to origin {authority}: {source}")]
    OriginUnavailable {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("transfer failed while {stage}: {source}")]
    Transfer {
        stage: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification used for status mapping, logging, and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    ClientProtocol,
    HeaderTooLarge,
    OriginUnavailable,
    Transfer,
}

impl ProxyErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProxyErrorKind::ClientProtocol => "client_protocol",
            ProxyErrorKind::HeaderTooLarge => "header_too_large",
            ProxyErrorKind::OriginUnavailable => "origin_unavailable",
            ProxyErrorKind::Transfer => "transfer",
        }
    }
}

/// What the client is told when a transaction fails before any response bytes were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPage {
    pub status: StatusCode,
    pub short_message: &'static str,
    pub long_message: &'static str,
    pub cause: String,
}

impl ProxyError {
    pub fn transfer(stage: &'static str, source: io::Error) -> Self {
        ProxyError::Transfer { stage, source }
    }

    /// Maps a failed header-line read; an over-long line counts against the header budget.
    pub fn from_header_line(err: LineError, header_limit: usize) -> Self {
        match err {
            LineError::TooLong { .. } => ProxyError::HeaderTooLarge {
                limit: header_limit,
            },
            LineError::Truncated => {
                ProxyError::HeaderRead("connection closed mid-header".to_string())
            }
            LineError::Io(err) => ProxyError::HeaderRead(err.to_string()),
        }
    }

    pub fn kind(&self) -> ProxyErrorKind {
        match self {
            ProxyError::EmptyRequest
            | ProxyError::MalformedRequestLine(_)
            | ProxyError::InvalidTarget(_)
            | ProxyError::HeaderRead(_) => ProxyErrorKind::ClientProtocol,
            ProxyError::HeaderTooLarge { .. } | ProxyError::BodyTooLarge { .. } => {
                ProxyErrorKind::HeaderTooLarge
            }
            ProxyError::OriginUnavailable { .. } => ProxyErrorKind::OriginUnavailable,
            ProxyError::Transfer { .. } => ProxyErrorKind::Transfer,
        }
    }

    /// The error page for this failure, or `None` when the connection can only be closed.
    pub fn error_page(&self) -> Option<ErrorPage> {
        let (status, cause, short_message, long_message) = match self {
            ProxyError::EmptyRequest => (
                StatusCode::BAD_REQUEST,
                "No request data",
                "Bad Request",
                "Please submit a valid request",
            ),
            ProxyError::MalformedRequestLine(_) => (
                StatusCode::BAD_REQUEST,
                "Malformed request line",
                "Bad Request",
                "Please submit a valid request",
            ),
            ProxyError::InvalidTarget(_) => (
                StatusCode::BAD_REQUEST,
                "Invalid request target",
                "Bad Request",
                "Please submit a valid request",
            ),
            ProxyError::HeaderRead(_) => (
                StatusCode::BAD_REQUEST,
                "Failed reading request",
                "Bad Request",
                "Error reading your request",
            ),
            ProxyError::HeaderTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request too large",
                "Request Entity Too Large",
                "Your request headers are too long",
            ),
            ProxyError::BodyTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request too large",
                "Request Entity Too Large",
                "Your request body is too long",
            ),
            ProxyError::OriginUnavailable { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cannot connect",
                "Internal Server Error",
                "Could not connect to target server",
            ),
            ProxyError::Transfer { .. } => return None,
        };
        Some(ErrorPage {
            status,
            short_message,
            long_message,
            cause: cause.to_string(),
        })
    }
}

pub fn log_proxy_error(err: &ProxyError, peer: SocketAddr, target: &str) {
    match err.kind() {
        ProxyErrorKind::ClientProtocol | ProxyErrorKind::HeaderTooLarge => debug!(
            peer = %peer,
            request_target = target,
            error = %err,
            "rejected client request"
        ),
        ProxyErrorKind::OriginUnavailable => warn!(
            peer = %peer,
            request_target = target,
            error = %err,
            "origin unreachable"
        ),
        ProxyErrorKind::Transfer => debug!(
            peer = %peer,
            request_target = target,
            error = %err,
            "transfer aborted"
        ),
    }
}
