//! Live channel error types.
//!
//! None of these reach callers of the socket manager directly: they are
//! logged and turned into a status change. They exist so the connection
//! task can classify what went wrong.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Why a connection attempt or an open connection failed.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The channel URL could not be turned into an upgrade request.
    #[error("invalid channel url {url}: {reason}")]
    InvalidUrl {
        /// URL that was rejected.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// The auth token contains characters not allowed in a header.
    #[error("auth token is not a valid header value")]
    InvalidToken,
    /// The server answered the upgrade with a non-101 status.
    #[error("handshake rejected with HTTP {status}")]
    HandshakeRejected {
        /// HTTP status code.
        status: u16,
    },
    /// The handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl LiveError {
    /// Classify a handshake error for a connection to `url`.
    pub fn from_handshake(err: tungstenite::Error, url: &str) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::HandshakeRejected {
                status: response.status().as_u16(),
            },
            tungstenite::Error::Url(e) => Self::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            },
            other => Self::Transport(other.to_string()),
        }
    }

    /// Whether the server refused us because the session is no longer valid.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::HandshakeRejected { status: 401 | 403 })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::InvalidToken => "invalid_token",
            Self::HandshakeRejected { .. } => "handshake_rejected",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Transport(_) => "transport",
        }
    }
}

/// Close codes the backend uses to end a socket whose session is no longer valid.
pub fn is_auth_close_code(code: u16) -> bool {
    matches!(code, 1008 | 4001 | 4003)
}
