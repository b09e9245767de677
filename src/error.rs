//! Error taxonomy for discovery and request execution.

use crate::http::AuthenticationFlows;

/// Errcode substituted when a non-2xx response carries no parseable error body.
pub const M_INTERNAL: &str = "M_INTERNAL";

/// Errcode reported by homeservers for rate-limited requests.
pub const M_LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";

/// Client errors with Matrix-spec error handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No discovery strategy produced a usable, verifiable base URL.
    #[error("unable to resolve homeserver url of the domain: {0}")]
    Resolution(String),

    /// The server demands interactive authentication. Carries the flow
    /// description so the caller can restart the authentication sequence.
    /// Never retried automatically.
    #[error("authentication required")]
    AuthenticationRequired(AuthenticationFlows),

    /// Rate limiting persisted past the retry ceiling. Carries the last
    /// error envelope the server returned.
    #[error("rate limited, maximum retry delay reached: {errcode}: {error}")]
    RateLimited {
        errcode: String,
        error: String,
        retry_after_ms: Option<u64>,
    },

    /// Any other non-2xx response.
    #[error("matrix error {errcode}: {error} (HTTP {status})")]
    Api {
        status: u16,
        errcode: String,
        error: String,
    },

    /// I/O-level failure during dispatch (connection refused, TLS, timeout).
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
