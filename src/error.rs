//! Error types for the overpass frontend.

use thiserror::Error;

/// Everything that can go wrong between submitting a request and its final callback.
///
/// A round failure is handed to every request that took part in it, so the
/// error is `Clone` and carries messages rather than source errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverpassError {
    /// Network or HTTP level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP status {status}")]
    Http { status: u16 },

    /// The service answered but attached a `remark` (timeout, out of memory, ...).
    #[error("service remark: {0}")]
    ServiceRemark(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// An id that does not look like `n123`, `w123` or `r123`.
    #[error("malformed id: {0}")]
    MalformedId(String),

    /// The request was aborted by the caller.
    #[error("abort")]
    Aborted,

    /// The result stream had separators the compiled round did not announce.
    #[error("part boundaries out of sync: {0}")]
    PartMisalignment(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for OverpassError {
    fn from(err: serde_json::Error) -> Self {
        OverpassError::Decode(err.to_string())
    }
}

impl From<ureq::Error> for OverpassError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status) => OverpassError::Http { status },
            other => OverpassError::Transport(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for OverpassError {
    fn from(err: toml::de::Error) -> Self {
        OverpassError::Config(err.to_string())
    }
}

/// Result type for frontend operations.
pub type Result<T> = std::result::Result<T, OverpassError>;
