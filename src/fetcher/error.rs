//! Classified fetch errors
//!
//! Every failure a fetcher can produce maps to one [`ErrorClass`], which
//! decides what the dispatcher does with the item that triggered it.

use thiserror::Error;

/// How the dispatcher treats a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Record the error against the item and keep going
    Recoverable,
    /// The run's network path is broken: stop everything, leave the item pending
    Fatal,
}

/// Errors produced by fetchers
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("proxy unreachable while requesting {url}: {message}")]
    ProxyUnreachable { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("malformed payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("missing {field} in payload from {url}")]
    MissingField { url: String, field: String },

    #[error("application state not hydrated at {url} after {waited_ms}ms")]
    NotHydrated { url: String, waited_ms: u64 },

    #[error("media from {url} failed to decode: {message}")]
    Decode { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("worker panicked: {message}")]
    WorkerPanicked { message: String },
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::ProxyUnreachable { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}
