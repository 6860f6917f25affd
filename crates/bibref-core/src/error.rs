//! Error types for the bibref engine.
//!
//! Only [`BibrefError::Request`] is allowed to escape `Db::fetch`; every
//! other failure is logged and surfaced to the caller as "not found".

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the bibref crate.
#[derive(Debug, Error)]
pub enum BibrefError {
    // Backend errors
    #[error("Request to {backend} failed: {message}")]
    Request { backend: String, message: String },

    #[error("Backend {backend} failed for `{code}`: {message}")]
    Backend {
        backend: String,
        code: String,
        message: String,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Object store error for key {key}: {message}")]
    Storage { key: String, message: String },

    // Cache integrity errors
    #[error("Redirect chain from {key} exceeds {hops} hops")]
    RedirectLoop { key: String, hops: usize },

    #[error("Cached entry {key} could not be read: {message}")]
    InvalidEntry { key: String, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for bibref operations.
pub type Result<T> = std::result::Result<T, BibrefError>;

impl From<std::io::Error> for BibrefError {
    fn from(err: std::io::Error) -> Self {
        BibrefError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BibrefError {
    fn from(err: serde_json::Error) -> Self {
        BibrefError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BibrefError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BibrefError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a transient request error for a backend.
    pub fn request(backend: impl Into<String>, message: impl Into<String>) -> Self {
        BibrefError::Request {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a transient network/service failure.
    ///
    /// Transient errors are retried by the fetch path and handed to async
    /// callbacks as error values instead of being swallowed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BibrefError::Request { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BibrefError::RedirectLoop {
            key: "ISO(ISO 123)".into(),
            hops: 8,
        };
        assert_eq!(
            err.to_string(),
            "Redirect chain from ISO(ISO 123) exceeds 8 hops"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(BibrefError::request("IETF", "connection reset").is_transient());
        assert!(!BibrefError::Backend {
            backend: "ISO".into(),
            code: "ISO 123".into(),
            message: "bad payload".into(),
        }
        .is_transient());
        assert!(!BibrefError::Other("boom".into()).is_transient());
    }

    #[test]
    fn test_io_with_path_keeps_path() {
        let err = BibrefError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/tmp/cache/iso",
        );
        match err {
            BibrefError::Io { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/cache/iso")))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
