//! Error types for the Deferred engine

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::value::Value;

/// Main error type for deferlight
///
/// Chain steps and iteration callbacks return `Result<Value>`; any `Err`
/// flips a Deferred onto its failure branch, except [`Error::StopIteration`]
/// which is a control-flow signal and never surfaces as a failure.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Stop sentinel: clean termination of a chain or an iteration
    #[error("StopIteration")]
    StopIteration,

    /// A Deferred was cancelled before it fired
    #[error("CancelledError: {0}")]
    Cancelled(String),

    /// A value raised by a user callback or passed to `raise`
    #[error("Error: {0}")]
    Raised(String),

    /// Wrong kind of value for the requested operation
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Speed table or engine configuration problem
    #[error("ConfigError: {0}")]
    Config(String),

    /// IO error while loading configuration
    #[error("IOError: {source}")]
    Io {
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl Error {
    /// Create an error from any displayable reason
    pub fn raised(message: impl fmt::Display) -> Self {
        Error::Raised(message.to_string())
    }

    /// Create a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Error::TypeError(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create the error used when an unfired Deferred is cancelled
    pub fn cancelled() -> Self {
        Error::Cancelled("Deferred cancelled".to_string())
    }

    /// Whether this is the stop sentinel
    pub fn is_stop(&self) -> bool {
        matches!(self, Error::StopIteration)
    }

    /// Whether this error came from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Raised(message.to_string())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Raised(message)
    }
}

/// Values raised through `Deferred::raise` are coerced to errors by text
impl From<Value> for Error {
    fn from(value: Value) -> Self {
        Error::Raised(value.to_string())
    }
}

/// Result type for deferlight operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_structural() {
        assert!(Error::StopIteration.is_stop());
        assert!(!Error::raised("StopIteration").is_stop());
        assert!(!Error::cancelled().is_stop());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::raised("boom").to_string(), "Error: boom");
        assert_eq!(Error::type_error("bad").to_string(), "TypeError: bad");
        assert_eq!(
            Error::cancelled().to_string(),
            "CancelledError: Deferred cancelled"
        );
    }

    #[test]
    fn test_coerce_value() {
        let err: Error = Value::Number(3.0).into();
        assert_eq!(err.to_string(), "Error: 3");
        assert!(Error::cancelled().is_cancelled());
    }

    #[test]
    fn test_io_error_is_clone() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        let copy = err.clone();
        assert!(copy.to_string().contains("missing"));
    }
}
