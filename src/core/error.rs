//! Error types for the squirrel-dl library
//!
//! Provides error handling for download manager operations.

use std::fmt;

/// Main error type for squirrel-dl operations
#[derive(Debug)]
pub enum Error {
    /// Malformed URL or invalid parameters, rejected before any state change
    InvalidInput(String),

    /// Operation referenced an identifier with no matching job
    NotFound(String),

    /// Removing a completed job failed because its file could not be deleted
    RemoveFailed(String),

    /// A transfer failed without producing resume data; the job stays
    /// retryable and the message is surfaced through the observer
    TransferFailed(String),

    /// HTTP-specific error
    HttpError(String),

    /// Network connectivity issues
    NetworkError(String),

    /// File I/O error
    IoError(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {}", msg)
            }
            Error::NotFound(identifier) => {
                write!(f, "No download found for '{}'", identifier)
            }
            Error::RemoveFailed(identifier) => {
                write!(f, "Could not remove download '{}'", identifier)
            }
            Error::TransferFailed(msg) => {
                write!(f, "Transfer failed: {}", msg)
            }
            Error::HttpError(msg) => {
                write!(f, "HTTP error: {}", msg)
            }
            Error::NetworkError(msg) => {
                write!(f, "Network error: {}", msg)
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {}", err)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

/// Convenience result type for squirrel-dl operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::InvalidInput("not a URL".to_string());
        assert_eq!(err.to_string(), "Invalid input: not a URL");

        let err = Error::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "No download found for 'abc'");

        let err = Error::RemoveFailed("abc".to_string());
        assert_eq!(err.to_string(), "Could not remove download 'abc'");
    }

    #[test]
    fn test_io_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::from(io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(matches!(err, Error::IoError(_)));
    }
}
