//! # Error Handling
//!
//! Error types shared by every KiokuDB crate.
//!
//! Two families:
//!
//! 1. **Caller errors** (`DimensionMismatch`, `InvalidInput`): the operation is
//!    rejected and the store is left exactly as it was.
//! 2. **Persistence errors** (`Io`, `Decryption`, `Format`): raised by
//!    save/load. A failed load never replaces in-memory state and a failed
//!    save never replaces the destination file.

use thiserror::Error;

/// Result type alias for KiokuDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for KiokuDB
#[derive(Error, Debug)]
pub enum Error {
    // Caller Errors
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // Persistence Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    #[error("Format error: {message}")]
    Format { message: String },

    // System Errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput { message: message.into() }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Error::Format { message: message.into() }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Error::Decryption { reason: reason.into() }
    }

    /// Wrap an IO error with a description of what was being attempted
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io { message: message.into(), source }
    }

    /// Check if error is recoverable
    ///
    /// Caller errors can be retried with corrected input; corrupted or
    /// undecryptable files cannot.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::DimensionMismatch { .. } => true,
            Error::InvalidInput { .. } => true,
            Error::Io { .. } => false,
            Error::Decryption { .. } => false,
            Error::Format { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::InvalidInput { .. } => "INVALID_INPUT",
            Error::Io { .. } => "IO_ERROR",
            Error::Decryption { .. } => "DECRYPTION_FAILED",
            Error::Format { .. } => "FORMAT_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // A short read while decoding means the byte stream was cut off,
        // not that the disk failed.
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Error::Format {
                message: "unexpected end of data (truncated file?)".to_string(),
            };
        }
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Io {
            message: format!("{}: {}", f(), e),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_format_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err.error_code(), "FORMAT_ERROR");
    }

    #[test]
    fn test_other_io_stays_io() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_with_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let err = res.with_context(|| "opening store".to_string()).unwrap_err();
        assert!(err.to_string().contains("opening store"));
    }

    #[test]
    fn test_display() {
        let err = Error::DimensionMismatch { expected: 3, actual: 2 };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, got 2");
        assert!(err.is_recoverable());
    }
}
