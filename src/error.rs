//! Error handling for the devicelink core
//!
//! A single `ProtocolError` enum covers all crate operations. Underlying
//! library errors convert automatically via `thiserror`'s `#[from]`.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! File system and stream failures, automatically converted from
//! `std::io::Error`. Use [`ProtocolError::from_io_error`] to refine a raw
//! I/O error into a more specific variant with context.
//!
//! ### Serialization Errors
//! JSON parsing and serialization failures, automatically converted from
//! `serde_json::Error`.
//!
//! ### Protocol Errors
//! Domain-specific devicelink errors:
//! - `TypeMismatch`: a message field holds a different variant than requested
//! - `DeviceNotFound`: requested device doesn't exist
//! - `NotPaired`: operation requires a paired device
//! - `InvalidMessage`: malformed or invalid message envelope
//! - `Handler`: capability handler failure

use thiserror::Error;

/// Result type for devicelink operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during devicelink operations
///
/// # Examples
///
/// ```rust
/// use devicelink::ProtocolError;
///
/// let error = ProtocolError::DeviceNotFound("device-123".to_string());
/// assert_eq!(error.to_string(), "Device not found: device-123");
///
/// let error = ProtocolError::NotPaired;
/// assert_eq!(error.to_string(), "Not paired");
/// ```
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (file system, stream, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A message field holds a different variant than the caller asked for
    ///
    /// Returned by `Message::get` when the key is present but its stored
    /// value has a different type tag. Key absence is not a mismatch; it
    /// yields the caller's default instead.
    #[error("Type mismatch for field '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Device not found in the registry
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation requires a paired device
    #[error("Not paired")]
    NotPaired,

    /// Invalid or malformed message envelope
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Capability handler failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Network-ish stream error (connection interrupted mid-transfer)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation explicitly cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// System resources exhausted (disk full, queue full)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Insufficient permissions
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation attempted in an invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration invalid or unreadable
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProtocolError {
    /// Convert a generic I/O error into a more specific variant
    ///
    /// Examines the error kind and returns a refined variant when possible,
    /// keeping the context string in the message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use devicelink::ProtocolError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::TimedOut, "read timeout");
    /// let error = ProtocolError::from_io_error(io_error, "receiving payload");
    /// assert!(matches!(error, ProtocolError::Timeout(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::PermissionDenied => {
                ProtocolError::PermissionDenied(format!("{}: {}", context, error))
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                ProtocolError::NetworkError(format!(
                    "{}: connection interrupted ({})",
                    context, error
                ))
            }
            _ => ProtocolError::Io(error),
        }
    }

    /// Check if this error is transient and might succeed on retry
    ///
    /// The dispatcher uses this to decide how loudly to log an isolated
    /// handler failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout(_)
                | ProtocolError::NetworkError(_)
                | ProtocolError::ResourceExhausted(_)
                | ProtocolError::Io(_)
        )
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ProtocolError::DeviceNotFound("test-device".to_string());
        assert_eq!(error.to_string(), "Device not found: test-device");

        let error = ProtocolError::NotPaired;
        assert_eq!(error.to_string(), "Not paired");

        let error = ProtocolError::Handler("receive failed".to_string());
        assert_eq!(error.to_string(), "Handler error: receive failed");
    }

    #[test]
    fn test_type_mismatch_display() {
        let error = ProtocolError::TypeMismatch {
            key: "filename".to_string(),
            expected: "string",
            found: "int",
        };
        assert_eq!(
            error.to_string(),
            "Type mismatch for field 'filename': expected string, found int"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        use std::io::{Error, ErrorKind};

        let io_error = Error::new(ErrorKind::NotFound, "file not found");
        let protocol_error: ProtocolError = io_error.into();

        assert!(matches!(protocol_error, ProtocolError::Io(_)));
        assert!(protocol_error.to_string().contains("file not found"));
    }

    #[test]
    fn test_io_error_refinement() {
        use std::io::{Error, ErrorKind};

        let error = ProtocolError::from_io_error(
            Error::new(ErrorKind::BrokenPipe, "pipe closed"),
            "streaming payload",
        );
        assert!(matches!(error, ProtocolError::NetworkError(_)));
        assert!(error.is_recoverable());

        let error = ProtocolError::from_io_error(
            Error::new(ErrorKind::PermissionDenied, "read-only"),
            "creating destination",
        );
        assert!(matches!(error, ProtocolError::PermissionDenied(_)));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let json = r#"{"invalid json"#;
        let json_error = serde_json::from_str::<serde_json::Value>(json).unwrap_err();
        let protocol_error: ProtocolError = json_error.into();

        assert!(matches!(protocol_error, ProtocolError::Json(_)));
    }
}
