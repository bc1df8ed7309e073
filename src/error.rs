/// Unified error handling for atalaya
///
/// Backend failures are translated into status updates by the supervisors and
/// never reach callers of the status interface. The types here cover what does
/// cross a function boundary: configuration problems, connection attempts and
/// diagnostic probes.

use std::io;
use thiserror::Error;

/// Main error type for atalaya operations
#[derive(Debug, Error)]
pub enum AtalayaError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backend connection errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// First connection attempt failed; a background retry is already scheduled
    #[error("Backend {backend} unavailable: {message}")]
    Unavailable { backend: String, message: String },

    /// Diagnostic probe errors
    #[error("Diagnostic error: {0}")]
    Diagnostic(#[from] DiagnosticError),

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Outcome of a failed diagnostic command, as seen by the classifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagnosticError {
    /// The server does not know the command (old version, proxy, sentinel)
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Replica set commands on a server started without replication
    #[error("replication not enabled: {0}")]
    NotReplicated(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Failed(String),
}

/// Result type alias for atalaya operations
pub type AtalayaResult<T> = Result<T, AtalayaError>;

/// Convenience methods for creating specific error types
impl AtalayaError {
    /// Create a backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        AtalayaError::Backend {
            message: message.into(),
        }
    }

    /// Create an unavailable error for a named backend
    pub fn unavailable<B: Into<String>, S: Into<String>>(backend: B, message: S) -> Self {
        AtalayaError::Unavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        AtalayaError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        AtalayaError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AtalayaError::Network(_) => true,
            AtalayaError::Backend { .. } => true,
            AtalayaError::Unavailable { .. } => true,
            AtalayaError::Timeout { .. } => true,
            AtalayaError::Diagnostic(_) => true,
            AtalayaError::Config(_) | AtalayaError::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = AtalayaError::backend("Backend unavailable");
        assert!(matches!(error, AtalayaError::Backend { .. }));
        assert_eq!(error.to_string(), "Backend error: Backend unavailable");
    }

    #[test]
    fn test_unavailable_message() {
        let error = AtalayaError::unavailable("cache", "connection refused");
        assert_eq!(
            error.to_string(),
            "Backend cache unavailable: connection refused"
        );
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_error_recoverability() {
        let network_error =
            AtalayaError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert!(network_error.is_recoverable());

        let config_error = AtalayaError::Config(ConfigError::ValidationError("test".to_string()));
        assert!(!config_error.is_recoverable());

        let diagnostic: AtalayaError = DiagnosticError::Failed("boom".into()).into();
        assert!(diagnostic.is_recoverable());
    }
}
