//! Unified error handling for the ads-rx crates
//!
//! Every fault the client can observe (transport, configuration, initialization,
//! caller misuse, host services) is represented by [`AdsRxError`]. The type is
//! `Clone` because errors are fanned out to every subscriber of the diagnostic
//! stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ErrorInfo - printable error summary
// ============================================================================

/// Serializable error summary (used by the console for `--json` output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Stable error code
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human readable message
    pub message: String,
    /// Whether a retry can succeed
    pub retryable: bool,
}

// ============================================================================
// AdsRxError - Main error type
// ============================================================================

/// Main error type for the client, its collaborators and its tools
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdsRxError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Variable {variable} is an array or string type and needs a fixed length")]
    MissingArrayLength { variable: String },

    // ======================================
    // Transport & Protocol Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Ads Fault: {0}")]
    AdsFault(String),

    #[error("Read failed for handle {handle}: {reason}")]
    ReadFailed { handle: u32, reason: String },

    #[error("Write failed for handle {handle}: {reason}")]
    WriteFailed { handle: u32, reason: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    // ======================================
    // Initialization Errors
    // ======================================
    #[error("Handle allocation failed for {variable}: {reason}")]
    HandleAllocation { variable: String, reason: String },

    #[error("Type resolution failed for {variable}: {reason}")]
    TypeResolution { variable: String, reason: String },

    #[error("Unsupported PLC type: {0}")]
    UnsupportedType(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // ======================================
    // Host Service Errors
    // ======================================
    #[error("Service Fault: {service} is {status}")]
    ServiceFault { service: String, status: String },

    #[error("Service monitor error: {0}")]
    ServiceMonitor(String),

    // ======================================
    // Caller Misuse
    // ======================================
    #[error("Client has been disposed")]
    Disposed,

    #[error("Client is not connected")]
    NotConnected,

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("No value received yet for {0}")]
    NoValue(String),

    // ======================================
    // Supervision Errors
    // ======================================
    #[error("Maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AdsRxError
pub type AdsRxResult<T> = Result<T, AdsRxError>;

impl AdsRxError {
    /// Stable code for logs and console output
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingArrayLength { .. } => "MISSING_ARRAY_LENGTH",

            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ConnectionLost(_) => "CONNECTION_LOST",
            Self::AdsFault(_) => "ADS_FAULT",
            Self::ReadFailed { .. } => "READ_FAILED",
            Self::WriteFailed { .. } => "WRITE_FAILED",
            Self::Timeout(_) => "TIMEOUT",

            Self::HandleAllocation { .. } => "HANDLE_ALLOCATION",
            Self::TypeResolution { .. } => "TYPE_RESOLUTION",
            Self::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            Self::Layout(_) => "LAYOUT_ERROR",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",

            Self::ServiceFault { .. } => "SERVICE_FAULT",
            Self::ServiceMonitor(_) => "SERVICE_MONITOR",

            Self::Disposed => "DISPOSED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::UnknownVariable(_) => "UNKNOWN_VARIABLE",
            Self::NoValue(_) => "NO_VALUE",

            Self::MaxAttemptsExceeded(_) => "MAX_ATTEMPTS_EXCEEDED",

            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Classification used by the supervisor and by the console
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingArrayLength { .. } => {
                ErrorCategory::Configuration
            },

            Self::ConnectionFailed { .. }
            | Self::ConnectionLost(_)
            | Self::AdsFault(_)
            | Self::ReadFailed { .. }
            | Self::WriteFailed { .. }
            | Self::Timeout(_) => ErrorCategory::Transport,

            Self::HandleAllocation { .. }
            | Self::TypeResolution { .. }
            | Self::UnsupportedType(_)
            | Self::Layout(_)
            | Self::TypeMismatch { .. } => ErrorCategory::Initialization,

            Self::ServiceFault { .. } | Self::ServiceMonitor(_) => ErrorCategory::Service,

            Self::Disposed | Self::NotConnected | Self::UnknownVariable(_) | Self::NoValue(_) => {
                ErrorCategory::Usage
            },

            Self::MaxAttemptsExceeded(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the supervisor may recover from this error by reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Initialization | ErrorCategory::Service
        )
    }

    /// Build the printable summary
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code().to_string(),
            category: self.category(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Error category enum - used for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad settings or missing lengths
    Configuration,
    /// Connection drops and read/write failures
    Transport,
    /// Handle or type resolution during startup
    Initialization,
    /// Host services backing the controller
    Service,
    /// Caller misuse
    Usage,
    /// Everything else
    Internal,
}

// Conversion traits for common error types
impl From<std::io::Error> for AdsRxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AdsRxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AdsRxError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for AdsRxError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<std::num::ParseIntError> for AdsRxError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Configuration(format!("Invalid integer: {}", err))
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::AdsRxError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::AdsRxError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! layout_error {
    ($msg:expr) => {
        $crate::AdsRxError::Layout($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::AdsRxError::Layout(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            AdsRxError::MissingArrayLength {
                variable: ".ARR".into()
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            AdsRxError::AdsFault("state read".into()).category(),
            ErrorCategory::Transport
        );
        assert_eq!(AdsRxError::Disposed.category(), ErrorCategory::Usage);
    }

    #[test]
    fn test_error_retryable() {
        assert!(AdsRxError::ConnectionLost("router".into()).is_retryable());
        assert!(AdsRxError::ServiceFault {
            service: "TcEventLogger".into(),
            status: "Stopped".into()
        }
        .is_retryable());
        assert!(!AdsRxError::NotConnected.is_retryable());
        assert!(!AdsRxError::MissingArrayLength {
            variable: ".ARR".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_info() {
        let info = AdsRxError::UnknownVariable(".MISSING".into()).to_error_info();
        assert_eq!(info.code, "UNKNOWN_VARIABLE");
        assert_eq!(info.category, ErrorCategory::Usage);
        assert!(info.message.contains(".MISSING"));
        assert!(!info.retryable);
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("port {} out of range", 70000);
        assert_eq!(
            err,
            AdsRxError::Configuration("port 70000 out of range".into())
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "settings.yaml");
        let err: AdsRxError = io.into();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
