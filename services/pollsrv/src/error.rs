//! Error handling for the polling engine
//!
//! One error enum covers the whole service; the polling loop absorbs these
//! and turns them into retry classifications and entity fault annotations,
//! while the mutation API propagates them to the HTTP caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Polling engine error type.
#[derive(Error, Debug, Clone)]
pub enum PollError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    Io(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serial port could not be opened; pauses the owning poll manager
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Modbus framing or protocol violations
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A transaction completed with a bad outcome (exception PDU, CRC
    /// mismatch, response validation failure)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// FC06 echo carried a different value than was written. Some devices
    /// swap the value bytes in the echo; callers treat this as success.
    #[error("Write echo mismatch: wrote {written:#06x}, echo {echoed:#06x}")]
    WriteEchoMismatch { written: u16, echoed: u16 },

    /// Network missing from the store
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    /// Device missing from the store
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Point missing from the store
    #[error("Point not found: {0}")]
    PointNotFound(String),

    /// Plugin missing from the store
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Entity exists but is disabled
    #[error("Disabled: {0}")]
    Disabled(String),

    /// Invalid entity data rejected before it reaches the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the polling engine.
pub type Result<T> = std::result::Result<T, PollError>;

// Helper constructors
impl PollError {
    pub fn config(msg: impl Into<String>) -> Self {
        PollError::Config(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        PollError::Io(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        PollError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        PollError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        PollError::Protocol(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        PollError::Transaction(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PollError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PollError::Internal(msg.into())
    }

    /// True for the serial-port-unavailable class that pauses polling.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(self, PollError::TransportUnavailable(_))
    }

    fn http_status(&self) -> StatusCode {
        match self {
            PollError::NetworkNotFound(_)
            | PollError::DeviceNotFound(_)
            | PollError::PointNotFound(_)
            | PollError::PluginNotFound(_) => StatusCode::NOT_FOUND,
            PollError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PollError::Config(_) => StatusCode::BAD_REQUEST,
            PollError::Disabled(_) => StatusCode::CONFLICT,
            PollError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for PollError {
    fn from(err: std::io::Error) -> Self {
        PollError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for PollError {
    fn from(err: serde_json::Error) -> Self {
        PollError::Internal(format!("JSON error: {err}"))
    }
}

// Conversion from figment::Error
impl From<figment::Error> for PollError {
    fn from(err: figment::Error) -> Self {
        PollError::Config(format!("Configuration error: {err}"))
    }
}

// API boundary: map error kinds onto HTTP status codes with a JSON body.
impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            PollError::PointNotFound("x".into()).http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PollError::NetworkNotFound("x".into()).http_status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn validation_maps_to_422() {
        assert_eq!(
            PollError::validation("register must be between 1 and 65535").http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn echo_mismatch_formats_both_values() {
        let err = PollError::WriteEchoMismatch {
            written: 0x1234,
            echoed: 0x3412,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x1234"));
        assert!(msg.contains("0x3412"));
    }
}
