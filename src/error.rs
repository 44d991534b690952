//! Error types and handling for the evaporator driver
//!
//! This module defines the crate-level error used by the transport,
//! configuration and logging layers. Device operations report their own
//! integer-coded errors, see [`crate::status`].

use thiserror::Error;

/// Result type alias for evaporator operations
pub type Result<T> = std::result::Result<T, EvaporatorError>;

/// Main error type for the evaporator driver
#[derive(Debug, Error)]
pub enum EvaporatorError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Modbus communication errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// Serial port errors
    #[error("Serial port error: {message}")]
    Serial { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl EvaporatorError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Config {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new serial port error
    pub fn serial<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Serial {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        EvaporatorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        EvaporatorError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for EvaporatorError {
    fn from(err: std::io::Error) -> Self {
        EvaporatorError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EvaporatorError {
    fn from(err: serde_yaml::Error) -> Self {
        EvaporatorError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EvaporatorError {
    fn from(err: serde_json::Error) -> Self {
        EvaporatorError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<tokio_serial::Error> for EvaporatorError {
    fn from(err: tokio_serial::Error) -> Self {
        EvaporatorError::serial(err.to_string())
    }
}
