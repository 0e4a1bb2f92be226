//! Error types and handling for Heliocharge
//!
//! The allocation core is total over its expected input ranges; the variants
//! here cover the cases that do fail: stale telemetry (whole cycle aborted),
//! invalid load point configuration (only that load point skipped) and the
//! usual configuration-file plumbing.

use thiserror::Error;

/// Result type alias for Heliocharge operations
pub type Result<T> = std::result::Result<T, HelioError>;

/// Main error type for Heliocharge
#[derive(Debug, Error)]
pub enum HelioError {
    /// Load point configuration that cannot be resolved (voltage, phases, bounds)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Telemetry older than the accepted maximum age
    #[error("Stale input: {message}")]
    StaleInput { message: String },

    /// A telemetry provider failed to deliver a snapshot
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

impl HelioError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HelioError::Config {
            message: message.into(),
        }
    }

    /// Create a new stale input error
    pub fn stale_input<S: Into<String>>(message: S) -> Self {
        HelioError::StaleInput {
            message: message.into(),
        }
    }

    /// Create a new provider error
    pub fn provider<S: Into<String>>(message: S) -> Self {
        HelioError::Provider {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HelioError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HelioError::Io {
            message: message.into(),
        }
    }

    /// Whether this error should abort the whole cycle rather than a single load point
    pub fn aborts_cycle(&self) -> bool {
        matches!(
            self,
            HelioError::StaleInput { .. } | HelioError::Provider { .. }
        )
    }
}

impl From<std::io::Error> for HelioError {
    fn from(err: std::io::Error) -> Self {
        HelioError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelioError {
    fn from(err: serde_yaml::Error) -> Self {
        HelioError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HelioError {
    fn from(err: serde_json::Error) -> Self {
        HelioError::Serialization {
            message: err.to_string(),
        }
    }
}
