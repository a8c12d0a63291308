//! Shared Error Types
//!
//! Errors raised while decoding or validating the wire types in [`crate::shared`].
//! They are independent of the server runtime so clients can reuse them.
//!
//! # Error Categories
//!
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - A field holds a value the protocol does not allow
//! - `DecodeError` - A raw channel payload could not be turned into a change message
//!
//! # Usage
//!
//! ```rust
//! use featherlive::shared::error::SharedError;
//!
//! let error = SharedError::validation("record_id", "record id cannot be empty");
//! assert!(error.to_string().contains("record_id"));
//! ```
use thiserror::Error;

/// Shared error types that can occur on both ends of the channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// A notification payload from a tenant channel could not be decoded
    #[error("Decode error for tenant '{tenant}': {message}")]
    DecodeError {
        /// Tenant whose channel produced the payload
        tenant: String,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode(tenant: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DecodeError {
            tenant: tenant.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
