/**
 * Backend Error Types
 *
 * This module defines the umbrella error returned by hub operations, HTTP
 * handlers and the socket protocol. Every variant maps to an HTTP status so
 * the same error can be rendered as a response body or as a socket reply.
 *
 * # Error Categories
 *
 * ## Request Errors
 *
 * - `HandlerError` - a handler rejected the request with an explicit status
 * - `ProtocolError` - a socket frame could not be understood
 * - `SharedError` - wire validation and decoding failures
 *
 * ## Domain Errors
 *
 * - `Lock` - lock conflicts (409) and lock store failures
 * - `Fetch` - record re-fetch failures
 * - `Tenant` - unknown tenants (404) and tenant configuration errors (400)
 * - `UnknownSession` - an operation named an event key with no live session
 * - `RouteNotFound` - no data route is registered under the path
 *
 * ## Internal Errors
 *
 * - `StateError` - internal state is unusable (e.g. the pump stopped)
 * - `SerializationError` - JSON encoding failed
 */

use axum::http::StatusCode;
use thiserror::Error;

use crate::backend::fetch::FetchError;
use crate::backend::locks::LockError;
use crate::backend::tenants::TenantError;
use crate::shared::{EventKey, SharedError};

/// Backend-specific error types
///
/// # Usage
///
/// ```rust
/// use featherlive::backend::error::BackendError;
/// use axum::http::StatusCode;
///
/// let err = BackendError::handler(StatusCode::BAD_REQUEST, "Invalid request");
/// assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handler error (e.g. invalid request parameters)
    #[error("Handler error: {message}")]
    HandlerError {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// Internal state error
    #[error("State error: {message}")]
    StateError { message: String },

    /// Malformed socket frame
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error(transparent)]
    SharedError(#[from] SharedError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error("No live session for event key {0}")]
    UnknownSession(EventKey),

    #[error("No route /data/{tenant}/{path}")]
    RouteNotFound { tenant: String, path: String },
}

impl BackendError {
    /// Create a new handler error with a status code
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::StateError {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    ///
    /// # Status Code Mapping
    ///
    /// - `HandlerError` - Uses the status code from the error
    /// - `ProtocolError`, validation and decode errors - 400 Bad Request
    /// - `Lock::Held` - 409 Conflict
    /// - unknown tenants, sessions, routes and records - 404 Not Found
    /// - tenant configuration errors - 400 Bad Request
    /// - store, query and state failures - 500 Internal Server Error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerError { status, .. } => *status,
            Self::StateError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ProtocolError { .. } => StatusCode::BAD_REQUEST,
            Self::SharedError(err) => match err {
                SharedError::SerializationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                SharedError::ValidationError { .. } => StatusCode::BAD_REQUEST,
                SharedError::DecodeError { .. } => StatusCode::BAD_REQUEST,
            },
            Self::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Lock(err) => match err {
                LockError::Held { .. } => StatusCode::CONFLICT,
                LockError::Invalid(_) => StatusCode::BAD_REQUEST,
                LockError::UnknownTenant(_) => StatusCode::NOT_FOUND,
                LockError::SessionClosed(_) => StatusCode::GONE,
                LockError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Fetch(err) => match err {
                FetchError::NotFound { .. } | FetchError::UnknownTenant(_) => StatusCode::NOT_FOUND,
                FetchError::InvalidTable(_) => StatusCode::BAD_REQUEST,
                FetchError::Query(_) | FetchError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Tenant(err) => match err {
                TenantError::NotFound(_) => StatusCode::NOT_FOUND,
                TenantError::Config { .. } | TenantError::InvalidEntry { .. } => StatusCode::BAD_REQUEST,
                TenantError::Io { .. } | TenantError::Pool { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::UnknownSession(_) | Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::HandlerError { message, .. } => message.clone(),
            Self::StateError { message, .. } => message.clone(),
            Self::ProtocolError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
