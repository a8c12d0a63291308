//! Backend Error Module
//!
//! This module defines the error type shared by hub operations, HTTP handlers
//! and the socket protocol.
//!
//! # Architecture
//!
//! - **`types`** - Error type definitions, constructors and status mapping
//! - **`conversion`** - `IntoResponse` and socket reply conversion
//!
//! # Module Structure
//!
//! ```text
//! error/
//! ├── mod.rs        - Module exports and documentation
//! ├── types.rs      - Error type definitions
//! └── conversion.rs - Error conversion implementations
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use featherlive::backend::error::BackendError;
//! use axum::response::Response;
//!
//! # async fn example() -> Result<Response, BackendError> {
//! // Handler can return BackendError directly
//! # Ok(Response::new("OK".into()))
//! # }
//! ```

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

// Re-export commonly used types
pub use types::BackendError;
