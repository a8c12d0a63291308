//! Server Module
//!
//! This module contains the server-side code for initializing and configuring
//! the Axum HTTP server.
//!
//! # Architecture
//!
//! - **`state`** - Application state structure and `FromRef` implementations
//! - **`config`** - Configuration loading from the environment
//! - **`init`** - Hub construction and app creation
//!
//! # Module Structure
//!
//! ```text
//! server/
//! ├── mod.rs          - Module exports and documentation
//! ├── state.rs        - AppState and FromRef implementations
//! ├── config.rs       - ServerConfig::from_env
//! └── init.rs         - Hub construction and app creation
//! ```
//!
//! # Initialization Flow
//!
//! 1. **Configuration Loading**: environment variables and the tenant file
//! 2. **Hub Creation**: tenant registry, listeners, coalescer, lock manager
//! 3. **Background Tasks**: dispatch pump and lock expiry sweep
//! 4. **Router Creation**: socket, API and data routes
//!
//! # Example
//!
//! ```rust,no_run
//! use featherlive::backend::server::{create_app, ServerConfig};
//!
//! # async fn example() {
//! let app = create_app(ServerConfig::from_env()).await;
//! # }
//! ```

/// Application state management
pub mod state;

/// Server configuration loading
pub mod config;

/// Server initialization
pub mod init;

// Re-export commonly used types
pub use config::ServerConfig;
pub use init::{build_hub, create_app};
pub use state::AppState;
