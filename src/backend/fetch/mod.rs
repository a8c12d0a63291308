//! Fetch Module
//!
//! Re-fetching records after a change notification.
//!
//! - **`executor`** - The `QueryExecutor` seam and its Postgres implementation
//! - **`coalescer`** - At-most-one pending query per record key

/// Query executor trait and Postgres implementation
pub mod executor;

/// Fetch coalescing
pub mod coalescer;

pub use coalescer::{FetchCallback, FetchCoalescer, FetchKey, FetchResult};
pub use executor::{FetchError, PgQueryExecutor, QueryExecutor};
