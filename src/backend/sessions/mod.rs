//! Session Module
//!
//! Bookkeeping for live client channels. See [`registry::EventSessionRegistry`].

/// Event session registry
pub mod registry;

pub use registry::{DeliveryFn, EventSession, EventSessionRegistry};
