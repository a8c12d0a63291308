//! Subscription Module
//!
//! Registers and resolves session subscriptions. See [`manager::SubscriptionManager`].

/// Subscription table and change routing
pub mod manager;

pub use manager::{Subscription, SubscriptionManager, Unsubscribe};
