//! Transport Module
//!
//! The concrete duplex channel between browser sessions and the hub: a
//! WebSocket per event key.

/// WebSocket event channel
pub mod socket;

pub use socket::{handle_event_channel, handle_frame, EventChannelQuery};
