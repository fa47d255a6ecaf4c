//! Event system for casegen
//!
//! This crate provides the event bus and event types used to broadcast
//! request lifecycle, upload and tracker activity to subscribers.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
