//! Connection management for a single serial link to a radio peer
//!
//! This module handles:
//! - One outbound connection attempt at a time, replacing the previous one
//! - Handshake and receive loop on a background worker task
//! - Fire-and-forget and checked sends
//! - Status and inbound data delivery to a listener

mod controller;
mod listener;
mod worker;

pub use controller::{ConnectionController, FailurePolicy, LinkConfig};
pub use listener::Listener;
