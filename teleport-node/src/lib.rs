//! # teleport-node: relay node
//!
//! Command-line host for the teleport relay. It stands in for a capture
//! or render host so the core can run end to end:
//!
//! ## Modes
//!
//! - **Serve**: produce a synthetic test pattern and tone, announce it on
//!   the LAN and stream it to every consumer.
//! - **Receive**: dial a producer by address or announced name and count
//!   the frames delivered.
//! - **Discover**: list the producers currently announcing.

pub mod config;
pub mod pattern;
pub mod service;
pub mod stats;
