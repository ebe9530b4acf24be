//! Structured records exchanged outside the media frames.
//!
//! Both records are JSON objects with PascalCase keys:
//!
//! - [`StreamOptions`]: the consumer's handshake, prefixed on the wire by an
//!   [`OptionsHeader`](crate::header::OptionsHeader).
//! - [`AnnouncePayload`]: the self-descriptor broadcast by discovery.

pub mod announce;
pub mod options;

pub use announce::{AnnouncePayload, PROTOCOL_VERSION};
pub use options::{MAX_OPTIONS_SIZE, StreamOptions, read_handshake, write_handshake};
