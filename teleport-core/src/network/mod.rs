//! TCP plumbing for the media stream.
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `sender`     | Producer fan-out: per-connection queues and writers  |
//! | `connection` | Consumer side: dial, handshake, framed packet reads  |

pub mod connection;
pub mod sender;

pub use connection::{ConnectionInfo, MediaStream};
pub use sender::{ConnectionId, OverflowPolicy, Sender, SenderConfig, SenderStats};
