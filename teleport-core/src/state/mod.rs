//! State machines of the receiving side.
//!
//! | Module   | Purpose                                               |
//! |----------|-------------------------------------------------------|
//! | `link`   | Connection lifecycle: dialing, handshake, streaming    |
//! | `stream` | Per-connection resync: preroll, trimming, base offset  |

pub mod link;
pub mod stream;

pub use link::LinkPhase;
pub use stream::{StreamPhase, StreamSession};
