//! Peer sessions
//!
//! The registry is owned by the hub task and passed explicitly to the
//! request handlers; nothing else touches it.

mod channel;
mod registry;

pub use channel::*;
pub use registry::*;
