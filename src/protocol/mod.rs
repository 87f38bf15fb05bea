//! Wire protocol
//!
//! Two channels share one serde vocabulary: the WebSocket message channel
//! between peers and the server (JSON text frames tagged by `event`), and
//! the direct channel between two peers (length-prefixed JSON tagged by
//! `usecase`).

pub mod codec;
mod direct;
mod messages;

pub use direct::*;
pub use messages::*;
