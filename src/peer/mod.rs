//! Peer side of the mesh
//!
//! - `client`: message channel to the coordination server
//! - `direct`: peer-to-peer channels and their one-connection admission slot
//! - `cache`: local copies of received streams, smart data and transfers
//! - `node`: the reference peer runtime built from the above

pub mod cache;
pub mod client;
pub mod direct;
pub mod node;

pub use cache::{CachedStream, StreamCache};
pub use client::{ClientCommand, ClientEvent, ConnectionState, PeerClient, PeerClientConfig};
pub use direct::{DirectChannel, DirectEvent, DirectSlot, FramedChannel, TcpDirectChannel};
pub use node::{NodePlan, PeerNode};
