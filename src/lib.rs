//! fieldmesh - peer coordination and data distribution for field meshes
//!
//! The coordination server keeps a registry of connected peers, brokers
//! direct peer-to-peer channels, relays streams (or hands them off to a
//! peer that already holds them), pushes "smart data" on a timer and hands
//! out tasks. Bulk data between peers moves over direct channels using a
//! chunked transfer protocol the server never sees.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod version;

pub use config::FieldmeshConfig;
pub use error::{Error, ErrorCode, Result};
pub use server::Server;
