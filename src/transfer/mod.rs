//! Chunked transfer protocol used once two peers share a direct channel

mod chunker;
mod throughput;

pub use chunker::*;
pub use throughput::*;
