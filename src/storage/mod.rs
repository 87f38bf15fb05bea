//! File access for the server

mod directory;

pub use directory::*;
