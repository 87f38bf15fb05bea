//! Throughput accounting for chunked transfers

use std::fmt;
use std::time::{Duration, Instant};

/// Measured rate of one completed transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    /// Bytes per second; `None` when the transfer took no measurable time
    pub fn bytes_per_sec(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.bytes as f64 / secs)
        } else {
            None
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes_per_sec() {
            Some(rate) => write!(f, "{:.2} KiB/s", rate / 1024.0),
            None => write!(f, "{} bytes (instant)", self.bytes),
        }
    }
}

/// Stamps the first and last chunk of a transfer.
///
/// Callers pass the instants so tests control time.
#[derive(Debug, Default)]
pub struct ThroughputMeter {
    started: Option<Instant>,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the arrival of the chunk at offset 0
    pub fn start(&mut self, at: Instant) {
        self.started = Some(at);
    }

    /// Record the last chunk and reset. `None` if never started.
    pub fn finish(&mut self, at: Instant, total_bytes: u64) -> Option<Throughput> {
        let started = self.started.take()?;
        Some(Throughput {
            bytes: total_bytes,
            elapsed: at.saturating_duration_since(started),
        })
    }

    pub fn reset(&mut self) {
        self.started = None;
    }
}
