//! Monitoring
//!
//! Telemetry sinks and counters shared by the coordination
//! components.

use std::sync::atomic::{AtomicU64, Ordering};

pub mod telemetry;

pub use telemetry::*;

/// Lock-free counter used for component statistics
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one; returns the new value
    pub fn incr(&self) -> u64 {
        self.add(1)
    }

    /// Add `n`; returns the new value
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.incr(), 1);
        assert_eq!(counter.add(4), 5);
        assert_eq!(counter.get(), 5);
    }
}
