//! Logical timestamps for snapshots and commits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A logical instant. Snapshot and commit timestamps share one sequence, so
/// comparing them totally orders reads against writes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ts {}", self.0)
    }
}

/// Monotonic timestamp source shared by the whole engine instance.
pub struct TimestampOracle {
    counter: AtomicU64,
}

impl TimestampOracle {
    pub fn new(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start.max(1)),
        }
    }

    pub fn next(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Most recently handed-out timestamp.
    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst).saturating_sub(1))
    }

    /// Recovery fix-up: never hand out anything at or below `floor`.
    pub fn bump_to(&self, floor: u64) {
        self.counter.fetch_max(floor + 1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let oracle = TimestampOracle::new(1);
        let a = oracle.next();
        let b = oracle.next();
        assert!(a < b);
        assert_eq!(oracle.current(), b);
    }

    #[test]
    fn test_bump_to() {
        let oracle = TimestampOracle::new(1);
        oracle.bump_to(100);
        assert!(oracle.next() > Timestamp(100));
    }
}
