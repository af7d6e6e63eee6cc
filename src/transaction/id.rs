//! Transaction identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique id of a transaction within a data directory's lifetime. Never
/// reused; recovery bumps the generator past everything found in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn {}", self.0)
    }
}

pub struct TxnIdGenerator {
    next: AtomicU64,
}

impl TxnIdGenerator {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    pub fn next(&self) -> TxnId {
        TxnId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    pub fn bump_to(&self, floor: u64) {
        self.next.fetch_max(floor + 1, Ordering::SeqCst);
    }

    pub fn current_floor(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
