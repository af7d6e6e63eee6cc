//! WAL record types.

use crate::catalog::TableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log sequence number: strictly increasing in append order, 0 is invalid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn {}", self.0)
    }
}

/// The journaled operation. Row images are the serialized on-disk form
/// (row_id + commit timestamp + values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalPayload {
    /// Transaction started.
    Begin,
    /// Row inserted or replaced. `before` is `None` for a fresh insert.
    Put {
        table: TableId,
        row_id: u64,
        before: Option<Vec<u8>>,
        after: Vec<u8>,
    },
    /// Row removed.
    Delete {
        table: TableId,
        row_id: u64,
        before: Vec<u8>,
    },
    /// Transaction committed; all its Put/Delete records are now effective.
    Commit { commit_ts: u64 },
    /// Transaction rolled back; its records must be ignored by replay.
    Abort,
    /// All pages up to this point are on disk; replay may start here.
    Checkpoint { active_txns: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub txn_id: u64,
    pub payload: WalPayload,
}

impl WalRecord {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Whether this record ends its transaction.
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, WalPayload::Commit { .. } | WalPayload::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let records = vec![
            WalRecord {
                lsn: Lsn(1),
                txn_id: 7,
                payload: WalPayload::Begin,
            },
            WalRecord {
                lsn: Lsn(2),
                txn_id: 7,
                payload: WalPayload::Put {
                    table: TableId(3),
                    row_id: 42,
                    before: None,
                    after: vec![1, 2, 3],
                },
            },
            WalRecord {
                lsn: Lsn(3),
                txn_id: 7,
                payload: WalPayload::Delete {
                    table: TableId(3),
                    row_id: 42,
                    before: vec![1, 2, 3],
                },
            },
            WalRecord {
                lsn: Lsn(4),
                txn_id: 7,
                payload: WalPayload::Commit { commit_ts: 100 },
            },
            WalRecord {
                lsn: Lsn(5),
                txn_id: 0,
                payload: WalPayload::Checkpoint {
                    active_txns: vec![8, 9],
                },
            },
        ];
        for record in records {
            let bytes = record.encode().unwrap();
            assert_eq!(WalRecord::decode(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_terminal_records() {
        let commit = WalRecord {
            lsn: Lsn(1),
            txn_id: 1,
            payload: WalPayload::Commit { commit_ts: 5 },
        };
        let put = WalRecord {
            lsn: Lsn(2),
            txn_id: 1,
            payload: WalPayload::Begin,
        };
        assert!(commit.is_terminal());
        assert!(!put.is_terminal());
    }

    #[test]
    fn test_lsn_ordering() {
        assert!(Lsn(1) < Lsn(2));
        assert!(!Lsn::INVALID.is_valid());
        assert!(Lsn(1).is_valid());
    }
}
