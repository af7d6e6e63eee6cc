//! Committed version chains for snapshot isolation.
//!
//! The heap always holds the newest committed state of every row; this store
//! keeps the recent history on top of it. Each commit publishes the row's
//! new image (or its deletion) here, seeding the chain with the pre-existing
//! heap state on first touch so older snapshots keep a version to read.
//!
//! A reader asks `visible(key, snapshot)`: the answer is the newest version
//! at or below the snapshot, `Visibility::Deleted` when that version is a
//! tombstone, or `Visibility::Unknown` when the key has no chain at all and
//! the heap row (with its stored commit timestamp) decides.
//!
//! Garbage collection prunes versions no snapshot can reach: everything
//! older than the oldest active snapshot except the newest such version,
//! and whole chains whose newest version is itself that old (the heap copy
//! answers for them).

use crate::catalog::TableId;
use crate::concurrency::timestamp::Timestamp;
use parking_lot::RwLock;
use std::collections::HashMap;

pub type VersionKey = (TableId, u64);

#[derive(Debug, Clone)]
struct Version {
    commit_ts: Timestamp,
    /// Serialized values; `None` is a deletion tombstone.
    image: Option<Vec<u8>>,
}

/// What the version store knows about a key at some snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Visibility {
    /// This image is the visible version.
    Row(Vec<u8>),
    /// The row is visibly absent (deleted, or created after the snapshot).
    Deleted,
    /// No chain for this key; consult the heap.
    Unknown,
}

#[derive(Default)]
pub struct VersionManager {
    chains: RwLock<HashMap<VersionKey, Vec<Version>>>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a committed version. `base` carries the pre-existing heap
    /// state captured when the writing transaction first touched the key;
    /// it seeds the chain so concurrent older snapshots stay consistent.
    pub fn publish(
        &self,
        key: VersionKey,
        base: Option<(Timestamp, Option<Vec<u8>>)>,
        commit_ts: Timestamp,
        image: Option<Vec<u8>>,
    ) {
        let mut chains = self.chains.write();
        let chain = chains.entry(key).or_default();
        if chain.is_empty() {
            if let Some((base_ts, base_image)) = base {
                chain.push(Version {
                    commit_ts: base_ts,
                    image: base_image,
                });
            }
        }
        chain.push(Version { commit_ts, image });
    }

    pub fn visible(&self, key: &VersionKey, snapshot: Timestamp) -> Visibility {
        let chains = self.chains.read();
        let Some(chain) = chains.get(key) else {
            return Visibility::Unknown;
        };
        // Versions are appended in commit order; walk from the newest.
        for version in chain.iter().rev() {
            if version.commit_ts <= snapshot {
                return match &version.image {
                    Some(bytes) => Visibility::Row(bytes.clone()),
                    None => Visibility::Deleted,
                };
            }
        }
        // Every version postdates the snapshot: the row did not exist yet.
        Visibility::Deleted
    }

    /// Newest committed timestamp for a key; the commit-time conflict check.
    pub fn latest_commit_ts(&self, key: &VersionKey) -> Option<Timestamp> {
        self.chains
            .read()
            .get(key)
            .and_then(|chain| chain.last())
            .map(|v| v.commit_ts)
    }

    /// Per-row visibility overlay for one table, used by scans to adjust
    /// heap rows and to resurrect rows deleted after the snapshot.
    pub fn table_overlay(
        &self,
        table: TableId,
        snapshot: Timestamp,
    ) -> HashMap<u64, Visibility> {
        let chains = self.chains.read();
        chains
            .iter()
            .filter(|((t, _), _)| *t == table)
            .map(|((_, row_id), _)| {
                (*row_id, self.visible_locked(&chains, &(table, *row_id), snapshot))
            })
            .collect()
    }

    fn visible_locked(
        &self,
        chains: &HashMap<VersionKey, Vec<Version>>,
        key: &VersionKey,
        snapshot: Timestamp,
    ) -> Visibility {
        let Some(chain) = chains.get(key) else {
            return Visibility::Unknown;
        };
        for version in chain.iter().rev() {
            if version.commit_ts <= snapshot {
                return match &version.image {
                    Some(bytes) => Visibility::Row(bytes.clone()),
                    None => Visibility::Deleted,
                };
            }
        }
        Visibility::Deleted
    }

    /// Reclaims versions invisible to every active and future snapshot.
    pub fn gc(&self, oldest_active: Timestamp) {
        let mut chains = self.chains.write();
        chains.retain(|_, chain| {
            // Keep the newest version at or below the horizon, drop the rest
            // below it.
            let keep_from = chain
                .iter()
                .rposition(|v| v.commit_ts <= oldest_active)
                .unwrap_or(0);
            chain.drain(..keep_from);
            // If even the newest version is below the horizon, the heap copy
            // alone serves every reachable snapshot.
            !(chain.len() == 1 && chain[0].commit_ts <= oldest_active)
        });
    }

    pub fn remove_table(&self, table: TableId) {
        self.chains.write().retain(|(t, _), _| *t != table);
    }

    pub fn chain_count(&self) -> usize {
        self.chains.read().len()
    }

    pub fn version_count(&self) -> usize {
        self.chains.read().values().map(|c| c.len()).sum()
    }
}
