//! Vector collections: fixed-dimension embeddings with exact top-k search.
//!
//! The baseline search is brute force: one Euclidean distance per stored
//! vector, kept in a bounded max-heap of size k. Results come back ascending
//! by distance with ties broken by insertion order. An approximate structure
//! can replace this behind the same methods without touching callers.
//!
//! Durable truth lives in the hidden `__vectors` table; this store is the
//! in-memory index over it, rebuilt at open and updated after commits.

use crate::error::{DbError, DbResult};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone)]
struct StoredVector {
    id: String,
    data: Vec<f32>,
    seq: u64,
}

#[derive(Default)]
struct Collection {
    dimension: usize,
    vectors: Vec<StoredVector>,
    by_id: HashMap<String, usize>,
    next_seq: u64,
}

/// A search hit: id and distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub distance: f64,
}

#[derive(Default)]
pub struct VectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a vector. The first insert into a collection
    /// fixes its dimension; later inserts must match it.
    pub fn insert(&self, collection: &str, id: &str, data: Vec<f32>) -> DbResult<()> {
        if data.is_empty() {
            return Err(DbError::InvalidArgument(
                "vectors must have at least one component".into(),
            ));
        }
        let mut collections = self.collections.write();
        let coll = collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension: data.len(),
                ..Default::default()
            });
        if data.len() != coll.dimension {
            return Err(DbError::DimensionMismatch {
                expected: coll.dimension,
                actual: data.len(),
            });
        }

        match coll.by_id.entry(id.to_string()) {
            Entry::Occupied(slot) => {
                // Replacement keeps the original insertion order for ties.
                coll.vectors[*slot.get()].data = data;
            }
            Entry::Vacant(slot) => {
                let seq = coll.next_seq;
                coll.next_seq += 1;
                slot.insert(coll.vectors.len());
                coll.vectors.push(StoredVector {
                    id: id.to_string(),
                    data,
                    seq,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Vec<f32>> {
        let collections = self.collections.read();
        let coll = collections.get(collection)?;
        coll.by_id
            .get(id)
            .map(|&idx| coll.vectors[idx].data.clone())
    }

    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return false;
        };
        let Some(idx) = coll.by_id.remove(id) else {
            return false;
        };
        coll.vectors.remove(idx);
        for slot in coll.by_id.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        true
    }

    pub fn dimension(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.dimension)
    }

    /// Exact k-nearest-neighbor search, ascending by Euclidean distance,
    /// ties resolved toward earlier insertion.
    pub fn search(&self, collection: &str, query: &[f32], k: usize) -> DbResult<Vec<VectorMatch>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| DbError::NotFound(format!("collection '{}' does not exist", collection)))?;
        if query.len() != coll.dimension {
            return Err(DbError::DimensionMismatch {
                expected: coll.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // Bounded top-k: a max-heap of the best candidates so far.
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for stored in &coll.vectors {
            let distance = euclidean(query, &stored.data);
            heap.push(Candidate {
                distance,
                seq: stored.seq,
                id: stored.id.clone(),
            });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut matches: Vec<Candidate> = heap.into_vec();
        matches.sort();
        Ok(matches
            .into_iter()
            .map(|c| VectorMatch {
                id: c.id,
                distance: c.distance,
            })
            .collect())
    }

    pub fn drop_collection(&self, collection: &str) {
        self.collections.write().remove(collection);
    }

    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = (*x - *y) as f64;
        sum += diff * diff;
    }
    sum.sqrt()
}

struct Candidate {
    distance: f64,
    seq: u64,
    id: String,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.seq == other.seq
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Distance first, insertion order as the tiebreak. NaNs sort last so
        // they fall out of the heap before real matches do.
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.seq.cmp(&other.seq))
    }
}
