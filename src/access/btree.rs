//! Page-based B+Tree mapping encoded keys to row ids.
//!
//! Leaves hold sorted `(key, row_id)` entries and are chained through the
//! page header's next link for range scans; internal nodes hold separator
//! keys and child pointers. Nodes split when their encoding outgrows the
//! page and borrow from or merge with a sibling when they shrink below a
//! quarter of it, so the tree stays balanced under any insert/delete mix.
//!
//! Non-unique indexes append the row id to the key before it gets here, so
//! at this layer keys are always unique and insert-on-equal is an update.
//!
//! Structural changes are made durable by the logical WAL records of the
//! commits that caused them: replay re-executes those inserts and deletes
//! through this same code, and checkpointed page images bound how far that
//! replay has to go.

use crate::error::{DbError, DbResult};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{self, PageId, PageKind, PAGE_HEADER_SIZE};
use crate::storage::wal::Lsn;
use std::collections::VecDeque;

const LEAF_FIXED: usize = 2;
const LEAF_ENTRY_OVERHEAD: usize = 2 + 8;
const INTERNAL_FIXED: usize = 2 + 4;
const INTERNAL_ENTRY_OVERHEAD: usize = 2 + 4;

#[derive(Debug, Clone)]
enum Node {
    Leaf { entries: Vec<(Vec<u8>, u64)> },
    Internal {
        first_child: PageId,
        entries: Vec<(Vec<u8>, PageId)>,
    },
}

pub struct BTree {
    pool: BufferPoolManager,
    root: PageId,
}

impl BTree {
    pub fn new(pool: BufferPoolManager, root: PageId) -> Self {
        Self { pool, root }
    }

    /// Current root page. INVALID for an empty tree; callers persist this
    /// back into the catalog after mutations.
    pub fn root(&self) -> PageId {
        self.root
    }

    fn capacity(&self) -> usize {
        self.pool.page_size() - PAGE_HEADER_SIZE
    }

    fn max_key_len(&self) -> usize {
        // A node must always fit at least two entries.
        self.capacity() / 2 - LEAF_ENTRY_OVERHEAD - LEAF_FIXED
    }

    pub fn insert(&mut self, key: &[u8], value: u64, lsn: Lsn) -> DbResult<()> {
        if key.len() > self.max_key_len() {
            return Err(DbError::InvalidArgument(format!(
                "index key of {} bytes exceeds the {}-byte limit",
                key.len(),
                self.max_key_len()
            )));
        }

        if !self.root.is_valid() {
            let (page_id, mut guard) = self.pool.new_page()?;
            let node = Node::Leaf {
                entries: vec![(key.to_vec(), value)],
            };
            encode_node(&node, &mut guard, page_id, PageId::INVALID);
            page::set_lsn(&mut guard, lsn.0);
            self.root = page_id;
            return Ok(());
        }

        if let Some((sep, right)) = self.insert_rec(self.root, key, value, lsn)? {
            // Root split: grow the tree by one level.
            let old_root = self.root;
            let (page_id, mut guard) = self.pool.new_page()?;
            let node = Node::Internal {
                first_child: old_root,
                entries: vec![(sep, right)],
            };
            encode_node(&node, &mut guard, page_id, PageId::INVALID);
            page::set_lsn(&mut guard, lsn.0);
            self.root = page_id;
        }
        Ok(())
    }

    fn insert_rec(
        &mut self,
        page_id: PageId,
        key: &[u8],
        value: u64,
        lsn: Lsn,
    ) -> DbResult<Option<(Vec<u8>, PageId)>> {
        let (node, next_link) = self.read_node(page_id)?;
        match node {
            Node::Leaf { mut entries } => {
                match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Ok(pos) => entries[pos].1 = value,
                    Err(pos) => entries.insert(pos, (key.to_vec(), value)),
                }
                if LEAF_FIXED + leaf_entries_size(&entries) <= self.capacity() {
                    self.write_node(page_id, &Node::Leaf { entries }, next_link, lsn)?;
                    return Ok(None);
                }
                // Overflow: move the upper half into a fresh right sibling.
                let split = split_point(&entries, LEAF_ENTRY_OVERHEAD);
                let right_entries = entries[split..].to_vec();
                let left_entries = entries[..split].to_vec();
                let sep = right_entries[0].0.clone();

                let (right_id, mut right_guard) = self.pool.new_page()?;
                encode_node(
                    &Node::Leaf {
                        entries: right_entries,
                    },
                    &mut right_guard,
                    right_id,
                    next_link,
                );
                page::set_lsn(&mut right_guard, lsn.0);
                drop(right_guard);

                self.write_node(
                    page_id,
                    &Node::Leaf {
                        entries: left_entries,
                    },
                    right_id,
                    lsn,
                )?;
                Ok(Some((sep, right_id)))
            }
            Node::Internal {
                first_child,
                mut entries,
            } => {
                let child = child_for(first_child, &entries, key).1;
                let split = self.insert_rec(child, key, value, lsn)?;
                if let Some((sep, right)) = split {
                    let pos = match entries.binary_search_by(|(k, _)| k.as_slice().cmp(&sep)) {
                        Ok(p) | Err(p) => p,
                    };
                    entries.insert(pos, (sep, right));
                    if INTERNAL_FIXED + internal_entries_size(&entries) <= self.capacity() {
                        self.write_node(
                            page_id,
                            &Node::Internal {
                                first_child,
                                entries,
                            },
                            next_link,
                            lsn,
                        )?;
                        return Ok(None);
                    }
                    // Internal overflow: the middle separator moves up.
                    let mid = entries.len() / 2;
                    let (up_key, right_first) = entries[mid].clone();
                    let right_entries = entries[mid + 1..].to_vec();
                    let left_entries = entries[..mid].to_vec();

                    let (right_id, mut right_guard) = self.pool.new_page()?;
                    encode_node(
                        &Node::Internal {
                            first_child: right_first,
                            entries: right_entries,
                        },
                        &mut right_guard,
                        right_id,
                        PageId::INVALID,
                    );
                    page::set_lsn(&mut right_guard, lsn.0);
                    drop(right_guard);

                    self.write_node(
                        page_id,
                        &Node::Internal {
                            first_child,
                            entries: left_entries,
                        },
                        PageId::INVALID,
                        lsn,
                    )?;
                    return Ok(Some((up_key, right_id)));
                }
                Ok(None)
            }
        }
    }

    /// Removes a key. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8], lsn: Lsn) -> DbResult<bool> {
        if !self.root.is_valid() {
            return Ok(false);
        }
        let found = self.delete_rec(self.root, key, lsn)?;

        // Collapse the root while it is an internal node with a single child.
        loop {
            let (node, _) = self.read_node(self.root)?;
            match node {
                Node::Internal { first_child, entries } if entries.is_empty() => {
                    let old = self.root;
                    self.root = first_child;
                    self.pool.free_page(old)?;
                }
                _ => break,
            }
        }
        Ok(found)
    }

    fn delete_rec(&mut self, page_id: PageId, key: &[u8], lsn: Lsn) -> DbResult<bool> {
        let (node, next_link) = self.read_node(page_id)?;
        match node {
            Node::Leaf { mut entries } => {
                match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Ok(pos) => {
                        entries.remove(pos);
                        self.write_node(page_id, &Node::Leaf { entries }, next_link, lsn)?;
                        Ok(true)
                    }
                    Err(_) => Ok(false),
                }
            }
            Node::Internal {
                first_child,
                entries,
            } => {
                let (child_idx, child) = child_for(first_child, &entries, key);
                let found = self.delete_rec(child, key, lsn)?;
                if found {
                    self.rebalance_child(page_id, child_idx, lsn)?;
                }
                Ok(found)
            }
        }
    }

    /// Re-reads the parent and fixes up `child_idx` if it underflowed:
    /// borrow one entry from an adjacent sibling when that leaves the
    /// sibling healthy, otherwise merge the two and drop the separator.
    fn rebalance_child(&mut self, parent_id: PageId, child_idx: usize, lsn: Lsn) -> DbResult<()> {
        let (parent, parent_link) = self.read_node(parent_id)?;
        let Node::Internal {
            first_child,
            entries,
        } = parent
        else {
            return Ok(());
        };

        let child_id = if child_idx == 0 {
            first_child
        } else {
            entries[child_idx - 1].1
        };
        let (child, _) = self.read_node(child_id)?;
        let threshold = self.capacity() / 4;
        if node_size(&child) >= threshold {
            return Ok(());
        }

        // Prefer the right sibling; fall back to the left one.
        let (left_idx, right_idx) = if child_idx < entries.len() {
            (child_idx, child_idx + 1)
        } else if child_idx > 0 {
            (child_idx - 1, child_idx)
        } else {
            return Ok(()); // Only child: nothing to balance against.
        };
        let left_id = if left_idx == 0 {
            first_child
        } else {
            entries[left_idx - 1].1
        };
        let right_id = entries[right_idx - 1].1;
        let sep_pos = right_idx - 1;

        let (left, left_link) = self.read_node(left_id)?;
        let (right, right_link) = self.read_node(right_id)?;
        let mut entries = entries;

        match (left, right) {
            (Node::Leaf { entries: mut le }, Node::Leaf { entries: mut re }) => {
                let merged_size =
                    LEAF_FIXED + leaf_entries_size(&le) + leaf_entries_size(&re);
                if merged_size <= self.capacity() {
                    // Merge right into left, unlink and free the right page.
                    le.extend(re);
                    self.write_node(left_id, &Node::Leaf { entries: le }, right_link, lsn)?;
                    entries.remove(sep_pos);
                    self.pool.free_page(right_id)?;
                } else if node_size(&Node::Leaf { entries: le.clone() }) < threshold {
                    // Left is the runt: take the right's first entry.
                    let moved = re.remove(0);
                    le.push(moved);
                    entries[sep_pos].0 = re[0].0.clone();
                    self.write_node(left_id, &Node::Leaf { entries: le }, left_link, lsn)?;
                    self.write_node(right_id, &Node::Leaf { entries: re }, right_link, lsn)?;
                } else {
                    // Right is the runt: give it the left's last entry.
                    let moved = le.pop().expect("left leaf cannot be empty here");
                    entries[sep_pos].0 = moved.0.clone();
                    re.insert(0, moved);
                    self.write_node(left_id, &Node::Leaf { entries: le }, left_link, lsn)?;
                    self.write_node(right_id, &Node::Leaf { entries: re }, right_link, lsn)?;
                }
            }
            (
                Node::Internal {
                    first_child: lf,
                    entries: mut le,
                },
                Node::Internal {
                    first_child: rf,
                    entries: re,
                },
            ) => {
                let sep_key = entries[sep_pos].0.clone();
                let merged_size = INTERNAL_FIXED
                    + internal_entries_size(&le)
                    + INTERNAL_ENTRY_OVERHEAD
                    + sep_key.len()
                    + internal_entries_size(&re);
                if merged_size <= self.capacity() {
                    // Pull the separator down between the two halves.
                    le.push((sep_key, rf));
                    le.extend(re);
                    self.write_node(
                        left_id,
                        &Node::Internal {
                            first_child: lf,
                            entries: le,
                        },
                        left_link,
                        lsn,
                    )?;
                    entries.remove(sep_pos);
                    self.pool.free_page(right_id)?;
                } else {
                    // Rotation through the parent separator.
                    let runt_is_left = INTERNAL_FIXED + internal_entries_size(&le) < threshold;
                    let mut re = re;
                    if runt_is_left {
                        let sep = entries[sep_pos].0.clone();
                        le.push((sep, rf));
                        let (new_sep, new_rf) = re.remove(0);
                        entries[sep_pos].0 = new_sep;
                        self.write_node(
                            left_id,
                            &Node::Internal { first_child: lf, entries: le },
                            left_link,
                            lsn,
                        )?;
                        self.write_node(
                            right_id,
                            &Node::Internal { first_child: new_rf, entries: re },
                            right_link,
                            lsn,
                        )?;
                    } else {
                        let (stolen_key, stolen_child) =
                            le.pop().expect("left internal cannot be empty here");
                        let sep = std::mem::replace(&mut entries[sep_pos].0, stolen_key);
                        re.insert(0, (sep, rf));
                        self.write_node(
                            left_id,
                            &Node::Internal { first_child: lf, entries: le },
                            left_link,
                            lsn,
                        )?;
                        self.write_node(
                            right_id,
                            &Node::Internal { first_child: stolen_child, entries: re },
                            right_link,
                            lsn,
                        )?;
                    }
                }
            }
            _ => {
                return Err(DbError::Corruption(
                    "sibling b+tree nodes of different kinds".into(),
                ))
            }
        }

        self.write_node(
            parent_id,
            &Node::Internal {
                first_child,
                entries,
            },
            parent_link,
            lsn,
        )
    }

    pub fn search(&self, key: &[u8]) -> DbResult<Option<u64>> {
        if !self.root.is_valid() {
            return Ok(None);
        }
        let mut current = self.root;
        loop {
            let (node, _) = self.read_node(current)?;
            match node {
                Node::Leaf { entries } => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                        .ok()
                        .map(|pos| entries[pos].1));
                }
                Node::Internal {
                    first_child,
                    entries,
                } => {
                    current = child_for(first_child, &entries, key).1;
                }
            }
        }
    }

    /// Lazy ascending scan of `[lo, hi]` (both bounds inclusive, `None` =
    /// unbounded). The cursor loads one leaf at a time.
    pub fn range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> DbResult<BTreeRange> {
        let mut cursor = BTreeRange {
            pool: self.pool.clone(),
            hi: hi.map(|h| h.to_vec()),
            buffer: VecDeque::new(),
            next_leaf: PageId::INVALID,
            done: !self.root.is_valid(),
        };
        if cursor.done {
            return Ok(cursor);
        }

        // Descend to the leaf that would contain `lo`.
        let mut current = self.root;
        loop {
            let (node, next_link) = self.read_node(current)?;
            match node {
                Node::Leaf { entries } => {
                    let start = match lo {
                        Some(lo) => entries
                            .binary_search_by(|(k, _)| k.as_slice().cmp(lo))
                            .unwrap_or_else(|p| p),
                        None => 0,
                    };
                    cursor.buffer = entries.into_iter().skip(start).collect();
                    cursor.next_leaf = next_link;
                    return Ok(cursor);
                }
                Node::Internal {
                    first_child,
                    entries,
                } => {
                    current = match lo {
                        Some(lo) => child_for(first_child, &entries, lo).1,
                        None => first_child,
                    };
                }
            }
        }
    }

    /// Frees every page of the tree and leaves it empty.
    pub fn destroy(&mut self) -> DbResult<()> {
        if self.root.is_valid() {
            self.destroy_rec(self.root)?;
            self.root = PageId::INVALID;
        }
        Ok(())
    }

    fn destroy_rec(&mut self, page_id: PageId) -> DbResult<()> {
        let (node, _) = self.read_node(page_id)?;
        if let Node::Internal {
            first_child,
            entries,
        } = node
        {
            self.destroy_rec(first_child)?;
            for (_, child) in entries {
                self.destroy_rec(child)?;
            }
        }
        self.pool.free_page(page_id)
    }

    fn read_node(&self, page_id: PageId) -> DbResult<(Node, PageId)> {
        let guard = self.pool.fetch_page(page_id)?;
        let node = decode_node(&guard)?;
        let next = page::next_page_of(&guard);
        Ok((node, next))
    }

    fn write_node(&self, page_id: PageId, node: &Node, next: PageId, lsn: Lsn) -> DbResult<()> {
        let mut guard = self.pool.fetch_page_write(page_id)?;
        encode_node(node, &mut guard, page_id, next);
        page::set_lsn(&mut guard, lsn.0);
        Ok(())
    }
}

pub struct BTreeRange {
    pool: BufferPoolManager,
    hi: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, u64)>,
    next_leaf: PageId,
    done: bool,
}

impl Iterator for BTreeRange {
    type Item = DbResult<(Vec<u8>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((key, value)) = self.buffer.pop_front() {
                if let Some(hi) = &self.hi {
                    if key.as_slice() > hi.as_slice() {
                        self.done = true;
                        return None;
                    }
                }
                return Some(Ok((key, value)));
            }
            if !self.next_leaf.is_valid() {
                self.done = true;
                return None;
            }
            let guard = match self.pool.fetch_page(self.next_leaf) {
                Ok(g) => g,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match decode_node(&guard) {
                Ok(Node::Leaf { entries }) => {
                    self.buffer = entries.into();
                    self.next_leaf = page::next_page_of(&guard);
                }
                Ok(Node::Internal { .. }) => {
                    self.done = true;
                    return Some(Err(DbError::Corruption(
                        "leaf chain links to an internal node".into(),
                    )));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn child_for(first_child: PageId, entries: &[(Vec<u8>, PageId)], key: &[u8]) -> (usize, PageId) {
    // Child i covers keys in [entries[i-1].key, entries[i].key).
    let mut idx = 0;
    let mut child = first_child;
    for (i, (sep, page)) in entries.iter().enumerate() {
        if key >= sep.as_slice() {
            idx = i + 1;
            child = *page;
        } else {
            break;
        }
    }
    (idx, child)
}

fn leaf_entries_size(entries: &[(Vec<u8>, u64)]) -> usize {
    entries
        .iter()
        .map(|(k, _)| LEAF_ENTRY_OVERHEAD + k.len())
        .sum()
}

fn internal_entries_size(entries: &[(Vec<u8>, PageId)]) -> usize {
    entries
        .iter()
        .map(|(k, _)| INTERNAL_ENTRY_OVERHEAD + k.len())
        .sum()
}

fn node_size(node: &Node) -> usize {
    match node {
        Node::Leaf { entries } => LEAF_FIXED + leaf_entries_size(entries),
        Node::Internal { entries, .. } => INTERNAL_FIXED + internal_entries_size(entries),
    }
}

/// Picks the split index where the left half first reaches half the bytes.
fn split_point(entries: &[(Vec<u8>, u64)], overhead: usize) -> usize {
    let total: usize = entries.iter().map(|(k, _)| overhead + k.len()).sum();
    let mut acc = 0;
    for (i, (k, _)) in entries.iter().enumerate() {
        acc += overhead + k.len();
        if acc >= total / 2 && i + 1 < entries.len() {
            return i + 1;
        }
    }
    entries.len() / 2
}

fn encode_node(node: &Node, data: &mut [u8], page_id: PageId, next: PageId) {
    let kind = match node {
        Node::Leaf { .. } => PageKind::BTreeLeaf,
        Node::Internal { .. } => PageKind::BTreeInternal,
    };
    page::init_page(data, page_id, kind);
    page::set_next_page(data, next);

    let mut pos = PAGE_HEADER_SIZE;
    match node {
        Node::Leaf { entries } => {
            data[pos..pos + 2].copy_from_slice(&(entries.len() as u16).to_le_bytes());
            pos += 2;
            for (key, value) in entries {
                data[pos..pos + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
                pos += 2;
                data[pos..pos + key.len()].copy_from_slice(key);
                pos += key.len();
                data[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
                pos += 8;
            }
        }
        Node::Internal {
            first_child,
            entries,
        } => {
            data[pos..pos + 2].copy_from_slice(&(entries.len() as u16).to_le_bytes());
            pos += 2;
            data[pos..pos + 4].copy_from_slice(&first_child.0.to_le_bytes());
            pos += 4;
            for (key, child) in entries {
                data[pos..pos + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
                pos += 2;
                data[pos..pos + key.len()].copy_from_slice(key);
                pos += key.len();
                data[pos..pos + 4].copy_from_slice(&child.0.to_le_bytes());
                pos += 4;
            }
        }
    }
}

fn decode_node(data: &[u8]) -> DbResult<Node> {
    let kind = page::kind_of(data)?;
    let mut pos = PAGE_HEADER_SIZE;
    let count = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
    pos += 2;
    match kind {
        PageKind::BTreeLeaf => {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let klen = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
                pos += 2;
                let key = data[pos..pos + klen].to_vec();
                pos += klen;
                let value = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
                pos += 8;
                entries.push((key, value));
            }
            Ok(Node::Leaf { entries })
        }
        PageKind::BTreeInternal => {
            let first_child = PageId(u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()));
            pos += 4;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let klen = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
                pos += 2;
                let key = data[pos..pos + klen].to_vec();
                pos += klen;
                let child = PageId(u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()));
                pos += 4;
                entries.push((key, child));
            }
            Ok(Node::Internal {
                first_child,
                entries,
            })
        }
        other => Err(DbError::Corruption(format!(
            "expected a b+tree page, found {:?}",
            other
        ))),
    }
}
