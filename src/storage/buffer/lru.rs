//! Least-recently-used replacement policy.

use super::replacer::{FrameId, Replacer};
use std::collections::VecDeque;

/// Tracks unpinned frames in access order; the least recently unpinned
/// frame is evicted first.
pub struct LruReplacer {
    queue: VecDeque<FrameId>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Replacer for LruReplacer {
    fn unpin(&mut self, frame_id: FrameId) {
        if !self.queue.contains(&frame_id) {
            self.queue.push_back(frame_id);
        }
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.queue.retain(|&f| f != frame_id);
    }

    fn evict(&mut self) -> Option<FrameId> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_order() {
        let mut lru = LruReplacer::new(4);
        lru.unpin(1);
        lru.unpin(2);
        lru.unpin(3);
        assert_eq!(lru.evict(), Some(1));
        assert_eq!(lru.evict(), Some(2));
        assert_eq!(lru.evict(), Some(3));
        assert_eq!(lru.evict(), None);
    }

    #[test]
    fn test_pin_removes_candidate() {
        let mut lru = LruReplacer::new(4);
        lru.unpin(1);
        lru.unpin(2);
        lru.pin(1);
        assert_eq!(lru.evict(), Some(2));
        assert_eq!(lru.evict(), None);
    }

    #[test]
    fn test_double_unpin_is_idempotent() {
        let mut lru = LruReplacer::new(4);
        lru.unpin(5);
        lru.unpin(5);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict(), Some(5));
        assert_eq!(lru.evict(), None);
    }
}
