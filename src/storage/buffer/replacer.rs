pub type FrameId = u32;

/// Eviction policy for unpinned buffer frames.
pub trait Replacer: Send {
    /// A frame became a candidate for eviction.
    fn unpin(&mut self, frame_id: FrameId);

    /// A frame is in use and must not be evicted.
    fn pin(&mut self, frame_id: FrameId);

    /// Picks a victim frame, removing it from the candidate set.
    fn evict(&mut self) -> Option<FrameId>;
}
