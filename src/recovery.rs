//! Crash recovery and checkpointing.

pub mod checkpoint;
pub mod replay;

pub use checkpoint::CheckpointManager;
pub use replay::{recover, RecoveryReport};
