//! Concurrency control: timestamps and multi-version visibility.

pub mod timestamp;
pub mod version;

pub use timestamp::{Timestamp, TimestampOracle};
pub use version::{VersionKey, VersionManager};
