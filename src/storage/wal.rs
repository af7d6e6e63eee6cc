//! Write-ahead logging.
//!
//! Every mutation is journaled here before the page it touches can reach the
//! data file. Records carry before- and after-images so recovery can re-apply
//! committed work and diagnostics can inspect what a transaction changed.

pub mod manager;
pub mod record;

pub use manager::{WalConfig, WalManager};
pub use record::{Lsn, WalPayload, WalRecord};
