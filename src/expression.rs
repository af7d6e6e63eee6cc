//! Expression evaluation over rows.

pub mod eval;

pub use eval::{evaluate, truthy};
