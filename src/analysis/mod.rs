//! Analysis modules.
//!
//! Merging specialist output into a single deduplicated report.

pub mod aggregator;
pub mod dedup;

pub use aggregator::{aggregate, count_by_severity};
pub use dedup::dedup;
