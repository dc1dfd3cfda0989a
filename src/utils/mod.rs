//! # Utilities
//!
//! Threading helpers and run statistics.

pub mod stats;
pub mod threading;

pub use stats::{AccuracyCounts, RunSummary, SampleSummary};
pub use threading::build_thread_pool;
