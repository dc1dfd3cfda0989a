//! # Pipelines Module
//!
//! High-level orchestration: the per-taxon cascade worker and the parallel
//! run driver.

pub mod orchestrator;
pub mod worker;

pub use orchestrator::{DonorInterval, ImputationOrchestrator, RunResult};
pub use worker::{merge_call, BlockOutcome, Deadline, ImputedSample, TaxonImputationWorker};
