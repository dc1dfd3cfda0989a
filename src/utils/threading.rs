//! # Threading Configuration
//!
//! Rayon pool construction for the per-sample dispatch.

use crate::error::{HaplofillError, Result};

/// Create a configured thread pool.
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("haplofill-worker-{}", i))
        .build()
        .map_err(|e| HaplofillError::config(format!("failed to create thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_builds_and_runs() {
        let pool = build_thread_pool(2).unwrap();
        let sum: u32 = pool.install(|| (0..10u32).sum());
        assert_eq!(sum, 45);
    }
}
