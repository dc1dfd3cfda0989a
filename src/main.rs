//! # Haplofill: Donor-Guided Genotype Imputation
//!
//! Fills missing diploid calls in inbred-derived samples by matching each
//! sample against donor haplotype panels.
//!
//! ## Usage
//! ```bash
//! haplofill --gt target.txt --donor panel_chr1.txt --out filled
//! ```

use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use haplofill::config::Config;
use haplofill::data::AlignedDonors;
use haplofill::error::Result;
use haplofill::io::{read_matrix, write_intervals, write_matrix};
use haplofill::pipelines::ImputationOrchestrator;
use haplofill::utils::build_thread_pool;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let start = Instant::now();

    let config = Config::parse_and_validate()?;
    let n_threads = config.nthreads();
    let pool = build_thread_pool(n_threads)?;

    info!("haplofill v{}", env!("CARGO_PKG_VERSION"));
    info!("threads: {}", n_threads);
    info!("target: {}", config.gt.display());

    let store = read_matrix(&config.gt)?;
    info!("{} taxa x {} sites loaded", store.n_taxa(), store.n_sites());

    let mut panels = Vec::with_capacity(config.donors.len());
    for path in &config.donors {
        let panel_store = read_matrix(path)?;
        let panel = AlignedDonors::build(store.sites(), &panel_store)?;
        info!(
            "panel {}: {} donors over sites {}..{}",
            path.display(),
            panel.n_donors(),
            panel.site_range().start,
            panel.site_range().end
        );
        panels.push(panel);
    }

    let mut orchestrator = ImputationOrchestrator::new(config.params());
    if let Some(timeout) = config.timeout() {
        orchestrator = orchestrator.with_timeout(timeout);
    }
    if config.mask_fraction > 0.0 {
        orchestrator = orchestrator.with_masking(config.mask_fraction, config.mask_seed);
    }

    let result = pool.install(|| orchestrator.run(&store, &panels))?;

    let imputed_path = config.out.with_extension("imputed.txt");
    write_matrix(&imputed_path, &result.resolved)?;
    info!("wrote {}", imputed_path.display());

    let intervals_path = config.out.with_extension("intervals.txt");
    write_intervals(&intervals_path, store.taxa(), &result.intervals)?;
    info!("wrote {}", intervals_path.display());

    let summary = &result.summary;
    info!(
        "{} samples, {} unsolved blocks, {} timed out",
        summary.samples.len(),
        summary.total_unsolved_blocks(),
        summary.total_timed_out()
    );
    info!("completed in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
