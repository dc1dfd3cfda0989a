//! # Imputation Orchestrator
//!
//! Dispatches one `TaxonImputationWorker` per sample across the rayon pool.
//! Workers are pure functions of (taxon, read-only target matrix, read-only
//! donor panels) writing private buffers; the only serialized step is the
//! final installation of finished rows into the output matrix. Accuracy
//! counters are accumulated per worker and merged in one reduction after the
//! pool drains — nothing synchronizes inside the search/decode loops.

use std::time::Duration;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::data::store::{HET, MISSING};
use crate::data::{AlignedDonors, DonorIdx, GenotypeStore, TaxonIdx};
use crate::error::Result;
use crate::model::params::ImputationParams;
use crate::pipelines::worker::{
    BlockOutcome, Deadline, ImputedSample, TaxonImputationWorker,
};
use crate::utils::stats::{AccuracyCounts, RunSummary, SampleSummary};

/// One stretch of a sample explained by a fixed donor (pair).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DonorInterval {
    pub start_pos: u64,
    pub end_pos: u64,
    pub donor1: String,
    pub donor2: String,
}

/// Output of one orchestrated run.
pub struct RunResult {
    /// Input matrix with missing calls filled where resolved
    pub resolved: GenotypeStore,
    pub summary: RunSummary,
    /// Per taxon, the ordered donor-interval breakpoint list
    pub intervals: Vec<Vec<DonorInterval>>,
}

/// Parallel driver for a whole imputation run.
pub struct ImputationOrchestrator {
    params: ImputationParams,
    timeout: Option<Duration>,
    mask_fraction: f64,
    mask_seed: u64,
}

impl ImputationOrchestrator {
    pub fn new(params: ImputationParams) -> Self {
        Self {
            params,
            timeout: None,
            mask_fraction: 0.0,
            mask_seed: 0,
        }
    }

    /// Abandon samples still unfinished after `timeout`; they are emitted
    /// with their original calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mask a fraction of known calls before imputing and score the
    /// re-imputed calls against the masked truth.
    pub fn with_masking(mut self, fraction: f64, seed: u64) -> Self {
        self.mask_fraction = fraction;
        self.mask_seed = seed;
        self
    }

    /// Run every sample through the cascade and assemble the output matrix.
    pub fn run(&self, store: &GenotypeStore, panels: &[AlignedDonors]) -> Result<RunResult> {
        self.params.validate()?;
        let n_taxa = store.n_taxa();

        let (input, truth) = if self.mask_fraction > 0.0 {
            self.mask_store(store)?
        } else {
            (store.clone(), vec![Vec::new(); n_taxa])
        };

        let deadline = match self.timeout {
            Some(t) => Deadline::after(t),
            None => Deadline::none(),
        };
        let worker = TaxonImputationWorker::new(&input, panels, &self.params, deadline);

        // One task per sample; results come back keyed by taxon index so
        // completion order is irrelevant.
        let results: Vec<(ImputedSample, AccuracyCounts)> = (0..n_taxa)
            .into_par_iter()
            .map(|t| {
                let taxon = TaxonIdx::new(t as u32);
                let sample = worker.run(taxon);
                let counts = score_masked(&sample, &truth[t]);
                (sample, counts)
            })
            .collect();

        // Pool has drained: merge counters, install rows single-writer.
        let accuracy = results
            .iter()
            .map(|(_, c)| *c)
            .fold(AccuracyCounts::default(), AccuracyCounts::merge);

        let mut resolved = input;
        let mut summaries = Vec::with_capacity(n_taxa);
        let mut intervals = Vec::with_capacity(n_taxa);
        for (sample, _) in &results {
            resolved.set_taxon_row(sample.taxon, &sample.resolved)?;
            let summary = summarize(store, panels, sample);
            if sample.timed_out {
                warn!("{} abandoned at deadline, emitted unresolved", summary.taxon);
            }
            info!("{}", summary.report_line());
            intervals.push(donor_intervals(store, panels, sample));
            summaries.push(summary);
        }

        if self.mask_fraction > 0.0 {
            info!(
                "masked-call check: {} correct, {} incorrect, {} unresolved (error rate {:.5})",
                accuracy.correct,
                accuracy.incorrect,
                accuracy.unresolved,
                accuracy.error_rate()
            );
        }

        Ok(RunResult {
            resolved,
            summary: RunSummary {
                samples: summaries,
                accuracy,
            },
            intervals,
        })
    }

    /// Replace a random fraction of called genotypes with missing,
    /// remembering the truth for scoring. Deterministic in the seed.
    fn mask_store(&self, store: &GenotypeStore) -> Result<(GenotypeStore, Vec<Vec<(usize, u8)>>)> {
        let mut masked = store.clone();
        let mut truth = Vec::with_capacity(store.n_taxa());
        let mut rng = self.mask_seed | 1;
        for t in 0..store.n_taxa() {
            let taxon = TaxonIdx::new(t as u32);
            let mut row = store.decode_taxon(taxon);
            let mut hidden = Vec::new();
            for (s, call) in row.iter_mut().enumerate() {
                if *call == MISSING {
                    continue;
                }
                if next_f64(&mut rng) < self.mask_fraction {
                    hidden.push((s, *call));
                    *call = MISSING;
                }
            }
            masked.set_taxon_row(taxon, &row)?;
            truth.push(hidden);
        }
        Ok((masked, truth))
    }
}

/// xorshift64; cheap and reproducible, only used for call masking
fn next_f64(state: &mut u64) -> f64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

fn score_masked(sample: &ImputedSample, truth: &[(usize, u8)]) -> AccuracyCounts {
    let mut counts = AccuracyCounts::default();
    for &(site, expected) in truth {
        let got = sample.resolved[site];
        if got == MISSING {
            counts.unresolved += 1;
        } else if got == expected {
            counts.correct += 1;
        } else {
            counts.incorrect += 1;
        }
    }
    counts
}

fn summarize(
    store: &GenotypeStore,
    panels: &[AlignedDonors],
    sample: &ImputedSample,
) -> SampleSummary {
    let mut summary = SampleSummary {
        taxon: store.taxon_name(sample.taxon).to_string(),
        n_sites: store.n_sites(),
        timed_out: sample.timed_out,
        ..Default::default()
    };
    if sample.segment_solved {
        summary.segments_solved = 1;
    }

    let mut covered = vec![false; store.n_blocks()];
    for panel in panels {
        for b in panel.block_range() {
            covered[b] = true;
        }
    }
    for (b, outcome) in sample.outcomes.iter().enumerate() {
        match outcome {
            BlockOutcome::Inbred { .. } => summary.inbred_blocks += 1,
            BlockOutcome::Viterbi { .. } => summary.viterbi_blocks += 1,
            BlockOutcome::Hybrid { .. } => summary.hybrid_blocks += 1,
            BlockOutcome::Unsolved => {
                if covered[b] {
                    summary.unsolved_blocks += 1;
                }
            }
        }
    }

    summary.missing_before = sample.original.iter().filter(|&&c| c == MISSING).count();
    summary.missing_after = sample.resolved.iter().filter(|&&c| c == MISSING).count();
    summary.het_after = sample.resolved.iter().filter(|&&c| c == HET).count();
    summary
}

/// Collapse per-block outcomes into ordered donor breakpoint intervals.
fn donor_intervals(
    store: &GenotypeStore,
    panels: &[AlignedDonors],
    sample: &ImputedSample,
) -> Vec<DonorInterval> {
    let sites = store.sites();
    let mut out: Vec<DonorInterval> = Vec::new();
    let mut open: Option<(DonorIdx, DonorIdx, usize, usize, usize)> = None; // d1, d2, panel, first block, last block

    let panel_of_block = |b: usize| panels.iter().position(|p| p.block_range().contains(&b));

    for (b, outcome) in sample.outcomes.iter().enumerate() {
        let donors = match outcome {
            BlockOutcome::Inbred { donor } => Some((*donor, *donor)),
            BlockOutcome::Viterbi { donor1, donor2, .. } => Some((*donor1, *donor2)),
            BlockOutcome::Hybrid { donor1, donor2 } => Some((*donor1, *donor2)),
            BlockOutcome::Unsolved => None,
        };
        let panel = donors.and_then(|_| panel_of_block(b));
        match (donors, panel) {
            (Some((d1, d2)), Some(p)) => match open {
                Some((o1, o2, op, first, _)) if o1 == d1 && o2 == d2 && op == p => {
                    open = Some((o1, o2, op, first, b));
                }
                Some(prev) => {
                    out.push(close_interval(sites, panels, prev));
                    open = Some((d1, d2, p, b, b));
                }
                None => open = Some((d1, d2, p, b, b)),
            },
            _ => {
                if let Some(prev) = open.take() {
                    out.push(close_interval(sites, panels, prev));
                }
            }
        }
    }
    if let Some(prev) = open {
        out.push(close_interval(sites, panels, prev));
    }
    out
}

fn close_interval(
    sites: &crate::data::SiteMap,
    panels: &[AlignedDonors],
    (d1, d2, panel, first_block, last_block): (DonorIdx, DonorIdx, usize, usize, usize),
) -> DonorInterval {
    let seg = panels[panel].site_range();
    let start_site = (first_block * crate::data::SITES_PER_BLOCK).max(seg.start);
    let end_site = ((last_block + 1) * crate::data::SITES_PER_BLOCK).min(seg.end) - 1;
    DonorInterval {
        start_pos: sites.position(start_site),
        end_pos: sites.position(end_site),
        donor1: panels[panel].name(d1).to_string(),
        donor2: panels[panel].name(d2).to_string(),
    }
}
