//! # Per-Taxon Imputation Worker
//!
//! One worker owns one sample from start to finish. For each donor panel it
//! runs an ordered cascade of attempts, first over the whole segment, then
//! per focus block:
//!
//! 1. **Whole-segment**: a single donor (or a donor pair decoded by the
//!    phase resolver) that explains the entire segment at once.
//! 2. **Per-block inbred**: copy the best single donor's calls when its
//!    window error rate clears the inbred ceiling.
//! 3. **Per-block Viterbi**: donor pairs drawn from the inbred stage's top
//!    hypotheses, phased by the HMM.
//! 4. **Per-block smash**: widened pair search without the phasing
//!    constraint, trading precision for recall.
//!
//! First success wins; a block that survives every stage keeps its original
//! calls untouched. All writes go to a private `ImputedSample` buffer;
//! workers never share mutable state.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::data::store::{HET, HOM_MAJOR, HOM_MINOR, MISSING};
use crate::data::{AlignedDonors, DonorIdx, GenotypeStore, TaxonIdx, SITES_PER_BLOCK};
use crate::model::distance::DistanceTable;
use crate::model::hmm::{state_to_class, PhasedDecode, ViterbiPhaseResolver};
use crate::model::params::ImputationParams;
use crate::model::ranker::DonorHypothesisRanker;

/// How one block was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    Unsolved,
    Inbred {
        donor: DonorIdx,
    },
    Viterbi {
        donor1: DonorIdx,
        donor2: DonorIdx,
        /// 1-based rank of the pair hypothesis that was decoded
        rank: usize,
        used_reverse: bool,
    },
    Hybrid {
        donor1: DonorIdx,
        donor2: DonorIdx,
    },
}

impl BlockOutcome {
    pub fn is_solved(&self) -> bool {
        !matches!(self, BlockOutcome::Unsolved)
    }
}

/// Private per-sample output buffer. Created at worker start, installed into
/// the output matrix by the orchestrator at worker end, then discarded.
#[derive(Clone, Debug)]
pub struct ImputedSample {
    pub taxon: TaxonIdx,
    /// The sample's calls as loaded (possibly missing)
    pub original: Vec<u8>,
    /// Donor estimate per site, `MISSING` where no stage produced one
    pub estimate: Vec<u8>,
    /// Original merged with the estimate under the merge rule
    pub resolved: Vec<u8>,
    /// Per block: signed 1-based rank of the hypothesis used; negative when
    /// the reverse Viterbi path supplied the call, zero when unsolved
    pub change_history: Vec<i32>,
    /// Per-block outcome tags
    pub outcomes: Vec<BlockOutcome>,
    /// At least one panel was resolved whole in the segment stage
    pub segment_solved: bool,
    pub blocks_solved: usize,
    /// The run deadline expired while this sample was in flight
    pub timed_out: bool,
}

/// Coarse wall-clock deadline shared by all workers.
///
/// Checked between cascade units only; there is no mid-decode cancellation.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    end: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { end: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            end: Some(Instant::now() + timeout),
        }
    }

    pub fn expired(&self) -> bool {
        match self.end {
            Some(end) => Instant::now() >= end,
            None => false,
        }
    }
}

/// Combine a known call with a donor estimate.
///
/// Imputation fills gaps; it never overrules an observed call. The single
/// exception is undercall resolution: an observed homozygote may be
/// upgraded to heterozygous when the estimate is het, both alleles of which
/// include the observed one.
pub fn merge_call(known: u8, estimate: u8, smash_mode: bool, resolve_undercall: bool) -> u8 {
    if estimate == MISSING {
        return known;
    }
    if known == MISSING {
        if estimate == HET && smash_mode {
            return MISSING;
        }
        return estimate;
    }
    if resolve_undercall
        && !smash_mode
        && estimate == HET
        && (known == HOM_MAJOR || known == HOM_MINOR)
    {
        return HET;
    }
    known
}

/// Combine the two donors' calls at a site into a heterozygous-state
/// estimate
fn combine_donor_calls(d1c: u8, d2c: u8) -> u8 {
    if d1c == MISSING || d2c == MISSING {
        MISSING
    } else if d1c == d2c {
        d1c
    } else {
        HET
    }
}

/// The per-sample cascade driver.
pub struct TaxonImputationWorker<'a> {
    store: &'a GenotypeStore,
    panels: &'a [AlignedDonors],
    params: &'a ImputationParams,
    deadline: Deadline,
}

impl<'a> TaxonImputationWorker<'a> {
    pub fn new(
        store: &'a GenotypeStore,
        panels: &'a [AlignedDonors],
        params: &'a ImputationParams,
        deadline: Deadline,
    ) -> Self {
        Self {
            store,
            panels,
            params,
            deadline,
        }
    }

    /// Run the full cascade for one taxon.
    pub fn run(&self, taxon: TaxonIdx) -> ImputedSample {
        let n_sites = self.store.n_sites();
        let n_blocks = self.store.n_blocks();
        let original = self.store.decode_taxon(taxon);
        let mut sample = ImputedSample {
            taxon,
            resolved: original.clone(),
            original,
            estimate: vec![MISSING; n_sites],
            change_history: vec![0; n_blocks],
            outcomes: vec![BlockOutcome::Unsolved; n_blocks],
            segment_solved: false,
            blocks_solved: 0,
            timed_out: false,
        };

        for panel in self.panels {
            if self.deadline.expired() {
                sample.timed_out = true;
                break;
            }
            self.impute_panel(taxon, panel, &mut sample);
        }

        sample.blocks_solved = sample.outcomes.iter().filter(|o| o.is_solved()).count();
        sample
    }

    fn impute_panel(&self, taxon: TaxonIdx, panel: &AlignedDonors, sample: &mut ImputedSample) {
        let table = DistanceTable::build(self.store, panel, taxon);
        let ranker =
            DonorHypothesisRanker::new(self.store, panel, &table, self.params, taxon);
        let resolver = ViterbiPhaseResolver::new(self.store, panel, self.params);

        if self.try_whole_segment(taxon, panel, &ranker, &resolver, sample) {
            sample.segment_solved = true;
            debug!(taxon = taxon.0, "segment solved whole");
            return;
        }

        for block in panel.block_range() {
            if self.deadline.expired() {
                sample.timed_out = true;
                return;
            }
            if sample.outcomes[block].is_solved() {
                continue;
            }
            self.impute_block(taxon, panel, &ranker, &resolver, block, sample);
        }
    }

    /// Stage 1: try to explain the entire panel segment in one step.
    fn try_whole_segment(
        &self,
        taxon: TaxonIdx,
        panel: &AlignedDonors,
        ranker: &DonorHypothesisRanker,
        resolver: &ViterbiPhaseResolver,
        sample: &mut ImputedSample,
    ) -> bool {
        let blocks = panel.block_range();
        let (first, last) = (blocks.start, blocks.end - 1);
        let seg = panel.site_range();

        // A single donor covering the whole segment.
        if self.params.enable_inbred_search {
            let ranked = ranker.best_inbred_donors(first, first, last);
            if let Some(best) = ranked.first() {
                if best.error_rate < self.params.maximum_inbred_error {
                    let donor = best.donor1;
                    self.apply_estimate(sample, seg.clone(), |s| panel.class(donor, s));
                    for b in blocks.clone() {
                        sample.outcomes[b] = BlockOutcome::Inbred { donor };
                        sample.change_history[b] = 1;
                    }
                    return true;
                }
            }
        }

        if !self.params.enable_hybrid_search {
            return false;
        }

        // Globally most frequent single donors across the segment's blocks
        // form the pair-candidate set.
        let mut freq = vec![0u32; panel.n_donors()];
        for b in blocks.clone() {
            for hyp in ranker.best_inbred_donors(b, b, b) {
                freq[hyp.donor1.as_usize()] += 1;
            }
        }
        let mut by_freq: Vec<usize> = (0..panel.n_donors()).filter(|&d| freq[d] > 0).collect();
        by_freq.sort_by_key(|&d| (std::cmp::Reverse(freq[d]), d));
        by_freq.truncate(self.params.max_donor_hypotheses);
        let set: Vec<DonorIdx> = by_freq.into_iter().map(|d| DonorIdx::new(d as u32)).collect();
        if set.is_empty() {
            return false;
        }

        let pairs = ranker.best_hybrid_donors(&set, &set, first, first, last, true);
        let best = match pairs.first() {
            Some(h) if h.error_rate < self.params.max_hybrid_error_rate => h,
            _ => return false,
        };
        match resolver.resolve(taxon, best.donor1, best.donor2, seg.clone()) {
            Some(decode) => {
                self.apply_decode(sample, panel, best.donor1, best.donor2, &decode, seg);
                let sign = if decode.used_reverse { -1 } else { 1 };
                for b in blocks {
                    sample.outcomes[b] = BlockOutcome::Viterbi {
                        donor1: best.donor1,
                        donor2: best.donor2,
                        rank: 1,
                        used_reverse: decode.used_reverse,
                    };
                    sample.change_history[b] = sign;
                }
                true
            }
            None => false,
        }
    }

    /// Stages 2-4 for one focus block.
    fn impute_block(
        &self,
        taxon: TaxonIdx,
        panel: &AlignedDonors,
        ranker: &DonorHypothesisRanker,
        resolver: &ViterbiPhaseResolver,
        block: usize,
        sample: &mut ImputedSample,
    ) {
        let (ws, we) = ranker.widen_window(block);
        let block_sites = self.block_sites(panel, block);
        let window_sites = self.window_sites(panel, ws, we);
        let inbred = ranker.best_inbred_donors(block, ws, we);

        // Stage 2: single donor.
        if self.params.enable_inbred_search {
            if let Some(best) = inbred.first() {
                if best.error_rate < self.params.maximum_inbred_error {
                    let donor = best.donor1;
                    self.apply_estimate(sample, block_sites.clone(), |s| panel.class(donor, s));
                    sample.outcomes[block] = BlockOutcome::Inbred { donor };
                    sample.change_history[block] = 1;
                    return;
                }
            }
        }

        if !self.params.enable_hybrid_search {
            return;
        }

        // Stage 3: Viterbi over pairs of the inbred stage's donors.
        let mut set: Vec<DonorIdx> = inbred.iter().map(|h| h.donor1).collect();
        set.sort();
        set.dedup();
        if !set.is_empty() {
            let pairs = ranker.best_hybrid_donors(&set, &set, block, ws, we, true);
            for (i, hyp) in pairs.iter().enumerate() {
                if hyp.error_rate >= self.params.max_error_rate_for_focus_viterbi {
                    break;
                }
                if let Some(decode) =
                    resolver.resolve(taxon, hyp.donor1, hyp.donor2, window_sites.clone())
                {
                    self.apply_decode(
                        sample,
                        panel,
                        hyp.donor1,
                        hyp.donor2,
                        &decode,
                        block_sites.clone(),
                    );
                    let rank = i + 1;
                    sample.change_history[block] =
                        if decode.used_reverse { -(rank as i32) } else { rank as i32 };
                    sample.outcomes[block] = BlockOutcome::Viterbi {
                        donor1: hyp.donor1,
                        donor2: hyp.donor2,
                        rank,
                        used_reverse: decode.used_reverse,
                    };
                    return;
                }
            }
        }

        // Stage 4: smash. Widened pair search over all donors, no phasing.
        let all = ranker.all_donors();
        let pairs = ranker.best_hybrid_donors(&all, &all, block, ws, we, false);
        if let Some(best) = pairs.first() {
            if best.error_rate < self.params.max_hybrid_error_rate {
                let (d1, d2) = (best.donor1, best.donor2);
                self.apply_estimate(sample, block_sites, |s| {
                    combine_donor_calls(panel.class(d1, s), panel.class(d2, s))
                });
                sample.outcomes[block] = BlockOutcome::Hybrid {
                    donor1: d1,
                    donor2: d2,
                };
                sample.change_history[block] = 1;
            }
        }
        // Otherwise the block stays unsolved and keeps its original calls.
    }

    /// Write a donor estimate over `sites`, merging into the resolved row.
    fn apply_estimate(
        &self,
        sample: &mut ImputedSample,
        sites: std::ops::Range<usize>,
        estimate: impl Fn(usize) -> u8,
    ) {
        for s in sites {
            let est = estimate(s);
            if est != MISSING {
                sample.estimate[s] = est;
            }
            sample.resolved[s] = merge_call(
                sample.original[s],
                est,
                self.params.smash_mode,
                self.params.resolve_het_if_undercalled,
            );
        }
    }

    /// Project a phased decode onto genotype calls over `sites`.
    ///
    /// Each site takes the state of the nearest informative site at or
    /// before it (the first state before that): donor1's call in state
    /// class homA, donor2's in class homB, their combination for het
    /// classes.
    fn apply_decode(
        &self,
        sample: &mut ImputedSample,
        panel: &AlignedDonors,
        donor1: DonorIdx,
        donor2: DonorIdx,
        decode: &PhasedDecode,
        sites: std::ops::Range<usize>,
    ) {
        self.apply_estimate(sample, sites, |s| {
            let idx = decode.sites.partition_point(|&i| i <= s);
            let state = decode.states[idx.saturating_sub(1)];
            match state_to_class(state) {
                HOM_MAJOR => panel.class(donor1, s),
                HOM_MINOR => panel.class(donor2, s),
                _ => combine_donor_calls(panel.class(donor1, s), panel.class(donor2, s)),
            }
        });
    }

    /// Sites of `block` that fall inside the panel's segment
    fn block_sites(&self, panel: &AlignedDonors, block: usize) -> std::ops::Range<usize> {
        let seg = panel.site_range();
        let start = (block * SITES_PER_BLOCK).max(seg.start);
        let end = ((block + 1) * SITES_PER_BLOCK).min(seg.end);
        start..end.max(start)
    }

    /// Sites of the inclusive block window, clipped to the panel
    fn window_sites(&self, panel: &AlignedDonors, ws: usize, we: usize) -> std::ops::Range<usize> {
        let seg = panel.site_range();
        let start = (ws * SITES_PER_BLOCK).max(seg.start);
        let end = ((we + 1) * SITES_PER_BLOCK).min(seg.end);
        start..end.max(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::site::{Site, SiteMap};
    use crate::data::AlignedDonors;

    fn make_store(rows: &[Vec<u8>], names: &[&str]) -> GenotypeStore {
        let n = rows[0].len();
        let sites: Vec<Site> = (0..n)
            .map(|i| Site {
                position: (i as u64) * 100 + 1,
                major: b'A',
                minor: b'C',
            })
            .collect();
        GenotypeStore::from_classes(
            SiteMap::new("chr1", sites).unwrap(),
            names.iter().map(|s| s.to_string()).collect(),
            rows,
        )
        .unwrap()
    }

    #[test]
    fn test_merge_rule_table() {
        // missing + hom -> adopt
        assert_eq!(merge_call(MISSING, HOM_MAJOR, false, false), HOM_MAJOR);
        assert_eq!(merge_call(MISSING, HOM_MINOR, true, false), HOM_MINOR);
        // missing + het: smash suppresses, otherwise adopt
        assert_eq!(merge_call(MISSING, HET, true, false), MISSING);
        assert_eq!(merge_call(MISSING, HET, false, false), HET);
        // undercall upgrade only with the flag, smash off
        assert_eq!(merge_call(HOM_MAJOR, HET, false, true), HET);
        assert_eq!(merge_call(HOM_MINOR, HET, false, true), HET);
        assert_eq!(merge_call(HOM_MAJOR, HET, false, false), HOM_MAJOR);
        assert_eq!(merge_call(HOM_MAJOR, HET, true, true), HOM_MAJOR);
        // present calls are never overwritten by hom estimates
        assert_eq!(merge_call(HOM_MAJOR, HOM_MINOR, false, true), HOM_MAJOR);
        assert_eq!(merge_call(HET, HOM_MAJOR, false, true), HET);
        // no estimate, no change
        assert_eq!(merge_call(HOM_MINOR, MISSING, false, true), HOM_MINOR);
    }

    #[test]
    fn test_merge_rule_idempotent() {
        // Re-merging a resolved call with the same estimate changes nothing.
        for known in [MISSING, HOM_MAJOR, HET, HOM_MINOR] {
            for est in [MISSING, HOM_MAJOR, HET, HOM_MINOR] {
                for smash in [false, true] {
                    for undercall in [false, true] {
                        let once = merge_call(known, est, smash, undercall);
                        let twice = merge_call(once, est, smash, undercall);
                        assert_eq!(once, twice);
                    }
                }
            }
        }
    }

    #[test]
    fn test_inbred_block_solve_fills_missing() {
        let n = 128;
        // Target matches donor A where called, with a missing stretch.
        let mut target: Vec<u8> = (0..n)
            .map(|i| if i % 2 == 0 { HOM_MAJOR } else { HOM_MINOR })
            .collect();
        let donor_a: Vec<u8> = target.clone();
        let donor_b: Vec<u8> = target
            .iter()
            .map(|&c| if c == HOM_MAJOR { HOM_MINOR } else { HOM_MAJOR })
            .collect();
        for s in 30..50 {
            target[s] = MISSING;
        }
        let store = make_store(&[target], &["T"]);
        let panel_store = make_store(&[donor_a.clone(), donor_b], &["DA", "DB"]);
        let panel = AlignedDonors::build(store.sites(), &panel_store).unwrap();
        let params = ImputationParams::default();

        let worker =
            TaxonImputationWorker::new(&store, std::slice::from_ref(&panel), &params, Deadline::none());
        let sample = worker.run(TaxonIdx::new(0));

        assert!(sample.segment_solved);
        assert!(sample.outcomes.iter().all(|o| o.is_solved()));
        for s in 30..50 {
            assert_eq!(sample.resolved[s], donor_a[s]);
        }
        // Observed calls untouched.
        for s in 0..30 {
            assert_eq!(sample.resolved[s], sample.original[s]);
        }
    }

    #[test]
    fn test_unsolvable_sample_keeps_original_calls() {
        let n = 128;
        // Target disagrees with every donor everywhere it is called.
        let target: Vec<u8> = (0..n)
            .map(|i| if i % 3 == 0 { MISSING } else { HOM_MINOR })
            .collect();
        let donor = vec![HOM_MAJOR; n];
        let store = make_store(&[target.clone()], &["T"]);
        let panel_store = make_store(&[donor], &["DA"]);
        let panel = AlignedDonors::build(store.sites(), &panel_store).unwrap();
        let params = ImputationParams::default();

        let worker =
            TaxonImputationWorker::new(&store, std::slice::from_ref(&panel), &params, Deadline::none());
        let sample = worker.run(TaxonIdx::new(0));

        assert!(!sample.segment_solved);
        assert_eq!(sample.blocks_solved, 0);
        assert_eq!(sample.resolved, target);
        assert!(sample.change_history.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_expired_deadline_emits_unresolved() {
        let n = 64;
        let target = vec![MISSING; n];
        let donor = vec![HOM_MAJOR; n];
        let store = make_store(&[target.clone()], &["T"]);
        let panel_store = make_store(&[donor], &["DA"]);
        let panel = AlignedDonors::build(store.sites(), &panel_store).unwrap();
        let params = ImputationParams::default();

        let worker = TaxonImputationWorker::new(
            &store,
            std::slice::from_ref(&panel),
            &params,
            Deadline::after(Duration::from_secs(0)),
        );
        let sample = worker.run(TaxonIdx::new(0));
        assert!(sample.timed_out);
        assert_eq!(sample.resolved, target);
    }
}
