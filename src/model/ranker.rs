//! # Donor Hypothesis Ranker
//!
//! Bounded top-K ranking of single-donor and donor-pair hypotheses per
//! search window, and the focus-block window widening that adapts the tested
//! span to local information content.
//!
//! Ranking uses an explicit bounded max-heap keyed by the lexicographic
//! `(error_rate, insertion_order)` tuple, so ties between numerically equal
//! hypotheses resolve deterministically by donor scan order and no two
//! entries ever compare equal.

use std::collections::BinaryHeap;

use crate::data::{AlignedDonors, DonorIdx, GenotypeStore, TaxonIdx};
use crate::model::distance::{hybrid_mendel_error, DistanceTable};
use crate::model::params::ImputationParams;

/// A candidate explanation of a target region by one or two donors.
#[derive(Clone, Debug)]
pub struct DonorHypothesis {
    pub taxon: TaxonIdx,
    pub donor1: DonorIdx,
    pub donor2: DonorIdx,
    /// First block of the tested window (inclusive)
    pub start_block: usize,
    /// Block the widening search grew from
    pub focus_block: usize,
    /// Last block of the tested window (inclusive)
    pub end_block: usize,
    pub tested_sites: u32,
    pub mendel_errors: u32,
    pub error_rate: f64,
    /// Phased state path from the Viterbi resolver, when one was accepted
    pub phased_states: Option<Vec<u8>>,
}

impl DonorHypothesis {
    /// Single-donor hypothesis: the target is homozygous-by-descent from
    /// `donor1` over the tested range
    pub fn is_inbred(&self) -> bool {
        self.donor1 == self.donor2
    }
}

struct HeapEntry {
    rate: f64,
    seq: u64,
    hyp: DonorHypothesis,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rate
            .total_cmp(&other.rate)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Bounded collection of the K best (lowest error rate) hypotheses.
///
/// The heap is a max-heap on `(error_rate, insertion_order)`: the root is
/// always the worst retained hypothesis and is evicted when a better one
/// arrives with the heap full.
pub struct HypothesisHeap {
    cap: usize,
    seq: u64,
    heap: BinaryHeap<HeapEntry>,
}

impl HypothesisHeap {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            seq: 0,
            heap: BinaryHeap::with_capacity(cap + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, hyp: DonorHypothesis) {
        let entry = HeapEntry {
            rate: hyp.error_rate,
            seq: self.seq,
            hyp,
        };
        self.seq += 1;
        if self.heap.len() < self.cap {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry.cmp(worst) == std::cmp::Ordering::Less {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Drain into a vector ordered best-first (ascending error rate,
    /// insertion order breaking ties)
    pub fn into_ranked(self) -> Vec<DonorHypothesis> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| e.hyp)
            .collect()
    }
}

/// Per-taxon hypothesis search over one aligned donor panel.
///
/// Borrows the worker-owned distance table; nothing here is shared across
/// samples.
pub struct DonorHypothesisRanker<'a> {
    store: &'a GenotypeStore,
    donors: &'a AlignedDonors,
    table: &'a DistanceTable,
    params: &'a ImputationParams,
    taxon: TaxonIdx,
    /// Target's per-block (major, minor) presence popcounts
    block_counts: Vec<(u32, u32)>,
}

impl<'a> DonorHypothesisRanker<'a> {
    pub fn new(
        store: &'a GenotypeStore,
        donors: &'a AlignedDonors,
        table: &'a DistanceTable,
        params: &'a ImputationParams,
        taxon: TaxonIdx,
    ) -> Self {
        let block_counts = store.block_allele_counts(taxon);
        Self {
            store,
            donors,
            table,
            params,
            taxon,
            block_counts,
        }
    }

    /// Grow a tested window outward from `focus_block` until it holds
    /// enough information: either `min_minor_count_per_window` minor bits
    /// or `major_minor_ratio` times that many major bits. The shorter side
    /// is extended first; growth stops at the panel boundary.
    ///
    /// Returns the inclusive `(start_block, end_block)` window.
    pub fn widen_window(&self, focus_block: usize) -> (usize, usize) {
        let range = self.donors.block_range();
        let (lo, hi) = (range.start, range.end - 1);
        let focus = focus_block.clamp(lo, hi);
        let min_minor = self.params.min_minor_count_per_window;
        let min_major = min_minor * self.params.major_minor_ratio;

        let (mut start, mut end) = (focus, focus);
        let (mut major, mut minor) = self.block_counts[focus];
        while minor < min_minor && major < min_major {
            let left_ext = focus - start;
            let right_ext = end - focus;
            let can_left = start > lo;
            let can_right = end < hi;
            let next = if can_left && (left_ext <= right_ext || !can_right) {
                start -= 1;
                start
            } else if can_right {
                end += 1;
                end
            } else {
                break;
            };
            let (mj, mn) = self.block_counts[next];
            major += mj;
            minor += mn;
        }
        (start, end)
    }

    /// Rank single-donor hypotheses over an inclusive block window.
    pub fn best_inbred_donors(
        &self,
        focus_block: usize,
        start_block: usize,
        end_block: usize,
    ) -> Vec<DonorHypothesis> {
        let mut heap = HypothesisHeap::new(self.params.max_donor_hypotheses);
        for d in 0..self.donors.n_donors() {
            let donor = DonorIdx::new(d as u32);
            let sums = self.table.window_sums(donor, start_block, end_block);
            if sums.sites < self.params.min_test_sites {
                continue;
            }
            heap.push(DonorHypothesis {
                taxon: self.taxon,
                donor1: donor,
                donor2: donor,
                start_block,
                focus_block,
                end_block,
                tested_sites: sums.sites,
                mendel_errors: sums.diff,
                error_rate: sums.error_rate(),
                phased_states: None,
            });
        }
        heap.into_ranked()
    }

    /// Rank donor-pair hypotheses drawn from `set1 × set2` over an
    /// inclusive block window.
    ///
    /// Same-donor pairs are skipped unless `allow_self_pair`; with it, a
    /// same-donor pair is still skipped when its inbred error rate is
    /// already below the inbred acceptance ceiling, so the inbred stage is
    /// not double counted.
    pub fn best_hybrid_donors(
        &self,
        set1: &[DonorIdx],
        set2: &[DonorIdx],
        focus_block: usize,
        start_block: usize,
        end_block: usize,
        allow_self_pair: bool,
    ) -> Vec<DonorHypothesis> {
        let mut heap = HypothesisHeap::new(self.params.max_donor_hypotheses);
        for &d1 in set1 {
            for &d2 in set2 {
                if d1.0 > d2.0 {
                    continue; // unordered pairs, scan each once
                }
                if d1 == d2 {
                    if !allow_self_pair {
                        continue;
                    }
                    let inbred = self.table.window_sums(d1, start_block, end_block);
                    if inbred.error_rate() < self.params.maximum_inbred_error {
                        continue;
                    }
                }
                let (errors, tested) = self.pair_error(d1, d2, start_block, end_block);
                if tested < self.params.min_test_sites {
                    continue;
                }
                heap.push(DonorHypothesis {
                    taxon: self.taxon,
                    donor1: d1,
                    donor2: d2,
                    start_block,
                    focus_block,
                    end_block,
                    tested_sites: tested,
                    mendel_errors: errors,
                    error_rate: errors as f64 / tested as f64,
                    phased_states: None,
                });
            }
        }
        heap.into_ranked()
    }

    /// Mendelian error count for a donor pair over an inclusive window
    fn pair_error(&self, d1: DonorIdx, d2: DonorIdx, start_block: usize, end_block: usize) -> (u32, u32) {
        let t_maj = self.store.major_words(self.taxon);
        let t_min = self.store.minor_words(self.taxon);
        let d1_maj = self.donors.major_words(d1);
        let d1_min = self.donors.minor_words(d1);
        let d2_maj = self.donors.major_words(d2);
        let d2_min = self.donors.minor_words(d2);
        let mut errors = 0u32;
        let mut tested = 0u32;
        for b in start_block..=end_block {
            let (e, t) = hybrid_mendel_error(
                t_maj[b], t_min[b], d1_maj[b], d1_min[b], d2_maj[b], d2_min[b],
            );
            errors += e;
            tested += t;
        }
        (errors, tested)
    }

    /// All donor indices of the panel, in scan order
    pub fn all_donors(&self) -> Vec<DonorIdx> {
        (0..self.donors.n_donors() as u32).map(DonorIdx::new).collect()
    }
}
