//! # Viterbi Phase Resolver
//!
//! Multi-state HMM that decides, at every informative site, which donor of a
//! two-donor hypothesis the target is copying from. Five hidden states span
//! homozygous-donor1 through homozygous-donor2, with three intermediate
//! heterozygous states leaning toward one side or the other; observations
//! are the target's genotype class relative to the donor pair.
//!
//! The transition matrix is fixed, but its off-diagonals are rescaled per
//! step by the physical distance between adjacent informative sites relative
//! to the segment's mean informative-site spacing, so sparse regions switch
//! donors more readily than dense ones.
//!
//! Decoding runs Viterbi in both directions and reconciles: where the two
//! paths disagree in the first half of the informative-site list, the
//! reverse path wins; elsewhere the forward path does. This asymmetric rule
//! is a long-standing behavioral contract and is preserved as-is. A
//! forward-backward mode produces per-site posterior state probabilities
//! instead of a single path.

use std::ops::Range;

use crate::data::store::{HET, MISSING};
use crate::data::{AlignedDonors, DonorIdx, GenotypeStore, TaxonIdx};
use crate::model::params::ImputationParams;

/// Number of hidden states in the donor-pair model
pub const N_STATES: usize = 5;

/// Decodes with fewer informative sites than this are refused
pub const MIN_INFORMATIVE_SITES: usize = 10;

/// A hypothesis is refused when its non-Mendelian rate among
/// donor-agreeing sites exceeds this multiple of the inbred error ceiling
const NON_MENDEL_FACTOR: f64 = 5.0;

/// Base transition matrix. Rows sum to 1.
const TRANSITION: [[f64; N_STATES]; N_STATES] = [
    [0.999, 0.0001, 0.0003, 0.0001, 0.0005],
    [0.0002, 0.999, 0.00005, 0.00005, 0.0002],
    [0.0002, 0.00005, 0.999, 0.00005, 0.0002],
    [0.0002, 0.00005, 0.00005, 0.999, 0.0002],
    [0.0005, 0.0001, 0.0003, 0.0001, 0.999],
];

/// Emission matrix: state -> P(observed class). Columns are
/// {matches donor1, heterozygous, matches donor2}. Rows sum to 1.
const EMISSION: [[f64; 3]; N_STATES] = [
    [0.998, 0.001, 0.001],
    [0.6, 0.2, 0.2],
    [0.4, 0.2, 0.4],
    [0.2, 0.2, 0.6],
    [0.001, 0.001, 0.998],
];

/// Map a hidden state to an observed genotype class.
///
/// State 1 always maps to heterozygous; every other state maps to
/// `state / 2`, giving {0,1,2,3,4} -> {homD1, het, het, het, homD2}. Only
/// the middle state is balanced heterozygosity; its neighbors are het calls
/// leaning toward one donor.
#[inline]
pub fn state_to_class(state: u8) -> u8 {
    if state == 1 {
        HET
    } else {
        state / 2
    }
}

/// Rescale an alpha/beta vector that has drifted toward underflow.
///
/// When every entry is below 1e-50 and the maximum is below 1e-25, the
/// whole vector is multiplied by 1e25. Normalized posteriors are unchanged;
/// without this, long chromosomes silently collapse to all-zero vectors.
pub fn rescale_if_underflow(v: &mut [f64]) -> bool {
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if v.iter().all(|&x| x < 1e-50) && max < 1e-25 {
        for x in v.iter_mut() {
            *x *= 1e25;
        }
        true
    } else {
        false
    }
}

/// Scale the base transition off-diagonals for one inter-site step.
///
/// `factor` is the step's physical distance divided by the mean
/// informative-site spacing. Off-diagonals become `1-(1-p)^factor`; the
/// diagonal takes the remainder so every row still sums to 1.
fn scaled_transition(factor: f64) -> [[f64; N_STATES]; N_STATES] {
    let mut out = [[0.0; N_STATES]; N_STATES];
    for i in 0..N_STATES {
        let mut off_sum = 0.0;
        for j in 0..N_STATES {
            if i != j {
                let p = 1.0 - (1.0 - TRANSITION[i][j]).powf(factor);
                out[i][j] = p;
                off_sum += p;
            }
        }
        if off_sum >= 1.0 {
            let scale = (1.0 - 1e-9) / off_sum;
            for j in 0..N_STATES {
                if i != j {
                    out[i][j] *= scale;
                }
            }
            off_sum = 1.0 - 1e-9;
        }
        out[i][i] = 1.0 - off_sum;
    }
    out
}

/// Informative-site subsequence of one donor-pair hypothesis.
#[derive(Debug, Default)]
pub struct InformativeSites {
    /// Target site indices where the donors disagree homozygously
    pub sites: Vec<usize>,
    /// Observation class per informative site:
    /// 0 = matches donor1, 1 = het, 2 = matches donor2
    pub obs: Vec<u8>,
    /// Physical positions of the informative sites
    pub positions: Vec<u64>,
    /// Sites where both donors agree and the target is called
    pub agree_tested: u32,
    /// Of those, sites where the target contradicts the shared donor call
    pub non_mendel: u32,
}

/// Result of a successful bidirectional decode.
#[derive(Debug)]
pub struct PhasedDecode {
    /// Target site indices the states refer to
    pub sites: Vec<usize>,
    /// Hidden state per informative site
    pub states: Vec<u8>,
    /// True when reconciliation took the reverse path anywhere
    pub used_reverse: bool,
}

/// Phase resolver for donor-pair hypotheses over one panel.
pub struct ViterbiPhaseResolver<'a> {
    store: &'a GenotypeStore,
    donors: &'a AlignedDonors,
    params: &'a ImputationParams,
}

impl<'a> ViterbiPhaseResolver<'a> {
    pub fn new(
        store: &'a GenotypeStore,
        donors: &'a AlignedDonors,
        params: &'a ImputationParams,
    ) -> Self {
        Self {
            store,
            donors,
            params,
        }
    }

    /// Extract the informative-site subsequence of `sites` for a donor pair.
    ///
    /// A site is informative when target and both donors are called and the
    /// donors are opposite homozygotes; donor-agreeing sites feed the
    /// non-Mendelian tally instead, and anything else is skipped.
    pub fn collect_informative(
        &self,
        taxon: TaxonIdx,
        donor1: DonorIdx,
        donor2: DonorIdx,
        sites: Range<usize>,
    ) -> InformativeSites {
        let mut info = InformativeSites::default();
        for s in sites {
            let tc = self.store.genotype(taxon, s);
            if tc == MISSING {
                continue;
            }
            let d1c = self.donors.class(donor1, s);
            let d2c = self.donors.class(donor2, s);
            if d1c == MISSING || d2c == MISSING {
                continue;
            }
            if d1c == d2c {
                info.agree_tested += 1;
                if tc != d1c {
                    info.non_mendel += 1;
                }
                continue;
            }
            if d1c == HET || d2c == HET {
                continue;
            }
            let obs = if tc == HET {
                1
            } else if tc == d1c {
                0
            } else {
                2
            };
            info.obs.push(obs);
            info.positions.push(self.store.sites().position(s));
            info.sites.push(s);
        }
        info
    }

    /// Decode a donor-pair hypothesis over a target site range.
    ///
    /// Returns `None` (unresolved) when there are too few informative sites
    /// or the non-Mendelian rate among donor-agreeing sites is excessive;
    /// both are expected outcomes handled by the caller's cascade, not
    /// errors.
    pub fn resolve(
        &self,
        taxon: TaxonIdx,
        donor1: DonorIdx,
        donor2: DonorIdx,
        sites: Range<usize>,
    ) -> Option<PhasedDecode> {
        let info = self.collect_informative(taxon, donor1, donor2, sites);
        let factors = self.step_factors(&info)?;

        let fwd = viterbi(&info.obs, &factors);
        if !self.params.bidirectional_viterbi {
            return Some(PhasedDecode {
                sites: info.sites,
                states: fwd,
                used_reverse: false,
            });
        }

        // Reverse decode: reverse observations and step distances, decode,
        // un-reverse the output path.
        let n = info.obs.len();
        let rev_obs: Vec<u8> = info.obs.iter().rev().copied().collect();
        let rev_factors: Vec<f64> = factors.iter().rev().copied().collect();
        let mut rev = viterbi(&rev_obs, &rev_factors);
        rev.reverse();

        // Reconciliation: on disagreement in the first half of the
        // informative-site list the reverse path wins, elsewhere the
        // forward path does. Asymmetric on purpose; see module docs.
        let mut states = Vec::with_capacity(n);
        let mut used_reverse = false;
        for t in 0..n {
            if fwd[t] != rev[t] && t < n / 2 {
                states.push(rev[t]);
                used_reverse = true;
            } else {
                states.push(fwd[t]);
            }
        }
        Some(PhasedDecode {
            sites: info.sites,
            states,
            used_reverse,
        })
    }

    /// Forward-backward decode: per informative site, the normalized
    /// posterior probability of each state rather than a single path.
    ///
    /// Same admission rules as `resolve`.
    pub fn posteriors(
        &self,
        taxon: TaxonIdx,
        donor1: DonorIdx,
        donor2: DonorIdx,
        sites: Range<usize>,
    ) -> Option<(Vec<usize>, Vec<[f64; N_STATES]>)> {
        let info = self.collect_informative(taxon, donor1, donor2, sites);
        let factors = self.step_factors(&info)?;
        let n = info.obs.len();

        // Alpha pass.
        let mut alpha = vec![[0.0f64; N_STATES]; n];
        for j in 0..N_STATES {
            alpha[0][j] = EMISSION[j][info.obs[0] as usize] / N_STATES as f64;
        }
        for t in 1..n {
            let a = scaled_transition(factors[t - 1]);
            let obs = info.obs[t] as usize;
            let mut row = [0.0f64; N_STATES];
            for j in 0..N_STATES {
                let mut sum = 0.0;
                for i in 0..N_STATES {
                    sum += alpha[t - 1][i] * a[i][j];
                }
                row[j] = sum * EMISSION[j][obs];
            }
            rescale_if_underflow(&mut row);
            alpha[t] = row;
        }

        // Beta pass.
        let mut beta = vec![[0.0f64; N_STATES]; n];
        beta[n - 1] = [1.0; N_STATES];
        for t in (0..n - 1).rev() {
            let a = scaled_transition(factors[t]);
            let obs = info.obs[t + 1] as usize;
            let mut row = [0.0f64; N_STATES];
            for i in 0..N_STATES {
                let mut sum = 0.0;
                for j in 0..N_STATES {
                    sum += a[i][j] * EMISSION[j][obs] * beta[t + 1][j];
                }
                row[i] = sum;
            }
            rescale_if_underflow(&mut row);
            beta[t] = row;
        }

        // gamma[t][i] = alpha[t][i] * beta[t][i] / sum_j alpha[t][j] * beta[t][j]
        let mut gamma = vec![[0.0f64; N_STATES]; n];
        for t in 0..n {
            let mut norm = 0.0;
            for i in 0..N_STATES {
                gamma[t][i] = alpha[t][i] * beta[t][i];
                norm += gamma[t][i];
            }
            if norm > 0.0 {
                for g in gamma[t].iter_mut() {
                    *g /= norm;
                }
            }
        }
        Some((info.sites, gamma))
    }

    /// Admission rules plus per-step distance factors.
    ///
    /// The mean spacing is the chromosome span over the informative-site
    /// count, the implicit recombination-rate-per-site estimate that scales
    /// every step's transition matrix.
    fn step_factors(&self, info: &InformativeSites) -> Option<Vec<f64>> {
        let n = info.obs.len();
        if n < MIN_INFORMATIVE_SITES {
            return None;
        }
        if info.agree_tested > 0 {
            let rate = info.non_mendel as f64 / info.agree_tested as f64;
            if rate > NON_MENDEL_FACTOR * self.params.maximum_inbred_error {
                return None;
            }
        }
        let span = self.store.sites().span();
        let avg = if span == 0 {
            1.0
        } else {
            span as f64 / n as f64
        };
        Some(
            info.positions
                .windows(2)
                .map(|w| (w[1] - w[0]) as f64 / avg)
                .collect(),
        )
    }
}

/// Log-space Viterbi over the 5-state model.
///
/// `factors[t-1]` scales the transition matrix for the step into site `t`.
fn viterbi(obs: &[u8], factors: &[f64]) -> Vec<u8> {
    let n = obs.len();
    let mut delta = [0.0f64; N_STATES];
    let init = (1.0 / N_STATES as f64).ln();
    for j in 0..N_STATES {
        delta[j] = init + EMISSION[j][obs[0] as usize].ln();
    }
    let mut psi = vec![[0u8; N_STATES]; n];
    for t in 1..n {
        let a = scaled_transition(factors[t - 1]);
        let mut next = [f64::NEG_INFINITY; N_STATES];
        for j in 0..N_STATES {
            let mut best = f64::NEG_INFINITY;
            let mut arg = 0u8;
            for i in 0..N_STATES {
                let v = delta[i] + a[i][j].ln();
                if v > best {
                    best = v;
                    arg = i as u8;
                }
            }
            next[j] = best + EMISSION[j][obs[t] as usize].ln();
            psi[t][j] = arg;
        }
        delta = next;
    }

    let mut path = vec![0u8; n];
    let mut best = f64::NEG_INFINITY;
    for j in 0..N_STATES {
        if delta[j] > best {
            best = delta[j];
            path[n - 1] = j as u8;
        }
    }
    for t in (0..n - 1).rev() {
        path[t] = psi[t + 1][path[t + 1] as usize];
    }
    path
}
