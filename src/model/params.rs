//! # Search and Decoder Parameters
//!
//! Pure data struct for the algorithm knobs shared by the ranker, the phase
//! resolver, and the per-taxon cascade. Built from the CLI `Config` for the
//! binary, or directly for library use.

use crate::error::{HaplofillError, Result};

/// Tunable parameters of the donor-search-and-HMM engine.
#[derive(Clone, Debug)]
pub struct ImputationParams {
    /// Minimum minor-allele-bit count a search window must accumulate
    pub min_minor_count_per_window: u32,

    /// A window is also wide enough once its major-allele-bit count reaches
    /// `major_minor_ratio * min_minor_count_per_window`
    pub major_minor_ratio: u32,

    /// Error-rate ceiling for accepting a single-donor (inbred) hypothesis
    pub maximum_inbred_error: f64,

    /// Error-rate ceiling for accepting a donor-pair hypothesis
    pub max_hybrid_error_rate: f64,

    /// Error-rate ceiling for the per-block Viterbi stage. Deliberately
    /// looser than the inbred ceiling because far fewer sites are compared.
    pub max_error_rate_for_focus_viterbi: f64,

    /// Maximum hypotheses retained per search window
    pub max_donor_hypotheses: usize,

    /// Minimum tested sites below which a hypothesis is discarded
    pub min_test_sites: u32,

    /// Try the single-donor stage of the cascade
    pub enable_inbred_search: bool,

    /// Try the donor-pair stages of the cascade
    pub enable_hybrid_search: bool,

    /// Smash mode: widened, unphased pair search; heterozygous donor
    /// estimates are not written into missing calls
    pub smash_mode: bool,

    /// Upgrade an observed homozygote to heterozygous when the accepted
    /// donor estimate is heterozygous (undercall resolution)
    pub resolve_het_if_undercalled: bool,

    /// Decode with both forward and reverse Viterbi and reconcile;
    /// forward-only when disabled
    pub bidirectional_viterbi: bool,
}

impl Default for ImputationParams {
    fn default() -> Self {
        Self {
            min_minor_count_per_window: 20,
            major_minor_ratio: 10,
            maximum_inbred_error: 0.01,
            max_hybrid_error_rate: 0.003,
            max_error_rate_for_focus_viterbi: 0.2,
            max_donor_hypotheses: 20,
            min_test_sites: 20,
            enable_inbred_search: true,
            enable_hybrid_search: true,
            smash_mode: false,
            resolve_het_if_undercalled: false,
            bidirectional_viterbi: true,
        }
    }
}

impl ImputationParams {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("maximum_inbred_error", self.maximum_inbred_error),
            ("max_hybrid_error_rate", self.max_hybrid_error_rate),
            (
                "max_error_rate_for_focus_viterbi",
                self.max_error_rate_for_focus_viterbi,
            ),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(HaplofillError::config(format!(
                    "{} must be in [0, 1], got {}",
                    name, v
                )));
            }
        }
        if self.max_donor_hypotheses == 0 {
            return Err(HaplofillError::config(
                "max_donor_hypotheses must be at least 1",
            ));
        }
        if self.min_test_sites == 0 {
            return Err(HaplofillError::config("min_test_sites must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ImputationParams::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rates_rejected() {
        let mut p = ImputationParams::default();
        p.maximum_inbred_error = 1.5;
        assert!(p.validate().is_err());

        let mut p = ImputationParams::default();
        p.max_donor_hypotheses = 0;
        assert!(p.validate().is_err());
    }
}
