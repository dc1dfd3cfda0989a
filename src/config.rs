//! # Configuration Logic
//!
//! CLI argument parsing and validation.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{HaplofillError, Result};
use crate::model::params::ImputationParams;

/// Fill missing diploid genotype calls from donor haplotype panels.
#[derive(Parser, Debug, Clone)]
#[command(name = "haplofill", version, about)]
pub struct Config {
    /// Target genotype matrix (plain-text format)
    #[arg(long)]
    pub gt: PathBuf,

    /// Donor panel matrix; repeat for multiple segments
    #[arg(long = "donor", required = true)]
    pub donors: Vec<PathBuf>,

    /// Output prefix; writes <out>.imputed.txt and <out>.intervals.txt
    #[arg(long)]
    pub out: PathBuf,

    /// Minimum minor-allele count per search window
    #[arg(long, default_value_t = 20)]
    pub min_minor_count: u32,

    /// Major-to-minor ratio that also satisfies the window count
    #[arg(long, default_value_t = 10)]
    pub major_minor_ratio: u32,

    /// Maximum error rate to accept a single-donor hypothesis
    #[arg(long, default_value_t = 0.01)]
    pub max_inbred_error: f64,

    /// Maximum error rate to accept a donor-pair hypothesis
    #[arg(long, default_value_t = 0.003)]
    pub max_hybrid_error: f64,

    /// Maximum error rate for the per-block Viterbi stage
    #[arg(long, default_value_t = 0.2)]
    pub max_viterbi_error: f64,

    /// Maximum donor hypotheses retained per window
    #[arg(long, default_value_t = 20)]
    pub max_donor_hypotheses: usize,

    /// Minimum tested sites for a hypothesis to count
    #[arg(long, default_value_t = 20)]
    pub min_test_sites: u32,

    /// Skip the single-donor cascade stages
    #[arg(long)]
    pub no_inbred: bool,

    /// Skip the donor-pair cascade stages
    #[arg(long)]
    pub no_hybrid: bool,

    /// Smash mode: recall-oriented pair search, het estimates not written
    #[arg(long)]
    pub smash: bool,

    /// Upgrade observed homozygotes when the donor estimate is heterozygous
    #[arg(long)]
    pub resolve_undercalls: bool,

    /// Decode forward only instead of bidirectionally
    #[arg(long)]
    pub forward_only: bool,

    /// Abandon samples still running after this many hours
    #[arg(long)]
    pub timeout_hours: Option<f64>,

    /// Mask this fraction of known calls and report re-imputation accuracy
    #[arg(long, default_value_t = 0.0)]
    pub mask_fraction: f64,

    /// Seed for the masking pass
    #[arg(long, default_value_t = 1)]
    pub mask_seed: u64,

    /// Worker threads (default: all cores)
    #[arg(long)]
    pub nthreads: Option<usize>,
}

impl Config {
    /// Parse from the process arguments and validate.
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gt.exists() {
            return Err(HaplofillError::FileNotFound {
                path: self.gt.clone(),
            });
        }
        for donor in &self.donors {
            if !donor.exists() {
                return Err(HaplofillError::FileNotFound {
                    path: donor.clone(),
                });
            }
        }
        if !(0.0..1.0).contains(&self.mask_fraction) {
            return Err(HaplofillError::config(format!(
                "mask_fraction must be in [0, 1), got {}",
                self.mask_fraction
            )));
        }
        if let Some(hours) = self.timeout_hours {
            if hours <= 0.0 {
                return Err(HaplofillError::config("timeout_hours must be positive"));
            }
        }
        self.params().validate()
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads.unwrap_or_else(num_cpus::get)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_hours
            .map(|h| Duration::from_secs_f64(h * 3600.0))
    }

    /// Algorithm parameters derived from the CLI surface
    pub fn params(&self) -> ImputationParams {
        ImputationParams {
            min_minor_count_per_window: self.min_minor_count,
            major_minor_ratio: self.major_minor_ratio,
            maximum_inbred_error: self.max_inbred_error,
            max_hybrid_error_rate: self.max_hybrid_error,
            max_error_rate_for_focus_viterbi: self.max_viterbi_error,
            max_donor_hypotheses: self.max_donor_hypotheses,
            min_test_sites: self.min_test_sites,
            enable_inbred_search: !self.no_inbred,
            enable_hybrid_search: !self.no_hybrid,
            smash_mode: self.smash,
            resolve_het_if_undercalled: self.resolve_undercalls,
            bidirectional_viterbi: !self.forward_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "haplofill",
            "--gt",
            "target.txt",
            "--donor",
            "panel.txt",
            "--out",
            "out",
        ]
    }

    #[test]
    fn test_defaults_map_to_params() {
        let config = Config::parse_from(base_args());
        let params = config.params();
        assert_eq!(params.max_donor_hypotheses, 20);
        assert_eq!(params.maximum_inbred_error, 0.01);
        assert!(params.enable_inbred_search);
        assert!(params.bidirectional_viterbi);
        assert!(!params.smash_mode);
    }

    #[test]
    fn test_flags_invert_toggles() {
        let mut args = base_args();
        args.extend(["--no-inbred", "--smash", "--forward-only"]);
        let params = Config::parse_from(args).params();
        assert!(!params.enable_inbred_search);
        assert!(params.smash_mode);
        assert!(!params.bidirectional_viterbi);
    }

    #[test]
    fn test_missing_input_fails_validation() {
        let config = Config::parse_from(base_args());
        assert!(matches!(
            config.validate(),
            Err(HaplofillError::FileNotFound { .. })
        ));
    }
}
