//! # Run Statistics
//!
//! Per-sample summaries of how the cascade resolved each block, and the
//! accuracy counters fed by the optional mask-and-recheck pass. Workers fill
//! these privately; the orchestrator merges them after the pool drains, so
//! no counter is ever shared between threads.

/// Accuracy tallies from comparing re-imputed calls against masked truth.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccuracyCounts {
    /// Masked calls re-imputed to the original class
    pub correct: u64,
    /// Masked calls re-imputed to a different class
    pub incorrect: u64,
    /// Masked calls the cascade left missing
    pub unresolved: u64,
}

impl AccuracyCounts {
    pub fn merge(mut self, other: Self) -> Self {
        self.correct += other.correct;
        self.incorrect += other.incorrect;
        self.unresolved += other.unresolved;
        self
    }

    pub fn imputed(&self) -> u64 {
        self.correct + self.incorrect
    }

    /// Error rate among calls that were actually imputed
    pub fn error_rate(&self) -> f64 {
        let imputed = self.imputed();
        if imputed == 0 {
            0.0
        } else {
            self.incorrect as f64 / imputed as f64
        }
    }
}

/// How one sample fared through the cascade.
#[derive(Clone, Debug, Default)]
pub struct SampleSummary {
    pub taxon: String,
    /// 1 when the segment stage resolved at least one panel whole
    pub segments_solved: usize,
    pub inbred_blocks: usize,
    pub viterbi_blocks: usize,
    pub hybrid_blocks: usize,
    pub unsolved_blocks: usize,
    pub n_sites: usize,
    pub missing_before: usize,
    pub missing_after: usize,
    pub het_after: usize,
    /// Sample hit the run deadline and was emitted unresolved
    pub timed_out: bool,
}

impl SampleSummary {
    pub fn proportion_missing(&self) -> f64 {
        if self.n_sites == 0 {
            0.0
        } else {
            self.missing_after as f64 / self.n_sites as f64
        }
    }

    pub fn proportion_het(&self) -> f64 {
        if self.n_sites == 0 {
            0.0
        } else {
            self.het_after as f64 / self.n_sites as f64
        }
    }

    /// One-line textual report for the run log
    pub fn report_line(&self) -> String {
        format!(
            "{}: segments={} inbred={} viterbi={} hybrid={} unsolved={} \
             missing {:.4}->{:.4} het={:.4}{}",
            self.taxon,
            self.segments_solved,
            self.inbred_blocks,
            self.viterbi_blocks,
            self.hybrid_blocks,
            self.unsolved_blocks,
            self.missing_before as f64 / self.n_sites.max(1) as f64,
            self.proportion_missing(),
            self.proportion_het(),
            if self.timed_out { " [timed out]" } else { "" }
        )
    }
}

/// Aggregate view over all samples of a run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub samples: Vec<SampleSummary>,
    pub accuracy: AccuracyCounts,
}

impl RunSummary {
    pub fn total_unsolved_blocks(&self) -> usize {
        self.samples.iter().map(|s| s.unsolved_blocks).sum()
    }

    pub fn total_timed_out(&self) -> usize {
        self.samples.iter().filter(|s| s.timed_out).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_merge_and_rate() {
        let a = AccuracyCounts {
            correct: 90,
            incorrect: 10,
            unresolved: 5,
        };
        let b = AccuracyCounts {
            correct: 10,
            incorrect: 0,
            unresolved: 1,
        };
        let merged = a.merge(b);
        assert_eq!(merged.correct, 100);
        assert_eq!(merged.imputed(), 110);
        assert!((merged.error_rate() - 10.0 / 110.0).abs() < 1e-12);

        assert_eq!(AccuracyCounts::default().error_rate(), 0.0);
    }

    #[test]
    fn test_summary_proportions() {
        let s = SampleSummary {
            taxon: "T1".to_string(),
            n_sites: 200,
            missing_before: 50,
            missing_after: 10,
            het_after: 20,
            ..Default::default()
        };
        assert!((s.proportion_missing() - 0.05).abs() < 1e-12);
        assert!((s.proportion_het() - 0.1).abs() < 1e-12);
        assert!(s.report_line().contains("T1"));
    }
}
