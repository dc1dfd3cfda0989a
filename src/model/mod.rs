//! # Model Module
//!
//! The search-and-decode algorithms: word-parallel block distances, bounded
//! top-K donor hypothesis ranking, and the multi-state Viterbi /
//! forward-backward phase resolver.

pub mod distance;
pub mod hmm;
pub mod params;
pub mod ranker;

pub use distance::{hybrid_mendel_error, inbred_block_dist, BlockDist, DistanceTable, WindowSums};
pub use hmm::{state_to_class, PhasedDecode, ViterbiPhaseResolver, MIN_INFORMATIVE_SITES, N_STATES};
pub use params::ImputationParams;
pub use ranker::{DonorHypothesis, DonorHypothesisRanker, HypothesisHeap};
