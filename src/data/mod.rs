//! # Data Module
//!
//! In-memory representations of genotype data.
//!
//! ## Design Philosophy
//! - **Word-packed planes:** genotypes live in per-taxon major/minor
//!   presence bit planes, 64 sites per word, so every distance is a handful
//!   of AND/OR/popcount operations.
//! - **Zero-cost newtypes:** `TaxonIdx` and `DonorIdx` prevent index bugs at
//!   compile time with no runtime overhead.
//! - **Load-once panels:** donor panels are aligned and polarity-resolved a
//!   single time, then shared read-only across all workers.

pub mod donor;
pub mod site;
pub mod store;

pub use donor::{realign_words, AlignedDonors};
pub use site::{DonorIdx, Site, SiteMap, TaxonIdx, SITES_PER_BLOCK};
pub use store::{
    bits_from_class, class_from_bits, GenotypeStore, HET, HOM_MAJOR, HOM_MINOR, MISSING,
};
