//! # Word-Packed Genotype Store
//!
//! Taxa × sites diploid genotype matrix backed by two bit planes per taxon:
//! major-allele presence and minor-allele presence, packed 64 sites per word.
//!
//! Encoding invariants (relied on by all distance math):
//! - a site is **missing** iff neither bit is set
//! - a site is **heterozygous** iff both bits are set
//!
//! The raw `&[u64]` word accessors are the interface the distance engine
//! consumes; one word covers one 64-site block.

use bitvec::prelude::*;

use crate::data::site::{SiteMap, TaxonIdx, SITES_PER_BLOCK};
use crate::error::{HaplofillError, Result};

/// Genotype class: homozygous for the major allele
pub const HOM_MAJOR: u8 = 0;
/// Genotype class: heterozygous
pub const HET: u8 = 1;
/// Genotype class: homozygous for the minor allele
pub const HOM_MINOR: u8 = 2;
/// Genotype class: unknown / uncalled
pub const MISSING: u8 = 255;

/// Decode a (major-present, minor-present) bit pair to a genotype class
#[inline]
pub fn class_from_bits(maj: bool, min: bool) -> u8 {
    match (maj, min) {
        (false, false) => MISSING,
        (true, false) => HOM_MAJOR,
        (false, true) => HOM_MINOR,
        (true, true) => HET,
    }
}

/// Encode a genotype class to its (major-present, minor-present) bit pair
#[inline]
pub fn bits_from_class(class: u8) -> (bool, bool) {
    match class {
        HOM_MAJOR => (true, false),
        HET => (true, true),
        HOM_MINOR => (false, true),
        _ => (false, false),
    }
}

/// Immutable word-packed genotype matrix.
///
/// Bit planes are padded to a whole number of 64-bit words so that
/// `major_words`/`minor_words` always return exactly `n_blocks` words; the
/// pad bits beyond the last site are zero (missing) and contribute nothing
/// to any popcount.
#[derive(Clone, Debug)]
pub struct GenotypeStore {
    sites: SiteMap,
    taxa: Vec<String>,
    maj: Vec<BitVec<u64, Lsb0>>,
    min: Vec<BitVec<u64, Lsb0>>,
}

impl GenotypeStore {
    /// Build a store from per-taxon genotype class rows.
    ///
    /// Every row must have exactly `sites.len()` entries.
    pub fn from_classes(sites: SiteMap, taxa: Vec<String>, rows: &[Vec<u8>]) -> Result<Self> {
        if rows.len() != taxa.len() {
            return Err(HaplofillError::invalid_data(format!(
                "{} taxa named but {} genotype rows supplied",
                taxa.len(),
                rows.len()
            )));
        }
        let n_sites = sites.len();
        let n_bits = sites.n_blocks() * SITES_PER_BLOCK;
        let mut maj = Vec::with_capacity(rows.len());
        let mut min = Vec::with_capacity(rows.len());
        for (t, row) in rows.iter().enumerate() {
            if row.len() != n_sites {
                return Err(HaplofillError::invalid_data(format!(
                    "taxon {} has {} calls, expected {}",
                    taxa[t],
                    row.len(),
                    n_sites
                )));
            }
            let mut mj = bitvec![u64, Lsb0; 0; n_bits];
            let mut mn = bitvec![u64, Lsb0; 0; n_bits];
            for (s, &class) in row.iter().enumerate() {
                let (mb, nb) = bits_from_class(class);
                if mb {
                    mj.set(s, true);
                }
                if nb {
                    mn.set(s, true);
                }
            }
            maj.push(mj);
            min.push(mn);
        }
        Ok(Self {
            sites,
            taxa,
            maj,
            min,
        })
    }

    pub fn sites(&self) -> &SiteMap {
        &self.sites
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn taxon_name(&self, taxon: TaxonIdx) -> &str {
        &self.taxa[taxon.as_usize()]
    }

    pub fn n_taxa(&self) -> usize {
        self.taxa.len()
    }

    pub fn n_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn n_blocks(&self) -> usize {
        self.sites.n_blocks()
    }

    /// Major-presence words for one taxon (one word per 64-site block)
    #[inline]
    pub fn major_words(&self, taxon: TaxonIdx) -> &[u64] {
        self.maj[taxon.as_usize()].as_raw_slice()
    }

    /// Minor-presence words for one taxon
    #[inline]
    pub fn minor_words(&self, taxon: TaxonIdx) -> &[u64] {
        self.min[taxon.as_usize()].as_raw_slice()
    }

    /// Genotype class at one site
    #[inline]
    pub fn genotype(&self, taxon: TaxonIdx, site: usize) -> u8 {
        let t = taxon.as_usize();
        class_from_bits(self.maj[t][site], self.min[t][site])
    }

    /// Decode one taxon's full row back to genotype classes
    pub fn decode_taxon(&self, taxon: TaxonIdx) -> Vec<u8> {
        (0..self.n_sites())
            .map(|s| self.genotype(taxon, s))
            .collect()
    }

    /// Replace one taxon's row in place
    pub fn set_taxon_row(&mut self, taxon: TaxonIdx, classes: &[u8]) -> Result<()> {
        if classes.len() != self.n_sites() {
            return Err(HaplofillError::invalid_data(format!(
                "row length {} does not match site count {}",
                classes.len(),
                self.n_sites()
            )));
        }
        let t = taxon.as_usize();
        for (s, &class) in classes.iter().enumerate() {
            let (mb, nb) = bits_from_class(class);
            self.maj[t].set(s, mb);
            self.min[t].set(s, nb);
        }
        Ok(())
    }

    /// Per-block popcounts of (major, minor) presence bits for one taxon.
    ///
    /// The window-widening search consumes these to measure local
    /// information content.
    pub fn block_allele_counts(&self, taxon: TaxonIdx) -> Vec<(u32, u32)> {
        let maj = self.major_words(taxon);
        let min = self.minor_words(taxon);
        maj.iter()
            .zip(min.iter())
            .map(|(&m, &n)| (m.count_ones(), n.count_ones()))
            .collect()
    }
}
