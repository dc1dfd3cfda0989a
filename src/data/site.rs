//! # Sites and Index Newtypes
//!
//! Site metadata (physical position, major/minor allele codes) and the
//! zero-cost index newtypes used throughout the crate to keep taxon and
//! donor indices from being confused with one another.

use crate::error::{HaplofillError, Result};

/// Index of a taxon (sample) in the target matrix
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaxonIdx(pub u32);

impl TaxonIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index of a donor haplotype within an aligned donor panel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DonorIdx(pub u32);

impl DonorIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Number of sites packed into one storage word
pub const SITES_PER_BLOCK: usize = 64;

/// A single SNP site: physical position plus major/minor allele codes.
///
/// Allele codes are opaque u8 values (e.g. nucleotide codes); the engine only
/// ever compares them for equality when reconciling donor-panel polarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Site {
    /// Physical position in base pairs
    pub position: u64,
    /// Major allele code
    pub major: u8,
    /// Minor allele code
    pub minor: u8,
}

/// Ordered site table for one chromosome segment.
///
/// Positions are strictly increasing; this is enforced at construction and
/// relied on by the HMM transition model and the donor alignment step.
#[derive(Clone, Debug)]
pub struct SiteMap {
    chrom: String,
    sites: Vec<Site>,
}

impl SiteMap {
    pub fn new(chrom: impl Into<String>, sites: Vec<Site>) -> Result<Self> {
        for pair in sites.windows(2) {
            if pair[1].position <= pair[0].position {
                return Err(HaplofillError::invalid_data(format!(
                    "site positions not strictly increasing: {} then {}",
                    pair[0].position, pair[1].position
                )));
            }
        }
        Ok(Self {
            chrom: chrom.into(),
            sites,
        })
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    #[inline]
    pub fn site(&self, idx: usize) -> &Site {
        &self.sites[idx]
    }

    #[inline]
    pub fn position(&self, idx: usize) -> u64 {
        self.sites[idx].position
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Physical span from first to last site, in base pairs
    pub fn span(&self) -> u64 {
        match (self.sites.first(), self.sites.last()) {
            (Some(a), Some(b)) => b.position - a.position,
            _ => 0,
        }
    }

    /// Index of the site at `position`, if present
    pub fn find_position(&self, position: u64) -> Option<usize> {
        self.sites
            .binary_search_by_key(&position, |s| s.position)
            .ok()
    }

    /// Number of 64-site blocks covering this map
    pub fn n_blocks(&self) -> usize {
        self.sites.len().div_ceil(SITES_PER_BLOCK)
    }

    /// Site index range covered by `block` (clamped to the last site)
    pub fn block_sites(&self, block: usize) -> std::ops::Range<usize> {
        let start = block * SITES_PER_BLOCK;
        let end = ((block + 1) * SITES_PER_BLOCK).min(self.sites.len());
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(pos: u64) -> Site {
        Site {
            position: pos,
            major: b'A',
            minor: b'T',
        }
    }

    #[test]
    fn test_strictly_increasing_positions() {
        let ok = SiteMap::new("chr1", vec![site(100), site(200), site(300)]);
        assert!(ok.is_ok());

        let bad = SiteMap::new("chr1", vec![site(100), site(100)]);
        assert!(bad.is_err());

        let bad = SiteMap::new("chr1", vec![site(200), site(100)]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_block_ranges() {
        let sites: Vec<Site> = (0..130).map(|i| site(i * 10 + 1)).collect();
        let map = SiteMap::new("chr1", sites).unwrap();

        assert_eq!(map.n_blocks(), 3);
        assert_eq!(map.block_sites(0), 0..64);
        assert_eq!(map.block_sites(1), 64..128);
        assert_eq!(map.block_sites(2), 128..130);
    }

    #[test]
    fn test_find_position() {
        let map = SiteMap::new("chr1", vec![site(100), site(250), site(300)]).unwrap();
        assert_eq!(map.find_position(250), Some(1));
        assert_eq!(map.find_position(251), None);
        assert_eq!(map.span(), 200);
    }
}
