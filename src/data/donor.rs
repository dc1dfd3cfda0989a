//! # Donor Panel Alignment
//!
//! A donor panel is a genotype matrix of reference haplotypes covering a
//! contiguous run of target sites, possibly starting at an arbitrary offset
//! into the target coordinate system. Before any search runs, each panel is
//! resolved against the target once:
//!
//! 1. **Coordinate match**: the panel's sites must line up one-to-one with a
//!    contiguous run of target sites (matched by physical position). A panel
//!    that cannot be matched this way is malformed and fatal at load time.
//! 2. **Polarity reconciliation**: per site, the panel's major/minor
//!    assignment is compared with the target's. Matching sites are kept,
//!    swapped sites get a swap-mask bit, conflicting sites get a drop-mask
//!    bit (treated as missing in every donor). This happens once per panel;
//!    no per-query polarity checks exist anywhere downstream.
//! 3. **Word-grid realignment**: donor words are rebuilt onto the target's
//!    64-site word grid by shifting `start mod 64` bits, so the distance
//!    engine can combine target and donor words block by block.

use crate::data::site::{DonorIdx, SiteMap, TaxonIdx, SITES_PER_BLOCK};
use crate::data::store::{class_from_bits, GenotypeStore};
use crate::error::{HaplofillError, Result};

/// A panel is rejected when more than this fraction of its sites have
/// irreconcilable allele codes against the target.
const MAX_DROPPED_FRACTION: f64 = 0.5;

/// Shift `src` words left by `bit_offset` bits and OR them into `dst`
/// starting at `dst[word_offset]`.
///
/// `n_bits` is the number of valid bits in `src`; bits beyond it are
/// ignored. This is the word-grid rebuild used to bring donor bit planes
/// onto the target's block boundaries, and it is deliberately exposed so it
/// can be tested on its own.
pub fn realign_words(src: &[u64], n_bits: usize, bit_offset: usize, dst: &mut [u64], word_offset: usize) {
    debug_assert!(bit_offset < SITES_PER_BLOCK);
    let n_src_words = n_bits.div_ceil(SITES_PER_BLOCK);
    for i in 0..n_src_words {
        let mut w = src[i];
        let valid = n_bits - i * SITES_PER_BLOCK;
        if valid < SITES_PER_BLOCK {
            w &= (1u64 << valid) - 1;
        }
        let lo = word_offset + i;
        if lo < dst.len() {
            dst[lo] |= w << bit_offset;
        }
        if bit_offset > 0 && lo + 1 < dst.len() {
            dst[lo + 1] |= w >> (SITES_PER_BLOCK - bit_offset);
        }
    }
}

/// A donor panel resolved against the target coordinate system.
///
/// Word accessors return bit planes on the *target* word grid, with zeros
/// (missing) outside the panel's segment; site/class lookups take target
/// site indices. Built once at load time and shared read-only by every
/// worker for the whole run.
#[derive(Clone, Debug)]
pub struct AlignedDonors {
    names: Vec<String>,
    start_site: usize,
    n_sites: usize,
    maj: Vec<Vec<u64>>,
    min: Vec<Vec<u64>>,
}

impl AlignedDonors {
    /// Resolve `panel` against `target_sites`.
    ///
    /// Fatal (`InvalidData`) when the panel has no sites, its first site is
    /// absent from the target, its sites do not run contiguously alongside
    /// the target's, it overhangs the end of the target, or too many sites
    /// have irreconcilable allele codes.
    pub fn build(target_sites: &SiteMap, panel: &GenotypeStore) -> Result<Self> {
        let n_panel = panel.n_sites();
        if n_panel == 0 {
            return Err(HaplofillError::invalid_data("donor panel has no sites"));
        }
        let first_pos = panel.sites().position(0);
        let start_site = target_sites.find_position(first_pos).ok_or_else(|| {
            HaplofillError::invalid_data(format!(
                "donor panel start position {} not present in target",
                first_pos
            ))
        })?;
        if start_site + n_panel > target_sites.len() {
            return Err(HaplofillError::invalid_data(format!(
                "donor panel ({} sites from target site {}) overhangs target ({} sites)",
                n_panel,
                start_site,
                target_sites.len()
            )));
        }

        // Per-site polarity masks on the panel-native word grid.
        let n_panel_words = n_panel.div_ceil(SITES_PER_BLOCK);
        let mut swap_words = vec![0u64; n_panel_words];
        let mut drop_words = vec![0u64; n_panel_words];
        let mut dropped = 0usize;
        for k in 0..n_panel {
            let p = panel.sites().site(k);
            let t = target_sites.site(start_site + k);
            if p.position != t.position {
                return Err(HaplofillError::invalid_data(format!(
                    "donor panel site {} at position {} does not line up with target position {}",
                    k, p.position, t.position
                )));
            }
            let (word, bit) = (k / SITES_PER_BLOCK, k % SITES_PER_BLOCK);
            if p.major == t.major && p.minor == t.minor {
                // polarity agrees
            } else if p.major == t.minor && p.minor == t.major {
                swap_words[word] |= 1u64 << bit;
            } else {
                drop_words[word] |= 1u64 << bit;
                dropped += 1;
            }
        }
        if (dropped as f64) / (n_panel as f64) > MAX_DROPPED_FRACTION {
            return Err(HaplofillError::invalid_data(format!(
                "donor panel allele codes conflict with target at {} of {} sites",
                dropped, n_panel
            )));
        }

        // Apply masks, then rebuild each donor's planes on the target grid.
        let n_target_blocks = target_sites.n_blocks();
        let word_offset = start_site / SITES_PER_BLOCK;
        let bit_offset = start_site % SITES_PER_BLOCK;
        let mut maj = Vec::with_capacity(panel.n_taxa());
        let mut min = Vec::with_capacity(panel.n_taxa());
        for d in 0..panel.n_taxa() {
            let dt = TaxonIdx::new(d as u32);
            let raw_maj = panel.major_words(dt);
            let raw_min = panel.minor_words(dt);
            let mut eff_maj = vec![0u64; n_panel_words];
            let mut eff_min = vec![0u64; n_panel_words];
            for w in 0..n_panel_words {
                let keep = !drop_words[w];
                let swap = swap_words[w];
                eff_maj[w] = ((raw_maj[w] & !swap) | (raw_min[w] & swap)) & keep;
                eff_min[w] = ((raw_min[w] & !swap) | (raw_maj[w] & swap)) & keep;
            }
            let mut grid_maj = vec![0u64; n_target_blocks];
            let mut grid_min = vec![0u64; n_target_blocks];
            realign_words(&eff_maj, n_panel, bit_offset, &mut grid_maj, word_offset);
            realign_words(&eff_min, n_panel, bit_offset, &mut grid_min, word_offset);
            maj.push(grid_maj);
            min.push(grid_min);
        }

        Ok(Self {
            names: panel.taxa().to_vec(),
            start_site,
            n_sites: n_panel,
            maj,
            min,
        })
    }

    pub fn n_donors(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, donor: DonorIdx) -> &str {
        &self.names[donor.as_usize()]
    }

    /// Target site index range covered by the panel
    pub fn site_range(&self) -> std::ops::Range<usize> {
        self.start_site..self.start_site + self.n_sites
    }

    /// Target block index range overlapped by the panel
    pub fn block_range(&self) -> std::ops::Range<usize> {
        let start = self.start_site / SITES_PER_BLOCK;
        let end = (self.start_site + self.n_sites).div_ceil(SITES_PER_BLOCK);
        start..end
    }

    /// Major-presence words for one donor, on the target word grid
    #[inline]
    pub fn major_words(&self, donor: DonorIdx) -> &[u64] {
        &self.maj[donor.as_usize()]
    }

    /// Minor-presence words for one donor, on the target word grid
    #[inline]
    pub fn minor_words(&self, donor: DonorIdx) -> &[u64] {
        &self.min[donor.as_usize()]
    }

    /// Genotype class of one donor at a target site index
    #[inline]
    pub fn class(&self, donor: DonorIdx, site: usize) -> u8 {
        let d = donor.as_usize();
        let (word, bit) = (site / SITES_PER_BLOCK, site % SITES_PER_BLOCK);
        let maj = (self.maj[d][word] >> bit) & 1 == 1;
        let min = (self.min[d][word] >> bit) & 1 == 1;
        class_from_bits(maj, min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::site::Site;
    use crate::data::store::{GenotypeStore, HET, HOM_MAJOR, HOM_MINOR, MISSING};

    fn target_sites(n: usize) -> SiteMap {
        let sites: Vec<Site> = (0..n)
            .map(|i| Site {
                position: (i as u64) * 100 + 1,
                major: b'A',
                minor: b'C',
            })
            .collect();
        SiteMap::new("chr1", sites).unwrap()
    }

    fn panel_sites(start: usize, n: usize, swapped: bool) -> SiteMap {
        let sites: Vec<Site> = (0..n)
            .map(|i| Site {
                position: ((start + i) as u64) * 100 + 1,
                major: if swapped { b'C' } else { b'A' },
                minor: if swapped { b'A' } else { b'C' },
            })
            .collect();
        SiteMap::new("chr1", sites).unwrap()
    }

    #[test]
    fn test_realign_words_zero_offset() {
        let src = vec![0xDEAD_BEEFu64];
        let mut dst = vec![0u64; 2];
        realign_words(&src, 32, 0, &mut dst, 1);
        assert_eq!(dst, vec![0, 0xDEAD_BEEF]);
    }

    #[test]
    fn test_realign_words_bit_shift_spills_into_next_word() {
        let src = vec![u64::MAX];
        let mut dst = vec![0u64; 3];
        realign_words(&src, 64, 60, &mut dst, 0);
        assert_eq!(dst[0], u64::MAX << 60);
        assert_eq!(dst[1], u64::MAX >> 4);
        assert_eq!(dst[2], 0);
    }

    #[test]
    fn test_realign_words_masks_tail_bits() {
        // 10 valid bits, all set; the rest of the source word is garbage.
        let src = vec![u64::MAX];
        let mut dst = vec![0u64; 2];
        realign_words(&src, 10, 8, &mut dst, 0);
        assert_eq!(dst[0], 0x3FF << 8);
        assert_eq!(dst[1], 0);
    }

    #[test]
    fn test_realign_words_multiword() {
        let src = vec![u64::MAX, 0xFF];
        let mut dst = vec![0u64; 3];
        realign_words(&src, 72, 4, &mut dst, 0);
        assert_eq!(dst[0], u64::MAX << 4);
        assert_eq!(dst[1], (u64::MAX >> 60) | (0xFF << 4));
        assert_eq!(dst[2], 0);
    }

    #[test]
    fn test_aligned_offset_lookup() {
        let target = target_sites(200);
        // Panel of 1 donor covering target sites 70..150, all HOM_MINOR.
        let panel = GenotypeStore::from_classes(
            panel_sites(70, 80, false),
            vec!["D1".to_string()],
            &[vec![HOM_MINOR; 80]],
        )
        .unwrap();
        let aligned = AlignedDonors::build(&target, &panel).unwrap();

        assert_eq!(aligned.site_range(), 70..150);
        assert_eq!(aligned.block_range(), 1..3);
        assert_eq!(aligned.class(DonorIdx::new(0), 69), MISSING);
        assert_eq!(aligned.class(DonorIdx::new(0), 70), HOM_MINOR);
        assert_eq!(aligned.class(DonorIdx::new(0), 149), HOM_MINOR);
        assert_eq!(aligned.class(DonorIdx::new(0), 150), MISSING);
    }

    #[test]
    fn test_polarity_swap_mask() {
        let target = target_sites(64);
        // Swapped polarity everywhere: the panel's "major" is the target's
        // minor. A donor recorded as HOM_MAJOR in panel coordinates must
        // read back as HOM_MINOR in target coordinates.
        let panel = GenotypeStore::from_classes(
            panel_sites(0, 64, true),
            vec!["D1".to_string()],
            &[vec![HOM_MAJOR; 64]],
        )
        .unwrap();
        let aligned = AlignedDonors::build(&target, &panel).unwrap();
        for s in 0..64 {
            assert_eq!(aligned.class(DonorIdx::new(0), s), HOM_MINOR);
        }
    }

    #[test]
    fn test_polarity_swap_preserves_het_and_missing() {
        let target = target_sites(4);
        let panel = GenotypeStore::from_classes(
            panel_sites(0, 4, true),
            vec!["D1".to_string()],
            &[vec![HET, MISSING, HOM_MINOR, HOM_MAJOR]],
        )
        .unwrap();
        let aligned = AlignedDonors::build(&target, &panel).unwrap();
        assert_eq!(aligned.class(DonorIdx::new(0), 0), HET);
        assert_eq!(aligned.class(DonorIdx::new(0), 1), MISSING);
        assert_eq!(aligned.class(DonorIdx::new(0), 2), HOM_MAJOR);
        assert_eq!(aligned.class(DonorIdx::new(0), 3), HOM_MINOR);
    }

    #[test]
    fn test_conflicting_alleles_are_dropped() {
        let target = target_sites(64);
        // First site's alleles are irreconcilable (G/T vs A/C); the rest
        // agree. The conflicting site must read as missing for every donor.
        let mut sites: Vec<Site> = (0..64)
            .map(|i| Site {
                position: (i as u64) * 100 + 1,
                major: b'A',
                minor: b'C',
            })
            .collect();
        sites[0].major = b'G';
        sites[0].minor = b'T';
        let panel = GenotypeStore::from_classes(
            SiteMap::new("chr1", sites).unwrap(),
            vec!["D1".to_string()],
            &[vec![HOM_MAJOR; 64]],
        )
        .unwrap();
        let aligned = AlignedDonors::build(&target, &panel).unwrap();
        assert_eq!(aligned.class(DonorIdx::new(0), 0), MISSING);
        assert_eq!(aligned.class(DonorIdx::new(0), 1), HOM_MAJOR);
    }

    #[test]
    fn test_malformed_panel_is_fatal() {
        let target = target_sites(100);

        // Start position absent from target.
        let mut sites: Vec<Site> = (0..10)
            .map(|i| Site {
                position: (i as u64) * 100 + 7,
                major: b'A',
                minor: b'C',
            })
            .collect();
        sites.sort_by_key(|s| s.position);
        let panel = GenotypeStore::from_classes(
            SiteMap::new("chr1", sites).unwrap(),
            vec!["D1".to_string()],
            &[vec![HOM_MAJOR; 10]],
        )
        .unwrap();
        assert!(AlignedDonors::build(&target, &panel).is_err());

        // Panel overhangs the target.
        let panel = GenotypeStore::from_classes(
            panel_sites(95, 10, false),
            vec!["D1".to_string()],
            &[vec![HOM_MAJOR; 10]],
        )
        .unwrap();
        assert!(AlignedDonors::build(&target, &panel).is_err());
    }
}
