//! # Block Distance Engine
//!
//! Word-parallel distance and Mendelian-error kernels over 64-site blocks,
//! plus the per-sample distance arena that caches every (donor, block)
//! distance for reuse by all focus-block evaluations of one target taxon.
//!
//! All kernels operate on the major/minor presence words described in
//! `data::store`; one `u64` covers one block.

use crate::data::{AlignedDonors, DonorIdx, GenotypeStore, TaxonIdx};

/// Same/diff/het/site counts for one (target, donor, block) triple.
///
/// Counts are per 64-site word, so each fits in a byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockDist {
    pub sites: u8,
    pub same: u8,
    pub diff: u8,
    pub het: u8,
}

/// Distance between a target word pair and a single donor's word pair.
///
/// `same` marks sites where the pair shares an allele, `diff` where they
/// carry opposite alleles, `het` where both relations hold (at least one
/// side heterozygous). `sites = |same| + |diff| - |het|` counts sites where
/// both are called.
#[inline]
pub fn inbred_block_dist(t_maj: u64, t_min: u64, d_maj: u64, d_min: u64) -> BlockDist {
    let same = (t_maj & d_maj) | (t_min & d_min);
    let diff = (t_maj & d_min) | (t_min & d_maj);
    let het = same & diff;
    let same_cnt = same.count_ones();
    let diff_cnt = diff.count_ones();
    let het_cnt = het.count_ones();
    BlockDist {
        sites: (same_cnt + diff_cnt - het_cnt) as u8,
        same: same_cnt as u8,
        diff: diff_cnt as u8,
        het: het_cnt as u8,
    }
}

/// Mendelian-error count for one block under a two-donor hypothesis.
///
/// A site is testable only when target and both donors are called. An error
/// is a testable site where the target carries an allele that neither donor
/// carries. Returns `(errors, tested_sites)`.
#[inline]
pub fn hybrid_mendel_error(
    t_maj: u64,
    t_min: u64,
    d1_maj: u64,
    d1_min: u64,
    d2_maj: u64,
    d2_min: u64,
) -> (u32, u32) {
    let site_mask = (t_maj | t_min) & (d1_maj | d1_min) & (d2_maj | d2_min);
    let maj_err = t_maj & !(d1_maj | d2_maj);
    let min_err = t_min & !(d1_min | d2_min);
    let errors = ((maj_err | min_err) & site_mask).count_ones();
    (errors, site_mask.count_ones())
}

/// Per-sample cache of block distances against every donor in a panel.
///
/// Laid out donor-major as a flat `donor × block` arena. One worker owns
/// one table for the duration of one sample; nothing is shared across
/// samples.
#[derive(Debug)]
pub struct DistanceTable {
    n_blocks: usize,
    data: Vec<BlockDist>,
}

impl DistanceTable {
    /// Compute all (donor, block) distances for `taxon` against `donors`.
    pub fn build(store: &GenotypeStore, donors: &AlignedDonors, taxon: TaxonIdx) -> Self {
        let n_blocks = store.n_blocks();
        let t_maj = store.major_words(taxon);
        let t_min = store.minor_words(taxon);
        let mut data = Vec::with_capacity(donors.n_donors() * n_blocks);
        for d in 0..donors.n_donors() {
            let donor = DonorIdx::new(d as u32);
            let d_maj = donors.major_words(donor);
            let d_min = donors.minor_words(donor);
            for b in 0..n_blocks {
                data.push(inbred_block_dist(t_maj[b], t_min[b], d_maj[b], d_min[b]));
            }
        }
        Self { n_blocks, data }
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    #[inline]
    pub fn get(&self, donor: DonorIdx, block: usize) -> BlockDist {
        self.data[donor.as_usize() * self.n_blocks + block]
    }

    /// Sum of (sites, same, diff, het) over an inclusive block window
    pub fn window_sums(&self, donor: DonorIdx, start_block: usize, end_block: usize) -> WindowSums {
        let row = &self.data
            [donor.as_usize() * self.n_blocks + start_block..donor.as_usize() * self.n_blocks + end_block + 1];
        let mut sums = WindowSums::default();
        for d in row {
            sums.sites += d.sites as u32;
            sums.same += d.same as u32;
            sums.diff += d.diff as u32;
            sums.het += d.het as u32;
        }
        sums
    }
}

/// Accumulated distance counts over a block window
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowSums {
    pub sites: u32,
    pub same: u32,
    pub diff: u32,
    pub het: u32,
}

impl WindowSums {
    /// Inbred error rate: `1 - (same - 0.5*het) / sites`
    pub fn error_rate(&self) -> f64 {
        if self.sites == 0 {
            return 1.0;
        }
        1.0 - (self.same as f64 - 0.5 * self.het as f64) / self.sites as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::site::{Site, SiteMap};
    use crate::data::store::{HET, HOM_MAJOR, HOM_MINOR, MISSING};
    use crate::data::AlignedDonors;

    fn make_store(rows: &[Vec<u8>], names: &[&str]) -> GenotypeStore {
        let n = rows[0].len();
        let sites: Vec<Site> = (0..n)
            .map(|i| Site {
                position: (i as u64) * 10 + 1,
                major: b'A',
                minor: b'C',
            })
            .collect();
        GenotypeStore::from_classes(
            SiteMap::new("chr1", sites).unwrap(),
            names.iter().map(|s| s.to_string()).collect(),
            rows,
        )
        .unwrap()
    }

    #[test]
    fn test_inbred_dist_identity() {
        // same + diff - het == sites, across mixed calls
        let target = vec![HOM_MAJOR, HET, HOM_MINOR, MISSING, HOM_MAJOR, HET];
        let donor = vec![HOM_MAJOR, HOM_MINOR, HOM_MAJOR, HOM_MAJOR, MISSING, HET];
        let store = make_store(&[target, donor], &["T", "D"]);
        let t = TaxonIdx::new(0);
        let d = TaxonIdx::new(1);
        let dist = inbred_block_dist(
            store.major_words(t)[0],
            store.minor_words(t)[0],
            store.major_words(d)[0],
            store.minor_words(d)[0],
        );
        assert_eq!(
            dist.same as u32 + dist.diff as u32 - dist.het as u32,
            dist.sites as u32
        );
        // sites 0,1,2,5 are called on both sides
        assert_eq!(dist.sites, 4);
    }

    #[test]
    fn test_identical_rows_have_zero_error() {
        let row = vec![HOM_MAJOR, HOM_MINOR, HOM_MAJOR, HOM_MINOR];
        let store = make_store(&[row.clone(), row], &["T", "D"]);
        let t = TaxonIdx::new(0);
        let d = TaxonIdx::new(1);
        let dist = inbred_block_dist(
            store.major_words(t)[0],
            store.minor_words(t)[0],
            store.major_words(d)[0],
            store.minor_words(d)[0],
        );
        assert_eq!(dist.diff, 0);
        assert_eq!(dist.same, 4);
        let sums = WindowSums {
            sites: dist.sites as u32,
            same: dist.same as u32,
            diff: dist.diff as u32,
            het: dist.het as u32,
        };
        assert_eq!(sums.error_rate(), 0.0);
    }

    #[test]
    fn test_hybrid_mendel_error_rules() {
        // Site 0: target major, donors major+minor -> consistent.
        // Site 1: target major, both donors minor  -> error.
        // Site 2: target het, donors major+minor   -> consistent.
        // Site 3: target missing                   -> not tested.
        // Site 4: target minor, donor2 missing     -> not tested.
        let target = vec![HOM_MAJOR, HOM_MAJOR, HET, MISSING, HOM_MINOR];
        let d1 = vec![HOM_MAJOR, HOM_MINOR, HOM_MAJOR, HOM_MAJOR, HOM_MINOR];
        let d2 = vec![HOM_MINOR, HOM_MINOR, HOM_MINOR, HOM_MAJOR, MISSING];
        let store = make_store(&[target, d1, d2], &["T", "D1", "D2"]);
        let w = |t: u32| {
            (
                store.major_words(TaxonIdx::new(t))[0],
                store.minor_words(TaxonIdx::new(t))[0],
            )
        };
        let (tm, tn) = w(0);
        let (d1m, d1n) = w(1);
        let (d2m, d2n) = w(2);
        let (errors, tested) = hybrid_mendel_error(tm, tn, d1m, d1n, d2m, d2n);
        assert_eq!(tested, 3);
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_distance_table_window_sums() {
        let n = 130; // 3 blocks
        let target: Vec<u8> = (0..n).map(|i| if i % 2 == 0 { HOM_MAJOR } else { HOM_MINOR }).collect();
        let donor = target.clone();
        let store = make_store(&[target], &["T"]);
        let panel = make_store(&[donor], &["D"]);
        let aligned = AlignedDonors::build(store.sites(), &panel).unwrap();
        let table = DistanceTable::build(&store, &aligned, TaxonIdx::new(0));

        let sums = table.window_sums(DonorIdx::new(0), 0, 2);
        assert_eq!(sums.sites, n as u32);
        assert_eq!(sums.diff, 0);
        assert!(sums.sites <= 64 * 3);

        // Identity holds per block as well.
        for b in 0..3 {
            let d = table.get(DonorIdx::new(0), b);
            assert_eq!(d.same as u32 + d.diff as u32 - d.het as u32, d.sites as u32);
        }
    }
}
