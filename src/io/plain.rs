//! # Plain-Text Matrix I/O
//!
//! A minimal tab-separated interchange format so the binary can run end to
//! end without a full variant-file stack (format parsers are deliberately
//! out of scope; this is the thin edge of the genotype-store collaborator).
//!
//! Layout:
//!
//! ```text
//! #chrom  pos  major  minor  T1  T2  ...
//! chr1    101  A      C      A   H   ...
//! ```
//!
//! Genotype codes: `A` homozygous major, `H` heterozygous, `B` homozygous
//! minor, `N` missing.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::data::site::{Site, SiteMap};
use crate::data::store::{GenotypeStore, HET, HOM_MAJOR, HOM_MINOR, MISSING};
use crate::data::TaxonIdx;
use crate::error::{HaplofillError, Result};
use crate::pipelines::orchestrator::DonorInterval;

fn class_to_code(class: u8) -> char {
    match class {
        HOM_MAJOR => 'A',
        HET => 'H',
        HOM_MINOR => 'B',
        _ => 'N',
    }
}

fn code_to_class(code: &str, line: usize) -> Result<u8> {
    match code {
        "A" => Ok(HOM_MAJOR),
        "H" => Ok(HET),
        "B" => Ok(HOM_MINOR),
        "N" => Ok(MISSING),
        other => Err(HaplofillError::parse(
            line,
            format!("unknown genotype code '{}'", other),
        )),
    }
}

fn parse_allele(field: &str, line: usize) -> Result<u8> {
    let bytes = field.as_bytes();
    if bytes.len() != 1 {
        return Err(HaplofillError::parse(
            line,
            format!("allele must be a single character, got '{}'", field),
        ));
    }
    Ok(bytes[0])
}

/// Read a genotype matrix from the plain-text format.
pub fn read_matrix(path: &Path) -> Result<GenotypeStore> {
    if !path.exists() {
        return Err(HaplofillError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines().enumerate();

    let (_, header) = lines
        .next()
        .ok_or_else(|| HaplofillError::parse(1, "empty file"))?;
    let header = header?;
    let cols: Vec<&str> = header.trim_end().split('\t').collect();
    if cols.len() < 5 || cols[0] != "#chrom" {
        return Err(HaplofillError::parse(
            1,
            "expected header '#chrom\\tpos\\tmajor\\tminor\\t<taxa...>'",
        ));
    }
    let taxa: Vec<String> = cols[4..].iter().map(|s| s.to_string()).collect();

    let mut chrom: Option<String> = None;
    let mut sites = Vec::new();
    let mut columns: Vec<Vec<u8>> = vec![Vec::new(); taxa.len()];
    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 4 + taxa.len() {
            return Err(HaplofillError::parse(
                line_no,
                format!("expected {} fields, got {}", 4 + taxa.len(), fields.len()),
            ));
        }
        match &chrom {
            None => chrom = Some(fields[0].to_string()),
            Some(c) if c != fields[0] => {
                return Err(HaplofillError::parse(
                    line_no,
                    format!("multiple chromosomes in one matrix: {} and {}", c, fields[0]),
                ));
            }
            _ => {}
        }
        let position: u64 = fields[1]
            .parse()
            .map_err(|_| HaplofillError::parse(line_no, format!("bad position '{}'", fields[1])))?;
        sites.push(Site {
            position,
            major: parse_allele(fields[2], line_no)?,
            minor: parse_allele(fields[3], line_no)?,
        });
        for (t, field) in fields[4..].iter().enumerate() {
            columns[t].push(code_to_class(field, line_no)?);
        }
    }

    let chrom = chrom.ok_or_else(|| HaplofillError::parse(2, "no data rows"))?;
    GenotypeStore::from_classes(SiteMap::new(chrom, sites)?, taxa, &columns)
}

/// Write a genotype matrix in the plain-text format.
pub fn write_matrix(path: &Path, store: &GenotypeStore) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write!(w, "#chrom\tpos\tmajor\tminor")?;
    for taxon in store.taxa() {
        write!(w, "\t{}", taxon)?;
    }
    writeln!(w)?;
    for s in 0..store.n_sites() {
        let site = store.sites().site(s);
        write!(
            w,
            "{}\t{}\t{}\t{}",
            store.sites().chrom(),
            site.position,
            site.major as char,
            site.minor as char
        )?;
        for t in 0..store.n_taxa() {
            write!(
                w,
                "\t{}",
                class_to_code(store.genotype(TaxonIdx::new(t as u32), s))
            )?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

/// Write the per-taxon donor-interval report.
pub fn write_intervals(
    path: &Path,
    taxa: &[String],
    intervals: &[Vec<DonorInterval>],
) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "#taxon\tstart_pos\tend_pos\tdonor1\tdonor2")?;
    for (taxon, rows) in taxa.iter().zip(intervals.iter()) {
        for iv in rows {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}",
                taxon, iv.start_pos, iv.end_pos, iv.donor1, iv.donor2
            )?;
        }
    }
    w.flush()?;
    Ok(())
}
