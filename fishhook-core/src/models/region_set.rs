use std::collections::HashSet;
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use md5::{Digest, Md5};

use crate::errors::{RegionError, RegionResult};
use crate::models::region::{Region, Strand};
use crate::utils::{default_column_name, get_dynamic_reader};

///
/// RegionSet struct, an ordered collection of genomic intervals such as
/// hypotheses, events, eligible territory or covariate tracks.
///
/// No ordering across chromosomes is required; operations that need one
/// (reduce, intersect, setdiff) sort a copy.
///
#[derive(Clone, Debug, Default)]
pub struct RegionSet {
    pub regions: Vec<Region>,
    pub header: Option<Vec<String>>,
    pub path: Option<PathBuf>,
}

pub struct RegionSetIterator<'a> {
    region_set: &'a RegionSet,
    index: usize,
}

fn parse_coordinate(value: Option<&str>, line: &str) -> RegionResult<u32> {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .ok_or_else(|| RegionError::RegionParseError(format!("Invalid coordinate in line: {line}")))
}

impl TryFrom<&Path> for RegionSet {
    type Error = RegionError;

    ///
    /// Create a new [RegionSet] from a bed-like file (optionally gzipped).
    ///
    /// Columns past the third become metadata. Their names come from a
    /// `#`-prefixed or non-numeric first line when present, otherwise
    /// `V4`, `V5`, ... A column named `strand` (or the sixth column of a
    /// headerless file) is parsed as the region strand.
    ///
    fn try_from(value: &Path) -> RegionResult<Self> {
        let reader = get_dynamic_reader(value)
            .map_err(|e| RegionError::FileReadError(format!("{}: {e}", value.display())))?;

        let mut regions: Vec<Region> = Vec::new();
        let mut header: Option<Vec<String>> = None;
        let mut first_line = true;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty()
                || line.starts_with("browser")
                || line.starts_with("track")
            {
                continue;
            }

            let parts: Vec<&str> = line.split('\t').collect();

            if let Some(stripped) = line.strip_prefix('#') {
                if header.is_none() && regions.is_empty() {
                    header = Some(stripped.split('\t').map(|s| s.trim().to_string()).collect());
                }
                first_line = false;
                continue;
            }

            // column headers like `chr start end name` without a leading #
            if first_line {
                first_line = false;
                if parts.len() >= 3 && parts[1].trim().parse::<u32>().is_err() {
                    header = Some(parts.iter().map(|s| s.trim().to_string()).collect());
                    continue;
                }
            }

            if parts.len() < 3 {
                return Err(RegionError::RegionParseError(format!(
                    "Expected at least 3 columns: {line}"
                )));
            }

            let start = parse_coordinate(parts.get(1).copied(), &line)?;
            let end = parse_coordinate(parts.get(2).copied(), &line)?;
            let mut region = Region::new(parts[0].trim(), start, end)?;

            for (idx, value) in parts.iter().enumerate().skip(3) {
                let name = header
                    .as_ref()
                    .and_then(|h| h.get(idx).cloned())
                    .unwrap_or_else(|| default_column_name(idx));

                let is_strand = match &header {
                    Some(_) => name.eq_ignore_ascii_case("strand"),
                    None => idx == 5,
                };
                if is_strand {
                    region.strand = value.trim().parse::<Strand>()?;
                } else {
                    region.meta.insert(name, value.trim().to_string());
                }
            }

            regions.push(region);
        }

        if regions.is_empty() {
            return Err(RegionError::EmptyRegionSet(value.display().to_string()));
        }

        Ok(RegionSet {
            regions,
            header,
            path: Some(value.to_owned()),
        })
    }
}

impl TryFrom<&str> for RegionSet {
    type Error = RegionError;

    fn try_from(value: &str) -> RegionResult<Self> {
        RegionSet::try_from(Path::new(value))
    }
}

impl TryFrom<PathBuf> for RegionSet {
    type Error = RegionError;

    fn try_from(value: PathBuf) -> RegionResult<Self> {
        RegionSet::try_from(value.as_path())
    }
}

impl From<Vec<Region>> for RegionSet {
    fn from(regions: Vec<Region>) -> Self {
        RegionSet {
            regions,
            header: None,
            path: None,
        }
    }
}

impl FromIterator<Region> for RegionSet {
    fn from_iter<T: IntoIterator<Item = Region>>(iter: T) -> Self {
        RegionSet::from(iter.into_iter().collect::<Vec<Region>>())
    }
}

impl<'a> Iterator for RegionSetIterator<'a> {
    type Item = &'a Region;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index < self.region_set.regions.len() {
            let region = &self.region_set.regions[self.index];
            self.index += 1;
            Some(region)
        } else {
            None
        }
    }
}

impl<'a> IntoIterator for &'a RegionSet {
    type Item = &'a Region;
    type IntoIter = RegionSetIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        RegionSetIterator {
            region_set: self,
            index: 0,
        }
    }
}

/// Group already sorted regions into per-chromosome runs.
fn chromosome_runs(regions: &[Region]) -> Vec<&[Region]> {
    let mut runs = Vec::new();
    let mut run_start = 0;
    while run_start < regions.len() {
        let chr = &regions[run_start].chr;
        let mut run_end = run_start;
        while run_end < regions.len() && regions[run_end].chr == *chr {
            run_end += 1;
        }
        runs.push(&regions[run_start..run_end]);
        run_start = run_end;
    }
    runs
}

fn bare_region(chr: &str, start: u32, end: u32) -> Region {
    Region {
        chr: chr.to_string(),
        start,
        end,
        strand: Strand::Unstranded,
        meta: IndexMap::new(),
    }
}

impl RegionSet {
    ///
    /// Save a regionset to disk as bed file
    ///
    /// # Arguments
    /// - path: the path to the file to dump to
    pub fn to_bed<T: AsRef<Path>>(&self, path: T) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = BufWriter::new(File::create(path)?);
        for region in &self.regions {
            writeln!(file, "{}", region.as_string())?;
        }
        Ok(())
    }

    ///
    /// Validate every region, failing on the first malformed one.
    ///
    pub fn validate(&self) -> RegionResult<()> {
        self.regions.iter().try_for_each(Region::validate)
    }

    ///
    /// Calculate identifier for RegionSet
    ///
    /// The identifier depends on region order: it is computed on the
    /// unsorted first 3 columns.
    ///
    /// # Returns
    /// String containing RegionSet identifier
    pub fn identifier(&self) -> String {
        let mut chrs = String::new();
        let mut starts = String::new();
        let mut ends = String::new();

        let mut first = true;
        for region in &self.regions {
            if !first {
                chrs.push(',');
                starts.push(',');
                ends.push(',');
            }
            chrs.push_str(&region.chr);
            starts.push_str(&region.start.to_string());
            ends.push_str(&region.end.to_string());

            first = false;
        }

        let mut hasher = Md5::new();
        hasher.update(chrs);
        let chrom_hash = hasher.finalize();

        let mut hasher = Md5::new();
        hasher.update(starts);
        let start_hash = hasher.finalize();

        let mut hasher = Md5::new();
        hasher.update(ends);
        let end_hash = hasher.finalize();

        let combined = format!("{:x},{:x},{:x}", chrom_hash, start_hash, end_hash);

        let mut hasher = Md5::new();
        hasher.update(combined);
        format!("{:x}", hasher.finalize())
    }

    ///
    /// Names of the metadata columns, in column order. Header columns come
    /// first (coordinates and strand excluded), then any key carried by a
    /// region but missing from the header, in order of first appearance.
    ///
    pub fn meta_columns(&self) -> Vec<String> {
        let mut names: IndexSet<String> = IndexSet::new();
        if let Some(header) = &self.header {
            names.extend(
                header
                    .iter()
                    .skip(3)
                    .filter(|name| !name.eq_ignore_ascii_case("strand"))
                    .cloned(),
            );
        }
        for region in &self.regions {
            for key in region.meta.keys() {
                if !names.contains(key) {
                    names.insert(key.clone());
                }
            }
        }
        names.into_iter().collect()
    }

    ///
    /// Iterate unique chromosomes located in RegionSet
    ///
    pub fn iter_chroms(&self) -> impl Iterator<Item = &String> {
        let unique_chroms: HashSet<&String> = self.regions.iter().map(|r| &r.chr).collect();
        unique_chroms.into_iter()
    }

    ///
    /// Iterate through regions located on specific Chromosome in RegionSet
    ///
    pub fn iter_chr_regions<'a>(&'a self, chr: &'a str) -> impl Iterator<Item = &'a Region> {
        self.regions.iter().filter(move |r| r.chr == chr)
    }

    ///
    /// Sort regions by chromosome, start and end, in place.
    ///
    pub fn sort(&mut self) {
        self.regions.sort();
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    ///
    /// Sum of all region widths. Overlapping regions are counted twice;
    /// call [RegionSet::reduce] first for covered bases.
    ///
    pub fn total_width(&self) -> u64 {
        self.regions.iter().map(|r| r.width() as u64).sum()
    }

    ///
    /// Keep the regions at `indices`, in the given order.
    ///
    pub fn subset(&self, indices: &[usize]) -> RegionSet {
        RegionSet {
            regions: indices
                .iter()
                .filter_map(|&i| self.regions.get(i).cloned())
                .collect(),
            header: self.header.clone(),
            path: self.path.clone(),
        }
    }

    ///
    /// Widen every region by `bases` on both sides, clamped at 0.
    ///
    pub fn pad(&self, bases: u32) -> RegionSet {
        RegionSet {
            regions: self
                .regions
                .iter()
                .map(|r| Region {
                    start: r.start.saturating_sub(bases),
                    end: r.end.saturating_add(bases),
                    ..r.clone()
                })
                .collect(),
            header: self.header.clone(),
            path: self.path.clone(),
        }
    }

    ///
    /// Merge overlapping and adjacent intervals per chromosome into maximal
    /// disjoint spans, sorted by (chr, start). Metadata and strand are dropped.
    ///
    pub fn reduce(&self) -> RegionSet {
        if self.regions.is_empty() {
            return RegionSet::default();
        }

        let mut sorted = self.regions.clone();
        sorted.sort();

        let mut merged: Vec<Region> = Vec::new();
        let mut current = bare_region(&sorted[0].chr, sorted[0].start, sorted[0].end);

        for r in &sorted[1..] {
            if r.chr == current.chr && r.start <= current.end {
                current.end = current.end.max(r.end);
            } else {
                let next = bare_region(&r.chr, r.start, r.end);
                merged.push(std::mem::replace(&mut current, next));
            }
        }
        merged.push(current);

        RegionSet::from(merged)
    }

    ///
    /// Is this set already disjoint and sorted per chromosome?
    ///
    pub fn is_reduced(&self) -> bool {
        self.regions.windows(2).all(|w| {
            w[0].chr != w[1].chr || w[0].end < w[1].start
        }) && {
            // chromosome runs must be contiguous
            let mut seen: HashSet<&str> = HashSet::new();
            let mut last: Option<&str> = None;
            self.regions.iter().all(|r| {
                if last == Some(r.chr.as_str()) {
                    return true;
                }
                last = Some(r.chr.as_str());
                seen.insert(r.chr.as_str())
            })
        }
    }

    ///
    /// Union of two region sets, reduced.
    ///
    pub fn union(&self, other: &RegionSet) -> RegionSet {
        let mut regions = self.regions.clone();
        regions.extend(other.regions.iter().cloned());
        RegionSet::from(regions).reduce()
    }

    ///
    /// Bases covered by both sets, as reduced spans. Both inputs are
    /// reduced internally, then swept per chromosome.
    ///
    pub fn intersect(&self, other: &RegionSet) -> RegionSet {
        let a = self.reduce();
        let b = other.reduce();

        let b_runs = chromosome_runs(&b.regions);
        let mut result: Vec<Region> = Vec::new();

        for a_run in chromosome_runs(&a.regions) {
            let chr = &a_run[0].chr;
            let Some(b_run) = b_runs.iter().find(|run| run[0].chr == *chr) else {
                continue;
            };

            let (mut i, mut j) = (0, 0);
            while i < a_run.len() && j < b_run.len() {
                let start = a_run[i].start.max(b_run[j].start);
                let end = a_run[i].end.min(b_run[j].end);
                if start < end {
                    result.push(bare_region(chr, start, end));
                }
                if a_run[i].end < b_run[j].end {
                    i += 1;
                } else {
                    j += 1;
                }
            }
        }

        RegionSet::from(result)
    }

    ///
    /// Subtract one region set from another (set difference).
    ///
    /// Removes portions of `self` that overlap with `other`. Both inputs are
    /// reduced internally before subtraction.
    ///
    pub fn setdiff(&self, other: &RegionSet) -> RegionSet {
        let a = self.reduce();
        let b = other.reduce();

        let b_runs = chromosome_runs(&b.regions);
        let mut result: Vec<Region> = Vec::new();

        for a_run in chromosome_runs(&a.regions) {
            let chr = &a_run[0].chr;
            let empty: &[Region] = &[];
            let b_chr = b_runs
                .iter()
                .find(|run| run[0].chr == *chr)
                .copied()
                .unwrap_or(empty);
            let mut b_idx = 0;

            for a_region in a_run {
                while b_idx < b_chr.len() && b_chr[b_idx].end <= a_region.start {
                    b_idx += 1;
                }

                let mut pos = a_region.start;
                let mut j = b_idx;

                while j < b_chr.len() && b_chr[j].start < a_region.end && pos < a_region.end {
                    if b_chr[j].start > pos {
                        result.push(bare_region(chr, pos, b_chr[j].start));
                    }
                    pos = pos.max(b_chr[j].end);
                    j += 1;
                }

                if pos < a_region.end {
                    result.push(bare_region(chr, pos, a_region.end));
                }
            }
        }

        RegionSet::from(result)
    }
}

impl Display for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionSet with {} regions.", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::*;

    fn get_test_path(file_name: &str) -> PathBuf {
        std::env::current_dir()
            .unwrap()
            .join("../tests/data")
            .join(file_name)
    }

    fn make_region(chr: &str, start: u32, end: u32) -> Region {
        Region::new(chr, start, end).unwrap()
    }

    fn make_regionset(regions: Vec<(&str, u32, u32)>) -> RegionSet {
        regions
            .into_iter()
            .map(|(chr, start, end)| make_region(chr, start, end))
            .collect()
    }

    #[rstest]
    fn test_open_hypotheses_with_header() {
        let rs = RegionSet::try_from(get_test_path("hypotheses.bed")).unwrap();
        assert_eq!(rs.len(), 3);
        assert_eq!(rs.regions[0].get("name"), Some("geneA"));
        assert!(rs.header.is_some());
    }

    #[rstest]
    fn test_meta_columns_cover_every_region() {
        let rs = RegionSet::from(vec![
            make_region("chr1", 0, 10).with_meta("name", "a"),
            make_region("chr1", 20, 30)
                .with_meta("name", "b")
                .with_meta("biotype", "lncRNA"),
        ]);
        assert_eq!(rs.meta_columns(), vec!["name", "biotype"]);

        let mut with_header = rs.clone();
        with_header.header = Some(
            ["chr", "start", "end", "strand", "score", "name"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        assert_eq!(with_header.meta_columns(), vec!["score", "name", "biotype"]);
    }

    #[rstest]
    fn test_open_events_reads_sample_column() {
        let rs = RegionSet::try_from(get_test_path("events.bed")).unwrap();
        assert_eq!(rs.regions[0].get("sample"), Some("sampleX"));
    }

    #[rstest]
    fn test_headerless_file_uses_positional_names() {
        let rs = RegionSet::try_from(get_test_path("eligible.bed")).unwrap();
        assert_eq!(rs.len(), 3);
        assert!(rs.header.is_none());
    }

    #[rstest]
    fn test_malformed_file_is_rejected() {
        let result = RegionSet::try_from(get_test_path("malformed.bed"));
        assert!(matches!(result, Err(RegionError::MalformedInterval { .. })));
    }

    #[rstest]
    fn test_save_and_reload_bed() {
        let rs = make_regionset(vec![("chr1", 0, 10), ("chr2", 5, 15)]);
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("out.bed");
        rs.to_bed(&path).unwrap();

        let reloaded = RegionSet::try_from(path.as_path()).unwrap();
        assert_eq!(reloaded.identifier(), rs.identifier());
    }

    #[rstest]
    fn test_identifier_depends_on_order() {
        let a = make_regionset(vec![("chr1", 0, 10), ("chr1", 20, 30)]);
        let b = make_regionset(vec![("chr1", 20, 30), ("chr1", 0, 10)]);
        assert!(a.identifier() != b.identifier());
    }

    #[rstest]
    fn test_reduce_overlapping_and_adjacent() {
        let rs = make_regionset(vec![
            ("chr1", 10, 20),
            ("chr1", 0, 10),
            ("chr1", 15, 25),
            ("chr1", 40, 50),
            ("chr2", 0, 5),
        ]);
        let reduced = rs.reduce();
        assert_eq!(
            reduced.regions,
            vec![
                make_region("chr1", 0, 25),
                make_region("chr1", 40, 50),
                make_region("chr2", 0, 5)
            ]
        );
        assert!(reduced.is_reduced());
        assert!(!rs.is_reduced());
    }

    #[rstest]
    fn test_reduce_empty() {
        assert!(RegionSet::default().reduce().is_empty());
    }

    #[rstest]
    fn test_intersect_partial_overlaps() {
        let a = make_regionset(vec![("chr1", 1000, 2000), ("chr1", 5000, 6000)]);
        let b = make_regionset(vec![("chr1", 1000, 1500), ("chr1", 5000, 6000), ("chr2", 0, 10)]);
        let result = a.intersect(&b);
        assert_eq!(
            result.regions,
            vec![make_region("chr1", 1000, 1500), make_region("chr1", 5000, 6000)]
        );
        assert_eq!(result.total_width(), 1500);
    }

    #[rstest]
    fn test_intersect_reduces_inputs_first() {
        let a = make_regionset(vec![("chr1", 0, 100)]);
        let b = make_regionset(vec![("chr1", 10, 50), ("chr1", 20, 60)]);
        let result = a.intersect(&b);
        assert_eq!(result.regions, vec![make_region("chr1", 10, 60)]);
    }

    #[rstest]
    fn test_union() {
        let a = make_regionset(vec![("chr1", 0, 10)]);
        let b = make_regionset(vec![("chr1", 5, 20), ("chr3", 0, 1)]);
        let result = a.union(&b);
        assert_eq!(
            result.regions,
            vec![make_region("chr1", 0, 20), make_region("chr3", 0, 1)]
        );
    }

    #[rstest]
    fn test_setdiff_multiple_subtractions() {
        let a = make_regionset(vec![("chr1", 0, 20)]);
        let b = make_regionset(vec![("chr1", 2, 5), ("chr1", 8, 12), ("chr1", 15, 18)]);
        let result = a.setdiff(&b);
        assert_eq!(
            result.regions,
            vec![
                make_region("chr1", 0, 2),
                make_region("chr1", 5, 8),
                make_region("chr1", 12, 15),
                make_region("chr1", 18, 20)
            ]
        );
    }

    #[rstest]
    fn test_pad_clamps_at_zero() {
        let rs = make_regionset(vec![("chr1", 5, 10)]);
        let padded = rs.pad(10);
        assert_eq!(padded.regions[0].start, 0);
        assert_eq!(padded.regions[0].end, 20);
    }

    #[rstest]
    fn test_subset_keeps_order() {
        let rs = make_regionset(vec![("chr1", 0, 1), ("chr1", 5, 6), ("chr1", 9, 10)]);
        let sub = rs.subset(&[2, 0]);
        assert_eq!(
            sub.regions,
            vec![make_region("chr1", 9, 10), make_region("chr1", 0, 1)]
        );
    }
}
