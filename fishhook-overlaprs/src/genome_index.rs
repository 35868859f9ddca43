//! Genome-wide interval indexing for batched overlap queries.
//!
//! [`GenomeIndex`] keeps one start-sorted array per chromosome, laid out as
//! an implicit augmented interval tree: the array position is the in-order
//! position of a node, and every node also stores the largest end in its
//! subtree. A query walks the tree from the root and prunes any subtree
//! whose largest end is at or before the query start, or whose root starts
//! at or after the query end. Building costs O(|B| log |B|) and each query
//! O(log |B| + hits), so a batch is O((|A| + |B|) log(|A| + |B|) + hits)
//! whatever the nesting of queries or references.
//!
//! # Examples
//!
//! ```
//! use fishhook_core::models::{Region, RegionSet};
//! use fishhook_overlaprs::{GenomeIndex, OverlapOptions};
//!
//! let genes = RegionSet::from(vec![
//!     Region::new("chr1", 1000, 2000).unwrap(),
//!     Region::new("chr1", 5000, 6000).unwrap(),
//! ]);
//! let index = GenomeIndex::try_from(&genes).unwrap();
//!
//! let queries = RegionSet::from(vec![Region::new("chr1", 1500, 5500).unwrap()]);
//! let hits = index.find_overlaps(&queries, OverlapOptions::default());
//!
//! assert_eq!(hits[0].len(), 2);
//! assert_eq!(hits[0][0].width, 500);
//! ```

use fishhook_core::models::{RegionSet, Strand};
use fxhash::FxHashMap;

use crate::errors::OverlapError;

/// One overlap between query `query` and reference interval `subject`,
/// both given as positions in their original region sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub query: usize,
    pub subject: usize,
    /// Number of shared bases.
    pub width: u32,
}

/// Which reference intervals count as hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapMode {
    /// Any shared base.
    #[default]
    Any,
    /// The reference interval lies entirely inside the query.
    Within,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlapOptions {
    pub mode: OverlapMode,
    /// Only report hits on compatible strands.
    pub strand_aware: bool,
}

impl OverlapOptions {
    pub fn within() -> Self {
        OverlapOptions {
            mode: OverlapMode::Within,
            ..Default::default()
        }
    }

    pub fn stranded(mut self) -> Self {
        self.strand_aware = true;
        self
    }
}

/// Below this level a subtree is scanned linearly.
const SCAN_LEVEL: usize = 3;

/// Reference intervals of one chromosome, sorted by (start, end, id).
#[derive(Debug, Default)]
struct ChromIndex {
    starts: Vec<u32>,
    ends: Vec<u32>,
    /// Largest end within the subtree rooted at each position.
    max_ends: Vec<u32>,
    strands: Vec<Strand>,
    ids: Vec<usize>,
    /// Level of the root node.
    max_level: usize,
}

impl ChromIndex {
    fn len(&self) -> usize {
        self.ids.len()
    }

    ///
    /// Fill `max_ends` bottom-up. Leaves sit at even positions; a node at
    /// level `k` has children `k - 1` levels down at `i -/+ 2^(k-1)`. A right
    /// child past the end of the array takes the largest end seen so far
    /// along the right spine.
    ///
    fn augment(&mut self) {
        let n = self.len();
        self.max_ends = self.ends.clone();
        if n == 0 {
            return;
        }

        let mut last_i = 0;
        let mut last = 0;
        for i in (0..n).step_by(2) {
            last_i = i;
            last = self.ends[i];
        }

        let mut k = 1;
        while 1usize << k <= n {
            let x = 1usize << (k - 1);
            let step = x << 2;
            let mut i = (x << 1) - 1;
            while i < n {
                let left = self.max_ends[i - x];
                let right = if i + x < n { self.max_ends[i + x] } else { last };
                self.max_ends[i] = self.ends[i].max(left).max(right);
                i += step;
            }
            last_i = if (last_i >> k) & 1 == 1 { last_i - x } else { last_i + x };
            if last_i < n && self.max_ends[last_i] > last {
                last = self.max_ends[last_i];
            }
            k += 1;
        }
        self.max_level = k - 1;
    }

    ///
    /// Push the position of every interval overlapping `[start, end)` onto
    /// `out`. Returns how many positions were examined.
    ///
    fn overlapping(&self, start: u32, end: u32, out: &mut Vec<usize>) -> usize {
        let n = self.len();
        if n == 0 {
            return 0;
        }

        let mut examined = 0;
        // (level, position, left subtree already handled)
        let mut stack: Vec<(usize, usize, bool)> =
            vec![(self.max_level, (1usize << self.max_level) - 1, false)];

        while let Some((k, x, visited)) = stack.pop() {
            if k <= SCAN_LEVEL {
                let first = x >> k << k;
                let last = (first + (1usize << (k + 1)) - 1).min(n);
                for i in first..last {
                    examined += 1;
                    if self.starts[i] >= end {
                        break;
                    }
                    if start < self.ends[i] {
                        out.push(i);
                    }
                }
            } else if !visited {
                let left = x - (1usize << (k - 1));
                stack.push((k, x, true));
                if left >= n || self.max_ends[left] > start {
                    stack.push((k - 1, left, false));
                }
            } else if x < n && self.starts[x] < end {
                examined += 1;
                if start < self.ends[x] {
                    out.push(x);
                }
                stack.push((k - 1, x + (1usize << (k - 1)), false));
            }
        }

        examined
    }
}

/// A genome-wide index over a reference [`RegionSet`].
#[derive(Debug, Default)]
pub struct GenomeIndex {
    chroms: FxHashMap<String, ChromIndex>,
    len: usize,
}

impl TryFrom<&RegionSet> for GenomeIndex {
    type Error = OverlapError;

    fn try_from(rs: &RegionSet) -> Result<Self, Self::Error> {
        rs.validate()?;

        // STEP 1: bucket (start, end, strand, id) per chromosome
        let mut buckets: FxHashMap<String, Vec<(u32, u32, Strand, usize)>> =
            FxHashMap::default();
        for (id, region) in rs.regions.iter().enumerate() {
            buckets
                .entry(region.chr.clone())
                .or_default()
                .push((region.start, region.end, region.strand, id));
        }

        // STEP 2: sort every bucket and split into columns
        let chroms = buckets
            .into_iter()
            .map(|(chr, mut entries)| {
                entries.sort_unstable_by_key(|&(start, end, _, id)| (start, end, id));
                let mut index = ChromIndex::default();
                for (start, end, strand, id) in entries {
                    index.starts.push(start);
                    index.ends.push(end);
                    index.strands.push(strand);
                    index.ids.push(id);
                }
                index.augment();
                (chr, index)
            })
            .collect();

        Ok(GenomeIndex {
            chroms,
            len: rs.len(),
        })
    }
}

impl GenomeIndex {
    /// Number of indexed reference intervals.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_chr(&self, chr: &str) -> bool {
        self.chroms.contains_key(chr)
    }

    ///
    /// Find, for every query region, all overlapping reference intervals and
    /// the overlap width. The outer vector is indexed like `queries`; each
    /// inner vector is ordered by reference position. Intervals tied at
    /// identical coordinates are all reported.
    ///
    pub fn find_overlaps(&self, queries: &RegionSet, opts: OverlapOptions) -> Vec<Vec<Hit>> {
        self.find_overlaps_counted(queries, opts).0
    }

    /// [GenomeIndex::find_overlaps], also returning the number of reference
    /// positions examined.
    fn find_overlaps_counted(
        &self,
        queries: &RegionSet,
        opts: OverlapOptions,
    ) -> (Vec<Vec<Hit>>, usize) {
        let mut examined = 0;
        let mut positions: Vec<usize> = Vec::new();

        let results = queries
            .regions
            .iter()
            .enumerate()
            .map(|(qi, query)| {
                let Some(index) = self.chroms.get(&query.chr) else {
                    return Vec::new();
                };

                positions.clear();
                examined += index.overlapping(query.start, query.end, &mut positions);

                let mut hits: Vec<Hit> = positions
                    .iter()
                    .filter(|&&k| !opts.strand_aware || query.strand.compatible(&index.strands[k]))
                    .filter(|&&k| {
                        opts.mode == OverlapMode::Any
                            || (index.starts[k] >= query.start && index.ends[k] <= query.end)
                    })
                    .map(|&k| Hit {
                        query: qi,
                        subject: index.ids[k],
                        width: index.ends[k].min(query.end) - index.starts[k].max(query.start),
                    })
                    .collect();
                hits.sort_unstable_by_key(|h| h.subject);
                hits
            })
            .collect();

        (results, examined)
    }

    ///
    /// Total overlap width per query, counting every reference interval
    /// separately (overlapping references are not merged).
    ///
    pub fn overlap_widths(&self, queries: &RegionSet, opts: OverlapOptions) -> Vec<u64> {
        self.find_overlaps(queries, opts)
            .iter()
            .map(|hits| hits.iter().map(|h| h.width as u64).sum())
            .collect()
    }
}

/// A trait for converting region-based data into a [`GenomeIndex`].
pub trait IntoGenomeIndex {
    fn into_genome_index(self) -> Result<GenomeIndex, OverlapError>;
}

impl IntoGenomeIndex for RegionSet {
    fn into_genome_index(self) -> Result<GenomeIndex, OverlapError> {
        GenomeIndex::try_from(&self)
    }
}
