use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use indexmap::IndexMap;
use md5::{Digest, Md5};

use crate::errors::{RegionError, RegionResult};

/// Strand of a genomic interval. Informational unless a strand-aware
/// overlap is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Strand {
    Forward,
    Reverse,
    #[default]
    Unstranded,
}

impl Strand {
    /// Two strands are compatible when either is unstranded or both agree.
    pub fn compatible(&self, other: &Strand) -> bool {
        matches!(
            (self, other),
            (Strand::Unstranded, _) | (_, Strand::Unstranded)
        ) || self == other
    }
}

impl FromStr for Strand {
    type Err = RegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            "." | "*" | "" => Ok(Strand::Unstranded),
            other => Err(RegionError::RegionParseError(format!(
                "Invalid strand: {other}"
            ))),
        }
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
            Strand::Unstranded => "*",
        };
        write!(f, "{s}")
    }
}

///
/// Region struct, one genomic interval `[start, end)` on a chromosome
/// together with its ordered metadata columns.
///
/// Regions compare, sort and hash by `(chr, start, end)` only.
///
#[derive(Debug, Clone)]
pub struct Region {
    pub chr: String,
    pub start: u32,
    pub end: u32,
    pub strand: Strand,
    pub meta: IndexMap<String, String>,
}

impl Region {
    ///
    /// Create a validated region. Rejects `start >= end` and empty
    /// chromosome names.
    ///
    pub fn new(chr: impl Into<String>, start: u32, end: u32) -> RegionResult<Region> {
        let region = Region {
            chr: chr.into(),
            start,
            end,
            strand: Strand::Unstranded,
            meta: IndexMap::new(),
        };
        region.validate()?;
        Ok(region)
    }

    /// A single-base region at `pos`, i.e. `[pos, pos + 1)`.
    pub fn point(chr: impl Into<String>, pos: u32) -> RegionResult<Region> {
        let chr = chr.into();
        let end = pos.checked_add(1).ok_or_else(|| RegionError::MalformedInterval {
            chr: chr.clone(),
            start: pos,
            end: pos,
            reason: "position overflows coordinate space".to_string(),
        })?;
        Region::new(chr, pos, end)
    }

    pub fn with_strand(mut self, strand: Strand) -> Self {
        self.strand = strand;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    ///
    /// Check the structural invariants of this region.
    ///
    pub fn validate(&self) -> RegionResult<()> {
        if self.chr.is_empty() {
            return Err(RegionError::MalformedInterval {
                chr: self.chr.clone(),
                start: self.start,
                end: self.end,
                reason: "missing chromosome".to_string(),
            });
        }
        if self.start >= self.end {
            return Err(RegionError::MalformedInterval {
                chr: self.chr.clone(),
                start: self.start,
                end: self.end,
                reason: "start must be smaller than end".to_string(),
            });
        }
        Ok(())
    }

    ///
    /// Get length of the region
    ///
    pub fn width(&self) -> u32 {
        self.end - self.start
    }

    /// Metadata value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// Number of bases shared with `other`, zero on different chromosomes.
    #[inline]
    pub fn intersect_width(&self, other: &Region) -> u32 {
        if self.chr != other.chr {
            return 0;
        }
        self.end
            .min(other.end)
            .saturating_sub(self.start.max(other.start))
    }

    /// Check if two regions share at least one base.
    #[inline]
    pub fn overlaps(&self, other: &Region) -> bool {
        self.chr == other.chr && self.start < other.end && self.end > other.start
    }

    /// Check if `other` lies entirely inside this region.
    #[inline]
    pub fn contains(&self, other: &Region) -> bool {
        self.chr == other.chr && self.start <= other.start && other.end <= self.end
    }

    ///
    /// Get file string of Region
    ///
    pub fn as_string(&self) -> String {
        let mut line = format!("{}\t{}\t{}", self.chr, self.start, self.end);
        for value in self.meta.values() {
            line.push('\t');
            line.push_str(value);
        }
        line
    }

    ///
    /// Calculate digest for the Region
    ///
    pub fn digest(&self) -> String {
        let digest_string = format!("{},{},{}", self.chr, self.start, self.end);

        let mut hasher = Md5::new();
        hasher.update(digest_string);
        let chrom_hash = hasher.finalize();
        format!("{:x}", chrom_hash)
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.chr == other.chr && self.start == other.start && self.end == other.end
    }
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chr.hash(state);
        self.start.hash(state);
        self.end.hash(state);
    }
}

impl Ord for Region {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chr
            .cmp(&other.chr)
            .then_with(|| self.start.cmp(&other.start))
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl PartialOrd for Region {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start, self.end)
    }
}
