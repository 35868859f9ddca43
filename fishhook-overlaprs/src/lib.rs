//! Overlap queries for fishhook.
//!
//! All overlap computation lives here. The scoring engine asks one question
//! of it, over and over: for each query interval, which reference intervals
//! overlap it and by how many bases. Higher-level modules (eligibility,
//! covariate annotation) wrap this for their own use but should not
//! reimplement overlap algorithms.
//!
//! ## Quick Start
//!
//! ```rust
//! use fishhook_core::models::{Region, RegionSet};
//! use fishhook_overlaprs::{GenomeIndex, OverlapOptions};
//!
//! let peaks = RegionSet::from(vec![
//!     Region::new("chr1", 100, 200).unwrap(),
//!     Region::new("chr1", 150, 300).unwrap(),
//!     Region::new("chr1", 400, 500).unwrap(),
//! ]);
//! let index = GenomeIndex::try_from(&peaks).unwrap();
//!
//! let query = RegionSet::from(vec![Region::new("chr1", 180, 250).unwrap()]);
//! let widths = index.overlap_widths(&query, OverlapOptions::default());
//! assert_eq!(widths, vec![20 + 70]);
//! ```

pub mod errors;

/// Genome-wide sorted-sweep index.
///
/// See [`GenomeIndex`] for details.
pub mod genome_index;

// re-exports
pub use self::errors::OverlapError;
pub use self::genome_index::{GenomeIndex, Hit, IntoGenomeIndex, OverlapMode, OverlapOptions};
