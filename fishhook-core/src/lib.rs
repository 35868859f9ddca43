//! Core models for fishhook: genomic intervals, interval sets and the
//! interval algebra (reduce, union, intersect, setdiff) the scoring
//! engine is built on.
//!
//! All coordinates are 0-based half-open `[start, end)`.
//!
//! ```rust
//! use fishhook_core::models::{Region, RegionSet};
//!
//! let genes = RegionSet::from(vec![
//!     Region::new("chr1", 1000, 2000).unwrap(),
//!     Region::new("chr1", 5000, 6000).unwrap(),
//! ]);
//! let eligible = RegionSet::from(vec![
//!     Region::new("chr1", 1000, 1500).unwrap(),
//!     Region::new("chr1", 5000, 6000).unwrap(),
//! ]);
//!
//! assert_eq!(genes.intersect(&eligible).total_width(), 1500);
//! ```
pub mod errors;
pub mod models;
pub mod utils;

pub use errors::{RegionError, RegionResult};
