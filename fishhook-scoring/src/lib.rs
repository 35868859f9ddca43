//! Covariate-corrected recurrence scoring for genomic hypotheses.
//!
//! Given hypotheses (genes, enhancers, bins), somatic mutation events and
//! the territory where events could have been observed, this crate fits a
//! count regression of observed events on covariates with the log of the
//! eligible territory as offset, then reports for every hypothesis how
//! surprising its count is under that background.
//!
//! - [eligibility]: eligible slices and observed counts
//! - [covariates] and [annotation]: covariate values per hypothesis
//! - [glm]: Poisson and negative binomial regression
//! - [scores] and [sets]: p-values, q-values and set aggregates
//! - [fish]: the analysis state tying it all together
//!
//! # Example
//!
//! ```rust
//! use fishhook_core::models::{Region, RegionSet};
//! use fishhook_scoring::{ExecutionContext, FishHook, FishHookConfig};
//!
//! let hypotheses = RegionSet::from(vec![
//!     Region::new("chr1", 1000, 2000).unwrap(),
//!     Region::new("chr1", 5000, 6000).unwrap(),
//! ]);
//! let events = RegionSet::from(vec![
//!     Region::point("chr1", 1200).unwrap(),
//!     Region::point("chr1", 5500).unwrap(),
//! ]);
//! let eligible = RegionSet::from(vec![Region::new("chr1", 0, 10_000).unwrap()]);
//!
//! let mut fish = FishHook::new(hypotheses, events, eligible, FishHookConfig::default()).unwrap();
//! let scores = fish.score(&ExecutionContext::default()).unwrap();
//! assert_eq!(scores.len(), 2);
//! ```

pub mod annotation;
pub mod config;
pub mod covariates;
pub mod eligibility;
pub mod errors;
pub mod fish;
pub mod glm;
pub mod scores;
pub mod sets;
pub mod statistics;

// re-exports
pub use self::annotation::{AnnotationRow, AnnotationTable, RowStatus};
pub use self::config::{DispersionMode, ExecutionContext, FdrMethod, FishHookConfig};
pub use self::covariates::{Covariate, CovariateKind, CovariateList};
pub use self::errors::{FishHookError, Result};
pub use self::fish::FishHook;
pub use self::glm::{Coefficient, FittedModel};
pub use self::scores::{Diagnostics, ScoreRow, ScoreTable};
pub use self::sets::{HypothesisSet, SetResult, SetTable};
