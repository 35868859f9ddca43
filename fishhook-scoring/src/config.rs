use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Multiple-testing correction applied across fitted hypotheses (and
/// separately across sets).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FdrMethod {
    /// Benjamini–Hochberg step-up q-values.
    #[default]
    Bh,
    Bonferroni,
}

/// Count model used for the background rate.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispersionMode {
    /// Estimate an NB2 dispersion; collapses to Poisson when none is found.
    #[default]
    NegativeBinomial,
    /// Fix the dispersion at zero.
    Poisson,
}

///
/// Parameters of one analysis. Every field has a default so a partial
/// TOML table deserializes.
///
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FishHookConfig {
    /// Event metadata field identifying the source sample; `None` counts
    /// every event.
    pub dedup_key: Option<String>,
    /// Cap on events one sample contributes to a single hypothesis.
    pub max_events_per_sample: u32,
    /// Hypotheses with fewer eligible bases are reported but not fitted.
    pub min_eligible: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub fdr_method: FdrMethod,
    pub dispersion: DispersionMode,
}

impl Default for FishHookConfig {
    fn default() -> Self {
        FishHookConfig {
            dedup_key: None,
            max_events_per_sample: 1,
            min_eligible: 1,
            max_iterations: 100,
            tolerance: 1e-8,
            fdr_method: FdrMethod::default(),
            dispersion: DispersionMode::default(),
        }
    }
}

impl FishHookConfig {
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Whether switching from `self` to `other` changes observed counts.
    pub(crate) fn counting_differs(&self, other: &FishHookConfig) -> bool {
        self.dedup_key != other.dedup_key
            || self.max_events_per_sample != other.max_events_per_sample
    }
}

///
/// Degree of parallelism for annotation and scoring. Passed into each call
/// instead of living in global state; `num_threads == 0` lets rayon pick.
///
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    pub num_threads: usize,
}

impl ExecutionContext {
    pub fn new(num_threads: usize) -> Self {
        ExecutionContext { num_threads }
    }

    pub fn single_threaded() -> Self {
        ExecutionContext { num_threads: 1 }
    }

    pub(crate) fn pool(&self) -> Result<ThreadPool> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()?;
        Ok(pool)
    }
}
