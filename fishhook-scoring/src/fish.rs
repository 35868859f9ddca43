use std::sync::Arc;

use fishhook_core::models::{Region, RegionSet};
use log::{debug, info};
use md5::{Digest, Md5};

use crate::annotation::{AnnotationTable, annotate_covariates};
use crate::config::{ExecutionContext, FishHookConfig};
use crate::covariates::{Covariate, CovariateList};
use crate::eligibility::{EligibleSlices, EventCounting, check_event_fields, observed_counts};
use crate::errors::{FishHookError, Result};
use crate::scores::{self, ScoreTable};
use crate::sets::{HypothesisSet, SetTable};

/// Annotated covariate values, stamped with the hypotheses and eligible
/// territory they were measured against.
#[derive(Debug, Clone)]
struct CachedColumn {
    fingerprint: String,
    values: Arc<Vec<f64>>,
}

fn fingerprint(hypotheses: &RegionSet, eligible: &RegionSet) -> String {
    let mut hasher = Md5::new();
    hasher.update(hypotheses.identifier());
    hasher.update(",");
    hasher.update(eligible.identifier());
    format!("{:x}", hasher.finalize())
}

///
/// The state of one analysis: hypotheses, events, eligible territory,
/// covariates and configuration, plus whatever annotations and scores have
/// been computed for them.
///
/// Annotation and scoring fill caches in place. Every other transition
/// returns a new state, carrying over the cached work that is still valid:
/// row subsets keep sliced covariate columns, dropping or adding covariates
/// keeps the other columns, new events only recount. Column buffers are
/// shared between states, never copied.
///
#[derive(Debug, Clone)]
pub struct FishHook {
    hypotheses: Arc<RegionSet>,
    events: Arc<RegionSet>,
    eligible: Arc<RegionSet>,
    covariates: CovariateList,
    config: FishHookConfig,
    fingerprint: String,
    slices: Option<Arc<EligibleSlices>>,
    observed: Option<Arc<Vec<u64>>>,
    columns: Vec<Option<CachedColumn>>,
    scores: Option<Arc<ScoreTable>>,
}

impl FishHook {
    ///
    /// Start an analysis. All intervals are validated; the eligible
    /// territory is reduced.
    ///
    pub fn new(
        hypotheses: RegionSet,
        events: RegionSet,
        eligible: RegionSet,
        config: FishHookConfig,
    ) -> Result<FishHook> {
        hypotheses.validate()?;
        events.validate()?;
        eligible.validate()?;

        let fish = FishHook {
            fingerprint: String::new(),
            hypotheses: Arc::new(hypotheses),
            events: Arc::new(events),
            eligible: Arc::new(eligible.reduce()),
            covariates: CovariateList::new(),
            config,
            slices: None,
            observed: None,
            columns: Vec::new(),
            scores: None,
        };
        check_event_fields(&fish.events, &fish.counting())?;

        info!(
            "New analysis: {} hypotheses, {} events, {} eligible bases",
            fish.hypotheses.len(),
            fish.events.len(),
            fish.eligible.total_width()
        );
        Ok(fish.restamped())
    }

    /// Builder form of [FishHook::merge_covariates].
    pub fn with_covariates(self, covariates: &CovariateList) -> Result<FishHook> {
        self.merge_covariates(covariates)
    }

    fn restamped(mut self) -> FishHook {
        self.fingerprint = fingerprint(&self.hypotheses, &self.eligible);
        self
    }

    fn counting(&self) -> EventCounting {
        EventCounting {
            dedup_key: self.config.dedup_key.clone(),
            max_events_per_sample: self.config.max_events_per_sample,
        }
    }

    fn column_is_current(&self, column: &Option<CachedColumn>) -> bool {
        column
            .as_ref()
            .is_some_and(|c| c.fingerprint == self.fingerprint)
    }

    pub fn hypotheses(&self) -> &RegionSet {
        &self.hypotheses
    }

    pub fn events(&self) -> &RegionSet {
        &self.events
    }

    /// The reduced eligible territory.
    pub fn eligible(&self) -> &RegionSet {
        &self.eligible
    }

    pub fn covariates(&self) -> &CovariateList {
        &self.covariates
    }

    pub fn config(&self) -> &FishHookConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// Whether every annotation is computed and current.
    pub fn is_annotated(&self) -> bool {
        self.slices.is_some()
            && self.observed.is_some()
            && self.columns.iter().all(|c| self.column_is_current(c))
    }

    /// Cached scores, if this state has been scored.
    pub fn scores(&self) -> Option<Arc<ScoreTable>> {
        self.scores.clone()
    }

    /// Cached values of covariate `name`, if annotated.
    pub fn covariate_values(&self, name: &str) -> Option<Arc<Vec<f64>>> {
        let position = self.covariates.position(name)?;
        self.columns[position]
            .as_ref()
            .filter(|c| c.fingerprint == self.fingerprint)
            .map(|c| Arc::clone(&c.values))
    }

    /// The annotation table, if every annotation is computed.
    pub fn annotation(&self) -> Option<AnnotationTable> {
        if !self.is_annotated() {
            return None;
        }
        let slices = self.slices.as_ref()?;
        let observed = self.observed.as_ref()?;
        Some(self.table(slices, Arc::clone(observed)))
    }

    fn table(&self, slices: &EligibleSlices, observed: Arc<Vec<u64>>) -> AnnotationTable {
        AnnotationTable {
            hypotheses: Arc::clone(&self.hypotheses),
            eligible_bases: Arc::new(slices.eligible_bases.clone()),
            observed,
            covariate_names: self.covariates.names(),
            columns: self
                .columns
                .iter()
                .flatten()
                .map(|c| Arc::clone(&c.values))
                .collect(),
        }
    }

    ///
    /// Compute whatever annotation is missing: eligible slices, observed
    /// counts and covariate columns. Columns already annotated against the
    /// current hypotheses and territory are reused as they are.
    ///
    pub fn annotate(&mut self, exec: &ExecutionContext) -> Result<AnnotationTable> {
        let slices = match &self.slices {
            Some(slices) => Arc::clone(slices),
            None => {
                let slices = Arc::new(EligibleSlices::new(&self.hypotheses, &self.eligible)?);
                self.slices = Some(Arc::clone(&slices));
                slices
            }
        };

        let observed = match &self.observed {
            Some(observed) => Arc::clone(observed),
            None => {
                let counts = observed_counts(&slices, &self.events, &self.counting())?;
                debug!("Counted {} events in eligible slices", counts.iter().sum::<u64>());
                let observed = Arc::new(counts);
                self.observed = Some(Arc::clone(&observed));
                observed
            }
        };

        let missing: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !self.column_is_current(&self.columns[i]))
            .collect();

        if missing.is_empty() {
            debug!("All {} covariate column(s) cached", self.columns.len());
        } else {
            let pending: Vec<&Covariate> = self
                .covariates
                .iter()
                .enumerate()
                .filter(|(i, _)| missing.contains(i))
                .map(|(_, c)| c)
                .collect();
            let values = annotate_covariates(&pending, &slices, exec)?;

            for (i, values) in missing.into_iter().zip(values) {
                self.columns[i] = Some(CachedColumn {
                    fingerprint: self.fingerprint.clone(),
                    values: Arc::new(values),
                });
            }
        }

        Ok(self.table(&slices, observed))
    }

    ///
    /// Score every hypothesis, annotating first if needed. Scores are
    /// cached until the next state change.
    ///
    pub fn score(&mut self, exec: &ExecutionContext) -> Result<Arc<ScoreTable>> {
        if let Some(scores) = &self.scores {
            return Ok(Arc::clone(scores));
        }
        let table = self.annotate(exec)?;
        let scores = Arc::new(scores::score(&table, &self.config, exec)?);
        self.scores = Some(Arc::clone(&scores));
        Ok(scores)
    }

    /// Score sets of hypotheses against this state's background model.
    pub fn score_sets(&mut self, sets: &[HypothesisSet], exec: &ExecutionContext) -> Result<SetTable> {
        let scores = self.score(exec)?;
        SetTable::new(scores, sets, self.config.fdr_method)
    }

    ///
    /// Keep the hypotheses at `indices`, in that order. Cached counts and
    /// covariate columns are sliced, not recomputed.
    ///
    pub fn subset_rows(&self, indices: &[usize]) -> Result<FishHook> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(FishHookError::RowOutOfRange {
                index,
                len: self.len(),
            });
        }

        let hypotheses = Arc::new(self.hypotheses.subset(indices));
        let stamp = fingerprint(&hypotheses, &self.eligible);
        let columns = self
            .columns
            .iter()
            .map(|column| {
                column
                    .as_ref()
                    .filter(|c| c.fingerprint == self.fingerprint)
                    .map(|c| CachedColumn {
                        fingerprint: stamp.clone(),
                        values: Arc::new(indices.iter().map(|&i| c.values[i]).collect()),
                    })
            })
            .collect();

        Ok(FishHook {
            hypotheses,
            fingerprint: stamp,
            slices: self.slices.as_ref().map(|s| Arc::new(s.subset(indices))),
            observed: self
                .observed
                .as_ref()
                .map(|o| Arc::new(indices.iter().map(|&i| o[i]).collect())),
            columns,
            scores: None,
            ..self.clone()
        })
    }

    /// Keep the hypotheses for which `keep(index, hypothesis)` holds.
    pub fn filter_rows(&self, keep: impl Fn(usize, &Region) -> bool) -> Result<FishHook> {
        let indices: Vec<usize> = self
            .hypotheses
            .regions
            .iter()
            .enumerate()
            .filter(|(i, r)| keep(*i, r))
            .map(|(i, _)| i)
            .collect();
        self.subset_rows(&indices)
    }

    ///
    /// Keep only the named covariates, in the given order. Their cached
    /// columns carry over.
    ///
    pub fn subset_columns(&self, names: &[&str]) -> Result<FishHook> {
        let covariates = self.covariates.select(names)?;
        let columns = names
            .iter()
            .filter_map(|name| self.covariates.position(name))
            .map(|i| self.columns[i].clone())
            .collect();
        Ok(FishHook {
            covariates,
            columns,
            scores: None,
            ..self.clone()
        })
    }

    /// Remove the named covariates.
    pub fn drop_covariates(&self, names: &[&str]) -> Result<FishHook> {
        if let Some(unknown) = names.iter().find(|n| self.covariates.position(n).is_none()) {
            return Err(FishHookError::UnknownCovariate(unknown.to_string()));
        }
        let keep: Vec<String> = self
            .covariates
            .names()
            .into_iter()
            .filter(|n| !names.contains(&n.as_str()))
            .collect();
        let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
        self.subset_columns(&keep)
    }

    ///
    /// Append covariates. Existing columns are kept; the new ones are
    /// annotated on the next [FishHook::annotate].
    ///
    pub fn merge_covariates(&self, other: &CovariateList) -> Result<FishHook> {
        let covariates = self.covariates.concat(other)?;
        let mut columns = self.columns.clone();
        columns.resize(covariates.len(), None);
        Ok(FishHook {
            covariates,
            columns,
            scores: None,
            ..self.clone()
        })
    }

    /// Swap in a new event set. Only observed counts are recomputed.
    pub fn replace_events(&self, events: RegionSet) -> Result<FishHook> {
        events.validate()?;
        check_event_fields(&events, &self.counting())?;
        Ok(FishHook {
            events: Arc::new(events),
            observed: None,
            scores: None,
            ..self.clone()
        })
    }

    /// Swap in a new eligible territory. All annotation is recomputed.
    pub fn replace_eligible(&self, eligible: RegionSet) -> Result<FishHook> {
        eligible.validate()?;
        let fish = FishHook {
            eligible: Arc::new(eligible.reduce()),
            slices: None,
            observed: None,
            columns: vec![None; self.covariates.len()],
            scores: None,
            ..self.clone()
        };
        Ok(fish.restamped())
    }

    /// Swap in new hypotheses. All annotation is recomputed.
    pub fn replace_hypotheses(&self, hypotheses: RegionSet) -> Result<FishHook> {
        hypotheses.validate()?;
        let fish = FishHook {
            hypotheses: Arc::new(hypotheses),
            slices: None,
            observed: None,
            columns: vec![None; self.covariates.len()],
            scores: None,
            ..self.clone()
        };
        Ok(fish.restamped())
    }

    ///
    /// Change the configuration. Counts are redone only when the counting
    /// rules change; scores are always dropped.
    ///
    pub fn with_config(&self, config: FishHookConfig) -> Result<FishHook> {
        let recount = self.config.counting_differs(&config);
        let fish = FishHook {
            observed: if recount { None } else { self.observed.clone() },
            config,
            scores: None,
            ..self.clone()
        };
        if recount {
            check_event_fields(&fish.events, &fish.counting())?;
        }
        Ok(fish)
    }
}
