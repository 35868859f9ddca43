//!
//! Sets of hypotheses (pathways, gene families) scored against the same
//! background model as their members.
//!
use std::io::Write;
use std::sync::Arc;

use fishhook_core::models::RegionSet;
use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::config::FdrMethod;
use crate::errors::{FishHookError, Result};
use crate::scores::{CountSummary, ScoreRow, ScoreTable, format_optional};
use crate::statistics::adjust_p_values;

///
/// A named set of hypothesis indices. Duplicates are dropped, keeping the
/// first occurrence.
///
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HypothesisSet {
    name: String,
    members: Vec<usize>,
}

impl HypothesisSet {
    pub fn new(
        name: impl Into<String>,
        members: impl IntoIterator<Item = usize>,
        num_hypotheses: usize,
    ) -> Result<HypothesisSet> {
        let name = name.into();
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut unique = Vec::new();
        for index in members {
            if index >= num_hypotheses {
                return Err(FishHookError::InvalidSetReference {
                    set: name,
                    index,
                    len: num_hypotheses,
                });
            }
            if seen.insert(index) {
                unique.push(index);
            }
        }
        Ok(HypothesisSet {
            name,
            members: unique,
        })
    }

    ///
    /// Resolve members by the value of metadata field `field`, e.g. gene
    /// names. Every hypothesis carrying a listed identifier joins the set.
    ///
    pub fn from_identifiers(
        name: impl Into<String>,
        identifiers: &[&str],
        hypotheses: &RegionSet,
        field: &str,
    ) -> Result<HypothesisSet> {
        let name = name.into();
        let mut lookup: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        for (i, region) in hypotheses.regions.iter().enumerate() {
            if let Some(value) = region.get(field) {
                lookup.entry(value).or_default().push(i);
            }
        }

        let mut members = Vec::new();
        for identifier in identifiers {
            let indices = lookup
                .get(identifier)
                .ok_or_else(|| FishHookError::UnknownSetIdentifier {
                    set: name.clone(),
                    identifier: identifier.to_string(),
                })?;
            members.extend(indices);
        }
        HypothesisSet::new(name, members, hypotheses.len())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.members.contains(&index)
    }
}

/// Aggregate score of one set.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SetResult {
    pub name: String,
    pub num_members: usize,
    /// Members that entered the fit and contribute to the sums.
    pub num_scored: usize,
    pub observed: u64,
    pub eligible_bases: u64,
    pub predicted: Option<f64>,
    pub density_observed: Option<f64>,
    pub density_predicted: Option<f64>,
    pub effect_size: Option<f64>,
    pub log2_effect_size: Option<f64>,
    pub p: Option<f64>,
    pub p_neg: Option<f64>,
    pub fdr: Option<f64>,
    pub fdr_neg: Option<f64>,
    pub members: Vec<usize>,
}

fn score_set(set: &HypothesisSet, scores: &ScoreTable) -> SetResult {
    let scored: Vec<&ScoreRow> = set
        .members
        .iter()
        .map(|&i| &scores.rows[i])
        .filter(|row| row.status.is_fitted())
        .collect();

    let observed: u64 = scored.iter().map(|r| r.observed).sum();
    let eligible_bases: u64 = scored.iter().map(|r| r.eligible_bases).sum();
    let predicted: Option<f64> = (!scored.is_empty())
        .then(|| scored.iter().filter_map(|r| r.predicted).sum());
    let summary = CountSummary::new(observed, eligible_bases, predicted, scores.model.alpha);

    SetResult {
        name: set.name.clone(),
        num_members: set.len(),
        num_scored: scored.len(),
        observed,
        eligible_bases,
        predicted: summary.predicted,
        density_observed: summary.density_observed,
        density_predicted: summary.density_predicted,
        effect_size: summary.effect_size,
        log2_effect_size: summary.log2_effect_size,
        p: summary.p,
        p_neg: summary.p_neg,
        fdr: None,
        fdr_neg: None,
        members: set.members.clone(),
    }
}

///
/// Scores of a collection of sets, with their own multiple-testing
/// correction, tied to the hypothesis scores they were computed from.
///
#[derive(Debug, Clone)]
pub struct SetTable {
    pub scores: Arc<ScoreTable>,
    pub results: Vec<SetResult>,
}

impl SetTable {
    pub fn new(scores: Arc<ScoreTable>, sets: &[HypothesisSet], method: FdrMethod) -> Result<SetTable> {
        for set in sets {
            if let Some(&index) = set.members.iter().find(|&&i| i >= scores.len()) {
                return Err(FishHookError::InvalidSetReference {
                    set: set.name.clone(),
                    index,
                    len: scores.len(),
                });
            }
        }

        let mut results: Vec<SetResult> = sets.iter().map(|s| score_set(s, &scores)).collect();

        let p: Vec<Option<f64>> = results.iter().map(|r| r.p).collect();
        let p_neg: Vec<Option<f64>> = results.iter().map(|r| r.p_neg).collect();
        let fdr = adjust_p_values(&p, method);
        let fdr_neg = adjust_p_values(&p_neg, method);
        for (result, (q, q_neg)) in results.iter_mut().zip(fdr.into_iter().zip(fdr_neg)) {
            result.fdr = q;
            result.fdr_neg = q_neg;
        }

        Ok(SetTable { scores, results })
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SetResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Score rows of the members of `result`, in member order.
    pub fn member_scores<'a>(&'a self, result: &'a SetResult) -> impl Iterator<Item = &'a ScoreRow> {
        result.members.iter().map(|&i| &self.scores.rows[i])
    }

    /// Member rows ordered by ascending p-value; members outside the fit
    /// come last, in member order.
    pub fn ranked_members<'a>(&'a self, result: &'a SetResult) -> Vec<&'a ScoreRow> {
        let mut rows: Vec<&ScoreRow> = self.member_scores(result).collect();
        rows.sort_by(|a, b| match (a.p, b.p) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        rows
    }

    fn filtered(&self, keep: impl Fn(&SetResult) -> bool) -> SetTable {
        SetTable {
            scores: Arc::clone(&self.scores),
            results: self.results.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Sets that include hypothesis `index`. Q-values are kept as computed.
    pub fn containing(&self, index: usize) -> SetTable {
        self.filtered(|r| r.members.contains(&index))
    }

    /// Sets that do not include hypothesis `index`.
    pub fn excluding(&self, index: usize) -> SetTable {
        self.filtered(|r| !r.members.contains(&index))
    }

    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(
            writer,
            "name\tnum_members\tnum_scored\tobserved\teligible\tpredicted\tdensity_observed\tdensity_predicted\teffect_size\tlog2_effect_size\tp\tp_neg\tfdr\tfdr_neg"
        )?;
        for r in &self.results {
            let stats: Vec<String> = [
                r.predicted,
                r.density_observed,
                r.density_predicted,
                r.effect_size,
                r.log2_effect_size,
                r.p,
                r.p_neg,
                r.fdr,
                r.fdr_neg,
            ]
            .into_iter()
            .map(format_optional)
            .collect();
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}",
                r.name,
                r.num_members,
                r.num_scored,
                r.observed,
                r.eligible_bases,
                stats.join("\t")
            )?;
        }
        Ok(())
    }
}
