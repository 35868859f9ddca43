use std::io::Write;
use std::sync::Arc;

use fishhook_core::models::RegionSet;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationTable, RowStatus};
use crate::config::{ExecutionContext, FdrMethod, FishHookConfig};
use crate::errors::{FishHookError, Result};
use crate::glm::{self, Coefficient, Design, FittedModel};
use crate::statistics::{adjust_p_values, inflation_lambda, lower_tail, upper_tail};

/// Scoring result of one hypothesis. Missing values are `None`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub index: usize,
    pub observed: u64,
    pub eligible_bases: u64,
    pub predicted: Option<f64>,
    /// Events per eligible base.
    pub density_observed: Option<f64>,
    pub density_predicted: Option<f64>,
    /// Observed over predicted count.
    pub effect_size: Option<f64>,
    pub log2_effect_size: Option<f64>,
    /// Upper tail probability of the observed count.
    pub p: Option<f64>,
    /// Lower tail probability of the observed count.
    pub p_neg: Option<f64>,
    pub fdr: Option<f64>,
    pub fdr_neg: Option<f64>,
    pub status: RowStatus,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Diagnostics {
    /// QQ inflation of the hypothesis p-values.
    pub lambda: Option<f64>,
    pub alpha: f64,
    pub converged: bool,
    pub iterations: usize,
    pub log_likelihood: f64,
    pub num_fitted: usize,
    pub num_excluded: usize,
    pub fdr_method: FdrMethod,
    pub coefficients: Vec<Coefficient>,
}

/// Aggregate statistics of a summed observed and predicted count.
pub(crate) struct CountSummary {
    pub predicted: Option<f64>,
    pub density_observed: Option<f64>,
    pub density_predicted: Option<f64>,
    pub effect_size: Option<f64>,
    pub log2_effect_size: Option<f64>,
    pub p: Option<f64>,
    pub p_neg: Option<f64>,
}

impl CountSummary {
    pub(crate) fn new(observed: u64, eligible: u64, predicted: Option<f64>, alpha: f64) -> Self {
        let predicted = predicted.filter(|v| v.is_finite() && *v > 0.0);
        let per_base = |v: f64| (eligible > 0).then(|| v / eligible as f64);
        let effect_size = predicted.map(|mu| observed as f64 / mu);

        CountSummary {
            predicted,
            density_observed: per_base(observed as f64),
            density_predicted: predicted.and_then(per_base),
            effect_size,
            log2_effect_size: effect_size.filter(|e| *e > 0.0).map(f64::log2),
            p: predicted.map(|mu| upper_tail(observed, mu, alpha)),
            p_neg: predicted.map(|mu| lower_tail(observed, mu, alpha)),
        }
    }
}

///
/// Per-hypothesis scores together with the fitted background model.
///
#[derive(Debug, Clone)]
pub struct ScoreTable {
    pub hypotheses: Arc<RegionSet>,
    pub covariate_names: Vec<String>,
    pub rows: Vec<ScoreRow>,
    pub model: FittedModel,
    pub diagnostics: Diagnostics,
}

impl ScoreTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&ScoreRow> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoreRow> {
        self.rows.iter()
    }

    /// Rows with `fdr <= threshold`, in table order.
    pub fn significant(&self, threshold: f64) -> Vec<usize> {
        self.rows
            .iter()
            .filter(|r| r.fdr.is_some_and(|q| q <= threshold))
            .map(|r| r.index)
            .collect()
    }

    ///
    /// Write the table as TSV: hypothesis coordinates and metadata, then
    /// the score columns. Missing values are written as `NA`.
    ///
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let meta_names = self.hypotheses.meta_columns();

        let mut header = vec!["chr", "start", "end"];
        header.extend(meta_names.iter().map(|s| s.as_str()));
        header.extend([
            "observed",
            "eligible",
            "predicted",
            "density_observed",
            "density_predicted",
            "effect_size",
            "log2_effect_size",
            "p",
            "p_neg",
            "fdr",
            "fdr_neg",
            "status",
        ]);
        writeln!(writer, "{}", header.join("\t"))?;

        for (region, row) in self.hypotheses.regions.iter().zip(&self.rows) {
            let mut fields = vec![region.chr.clone(), region.start.to_string(), region.end.to_string()];
            fields.extend(
                meta_names
                    .iter()
                    .map(|name| region.get(name).unwrap_or("NA").to_string()),
            );
            fields.push(row.observed.to_string());
            fields.push(row.eligible_bases.to_string());
            fields.extend(
                [
                    row.predicted,
                    row.density_observed,
                    row.density_predicted,
                    row.effect_size,
                    row.log2_effect_size,
                    row.p,
                    row.p_neg,
                    row.fdr,
                    row.fdr_neg,
                ]
                .into_iter()
                .map(format_optional),
            );
            fields.push(row.status.to_string());
            writeln!(writer, "{}", fields.join("\t"))?;
        }
        Ok(())
    }
}

pub fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "NA".to_string(),
    }
}

fn score_row(table: &AnnotationTable, model: &FittedModel, index: usize, status: RowStatus) -> ScoreRow {
    let observed = table.observed[index];
    let eligible_bases = table.eligible_bases[index];
    let predicted = status.is_fitted().then(|| {
        let covariates: Vec<f64> = table.columns.iter().map(|c| c[index]).collect();
        model.predict(&covariates, eligible_bases)
    });
    let summary = CountSummary::new(observed, eligible_bases, predicted, model.alpha);
    let status = if status.is_fitted() && summary.predicted.is_none() {
        RowStatus::DegeneratePrediction
    } else {
        status
    };

    ScoreRow {
        index,
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
        status,
    }
}

///
/// Fit the background model on every fittable hypothesis and score all of
/// them. Hypotheses that cannot be fitted stay in the table with a status
/// and missing statistics.
///
pub fn score(
    table: &AnnotationTable,
    config: &FishHookConfig,
    exec: &ExecutionContext,
) -> Result<ScoreTable> {
    let statuses = table.statuses(config.min_eligible);
    let fitted: Vec<usize> = (0..table.len()).filter(|&i| statuses[i].is_fitted()).collect();
    let num_excluded = table.len() - fitted.len();

    if fitted.is_empty() {
        return Err(FishHookError::NoFittableHypotheses);
    }
    if num_excluded > 0 {
        warn!(
            "{} of {} hypotheses excluded from the fit (no or too little eligible territory, or missing covariates)",
            num_excluded,
            table.len()
        );
    }

    info!(
        "Fitting {:?} background model on {} hypotheses with {} covariate(s)",
        config.dispersion,
        fitted.len(),
        table.covariate_names.len()
    );
    let design = Design::from_table(table, &fitted);
    let model = glm::fit(&design, config)?;
    info!(
        "Fitted model: alpha = {:.4e}, converged = {}, iterations = {}",
        model.alpha, model.converged, model.iterations
    );

    let pool = exec.pool()?;
    let mut rows: Vec<ScoreRow> = pool.install(|| {
        (0..table.len())
            .into_par_iter()
            .map(|i| score_row(table, &model, i, statuses[i]))
            .collect()
    });

    let degenerate = rows
        .iter()
        .filter(|r| r.status == RowStatus::DegeneratePrediction)
        .count();
    if degenerate > 0 {
        warn!("{degenerate} fitted hypotheses have a zero or non-finite prediction and are left untested");
    }

    let p: Vec<Option<f64>> = rows.iter().map(|r| r.p).collect();
    let p_neg: Vec<Option<f64>> = rows.iter().map(|r| r.p_neg).collect();
    let fdr = adjust_p_values(&p, config.fdr_method);
    let fdr_neg = adjust_p_values(&p_neg, config.fdr_method);
    for (row, (q, q_neg)) in rows.iter_mut().zip(fdr.into_iter().zip(fdr_neg)) {
        row.fdr = q;
        row.fdr_neg = q_neg;
    }

    let observed_p: Vec<f64> = p.iter().flatten().copied().collect();
    let diagnostics = Diagnostics {
        lambda: inflation_lambda(&observed_p),
        alpha: model.alpha,
        converged: model.converged,
        iterations: model.iterations,
        log_likelihood: model.log_likelihood,
        num_fitted: fitted.len(),
        num_excluded,
        fdr_method: config.fdr_method,
        coefficients: model.coefficient_table(),
    };
    if let Some(lambda) = diagnostics.lambda {
        info!("QQ inflation lambda = {lambda:.4}");
    }

    Ok(ScoreTable {
        hypotheses: Arc::clone(&table.hypotheses),
        covariate_names: table.covariate_names.clone(),
        rows,
        model,
        diagnostics,
    })
}
