//!
//! Count regression of observed events on covariates, with the log of the
//! eligible territory as offset:
//!
//! `log E[count] = b0 + b1 * x1 + ... + log(eligible_bases)`
//!
//! The Poisson model is fitted by iteratively reweighted least squares.
//! The negative binomial model alternates between a profile maximum
//! likelihood estimate of the dispersion (given the current means) and an
//! IRLS refit of the coefficients (given the dispersion).
//!
use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::digamma;

use crate::annotation::AnnotationTable;
use crate::config::{DispersionMode, FishHookConfig};
use crate::errors::{FishHookError, Result};
use crate::statistics::{MIN_DISPERSION, log_pmf, wald_p_value};

pub const INTERCEPT: &str = "(Intercept)";

/// Relative residual norm below which a design column counts as dependent.
const RANK_TOLERANCE: f64 = 1e-7;
const MAX_DISPERSION: f64 = 1e8;
const LINEAR_PREDICTOR_LIMIT: f64 = 700.0;

///
/// Design of one fit: intercept plus covariate columns over the fitted
/// rows, the counts and the log-eligible offset.
///
#[derive(Debug, Clone)]
pub struct Design {
    pub x: Array2<f64>,
    pub counts: Vec<u64>,
    pub offset: Array1<f64>,
    pub names: Vec<String>,
}

impl Design {
    /// Build the design from the given rows of `table`.
    pub fn from_table(table: &AnnotationTable, rows: &[usize]) -> Design {
        let p = table.columns.len() + 1;
        let x = Array2::from_shape_fn((rows.len(), p), |(i, j)| match j {
            0 => 1.0,
            _ => table.columns[j - 1][rows[i]],
        });

        let mut names = vec![INTERCEPT.to_string()];
        names.extend(table.covariate_names.iter().cloned());

        Design {
            x,
            counts: rows.iter().map(|&r| table.observed[r]).collect(),
            offset: rows
                .iter()
                .map(|&r| (table.eligible_bases[r] as f64).ln())
                .collect(),
            names,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.x.nrows()
    }

    ///
    /// Names of columns that are linear combinations of earlier columns,
    /// found by modified Gram–Schmidt in column order.
    ///
    pub fn dependent_columns(&self) -> Vec<String> {
        let mut basis: Vec<Array1<f64>> = Vec::new();
        let mut dependent = Vec::new();

        for (j, column) in self.x.axis_iter(Axis(1)).enumerate() {
            let original = column.dot(&column).sqrt();
            let mut v = column.to_owned();
            for q in &basis {
                let projection = q.dot(&v);
                v.scaled_add(-projection, q);
            }
            let norm = v.dot(&v).sqrt();

            if original == 0.0 || norm <= RANK_TOLERANCE * original {
                dependent.push(self.names[j].clone());
            } else {
                basis.push(v / norm);
            }
        }
        dependent
    }
}

/// One row of the coefficient table.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z_value: f64,
    pub p_value: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FittedModel {
    pub names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    /// NB2 dispersion, 0 for Poisson.
    pub alpha: f64,
    pub converged: bool,
    pub iterations: usize,
    pub log_likelihood: f64,
    pub num_observations: usize,
}

impl FittedModel {
    /// Expected count for a hypothesis with the given covariate values.
    pub fn predict(&self, covariates: &[f64], eligible_bases: u64) -> f64 {
        let eta = self.coefficients[0]
            + self.coefficients[1..]
                .iter()
                .zip(covariates)
                .map(|(b, x)| b * x)
                .sum::<f64>()
            + (eligible_bases as f64).ln();
        eta.min(LINEAR_PREDICTOR_LIMIT).exp()
    }

    pub fn coefficient_table(&self) -> Vec<Coefficient> {
        self.names
            .iter()
            .zip(self.coefficients.iter().zip(&self.std_errors))
            .map(|(name, (&estimate, &std_error))| {
                let z_value = estimate / std_error;
                Coefficient {
                    name: name.clone(),
                    estimate,
                    std_error,
                    z_value,
                    p_value: wald_p_value(z_value),
                }
            })
            .collect()
    }
}

fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0 && sum.is_finite()) {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L L^T x = b`.
fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let s: f64 = (0..i).map(|k| l[[i, k]] * y[k]).sum();
        y[i] = (b[i] - s) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let s: f64 = (i + 1..n).map(|k| l[[k, i]] * x[k]).sum();
        x[i] = (y[i] - s) / l[[i, i]];
    }
    x
}

/// Diagonal of `(L L^T)^-1`.
fn inverse_diagonal(l: &Array2<f64>) -> Vec<f64> {
    let n = l.nrows();
    (0..n)
        .map(|j| {
            let mut e = Array1::<f64>::zeros(n);
            e[j] = 1.0;
            cholesky_solve(l, &e)[j]
        })
        .collect()
}

/// `X^T W X` and `X^T W z`.
fn weighted_normal_equations(
    x: &Array2<f64>,
    w: &Array1<f64>,
    z: &Array1<f64>,
) -> (Array2<f64>, Array1<f64>) {
    let xw = x * &w.view().insert_axis(Axis(1));
    (xw.t().dot(x), xw.t().dot(z))
}

fn irls_weights(mu: &Array1<f64>, alpha: f64) -> Array1<f64> {
    mu.mapv(|m| m / (1.0 + alpha * m))
}

fn deviance(counts: &[u64], mu: &Array1<f64>, alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let y = y as f64;
            let saturated = if y > 0.0 { y * (y / m).ln() } else { 0.0 };
            if alpha < MIN_DISPERSION {
                2.0 * (saturated - (y - m))
            } else {
                let r = 1.0 / alpha;
                2.0 * (saturated - (y + r) * ((y + r) / (m + r)).ln())
            }
        })
        .sum()
}

struct IrlsFit {
    beta: Array1<f64>,
    mu: Array1<f64>,
    iterations: usize,
    converged: bool,
}

///
/// Fit the coefficients for a fixed dispersion. Starts from `start` when
/// given, otherwise from `mu = y + 0.1`.
///
fn irls(
    design: &Design,
    alpha: f64,
    start: Option<&Array1<f64>>,
    config: &FishHookConfig,
) -> Result<IrlsFit> {
    let y: Array1<f64> = design.counts.iter().map(|&c| c as f64).collect();

    let mut eta = match start {
        Some(beta) => design.x.dot(beta) + &design.offset,
        None => y.mapv(|v| (v + 0.1).ln()),
    };
    let mut mu = eta.mapv(f64::exp);
    let mut beta = Array1::<f64>::zeros(design.x.ncols());
    let mut dev_old = deviance(&design.counts, &mu, alpha);

    for iteration in 1..=config.max_iterations {
        let w = irls_weights(&mu, alpha);
        let z = (&eta - &design.offset) + (&y - &mu) / &mu;

        let (xtwx, xtwz) = weighted_normal_equations(&design.x, &w, &z);
        let l = cholesky(&xtwx).ok_or_else(|| FishHookError::SingularDesign {
            covariates: design.names.clone(),
        })?;
        beta = cholesky_solve(&l, &xtwz);

        eta = (design.x.dot(&beta) + &design.offset)
            .mapv(|v| v.clamp(-LINEAR_PREDICTOR_LIMIT, LINEAR_PREDICTOR_LIMIT));
        mu = eta.mapv(f64::exp);

        let dev = deviance(&design.counts, &mu, alpha);
        if (dev - dev_old).abs() / (dev.abs() + 0.1) < config.tolerance {
            return Ok(IrlsFit {
                beta,
                mu,
                iterations: iteration,
                converged: true,
            });
        }
        dev_old = dev;
    }

    Ok(IrlsFit {
        beta,
        mu,
        iterations: config.max_iterations,
        converged: false,
    })
}

/// `sum_{j < y} 1 / (j + r)`, i.e. `digamma(y + r) - digamma(r)`.
fn digamma_difference(y: u64, r: f64) -> f64 {
    if y < 1000 {
        (0..y).map(|j| 1.0 / (j as f64 + r)).sum()
    } else {
        digamma(y as f64 + r) - digamma(r)
    }
}

/// Derivative of the NB2 log-likelihood with respect to `alpha`.
fn dispersion_score(counts: &[u64], mu: &Array1<f64>, alpha: f64) -> f64 {
    let r = 1.0 / alpha;
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let am = alpha * m;
            ((am.ln_1p() - digamma_difference(y, r)) / (alpha * alpha))
                + (y as f64 - m) / (alpha * (1.0 + am))
        })
        .sum()
}

///
/// Profile maximum likelihood NB2 dispersion for fixed means.
///
/// Returns 0 when the score at `alpha -> 0+` is not positive, i.e. the
/// counts show no overdispersion; otherwise bisects the score on a log
/// scale.
///
pub fn estimate_dispersion(counts: &[u64], mu: &Array1<f64>) -> f64 {
    let boundary: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let y = y as f64;
            ((y - m).powi(2) - y) / 2.0
        })
        .sum();
    if boundary <= 0.0 {
        return 0.0;
    }

    let mut lo = MIN_DISPERSION;
    let mut hi = 1.0;
    while dispersion_score(counts, mu, hi) > 0.0 {
        if hi >= MAX_DISPERSION {
            return MAX_DISPERSION;
        }
        lo = hi;
        hi *= 10.0;
    }

    for _ in 0..200 {
        let mid = (lo * hi).sqrt();
        if dispersion_score(counts, mu, mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi / lo - 1.0 < 1e-12 {
            break;
        }
    }

    let alpha = (lo * hi).sqrt();
    if alpha <= MIN_DISPERSION { 0.0 } else { alpha }
}

fn log_likelihood(counts: &[u64], mu: &Array1<f64>, alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| log_pmf(y, m, alpha))
        .sum()
}

///
/// Fit the background model.
///
/// Fails with [FishHookError::SingularDesign] before any iteration when
/// the design columns are linearly dependent. Hitting the iteration cap is
/// not an error: the model is returned with `converged == false`.
///
pub fn fit(design: &Design, config: &FishHookConfig) -> Result<FittedModel> {
    let dependent = design.dependent_columns();
    if !dependent.is_empty() {
        return Err(FishHookError::SingularDesign {
            covariates: dependent,
        });
    }

    let mut current = irls(design, 0.0, None, config)?;
    let mut alpha = 0.0;
    let mut iterations = current.iterations;
    let mut converged = current.converged;

    if config.dispersion == DispersionMode::NegativeBinomial {
        converged = false;
        let scale = (2.0 * (design.num_rows().saturating_sub(design.x.ncols())).max(1) as f64).sqrt();
        let mut ll_old = log_likelihood(&design.counts, &current.mu, alpha);

        for outer in 1..=config.max_iterations {
            let next_alpha = estimate_dispersion(&design.counts, &current.mu);
            if next_alpha == 0.0 && alpha == 0.0 {
                debug!("No overdispersion detected; keeping the Poisson fit");
                converged = current.converged;
                break;
            }

            current = irls(design, next_alpha, Some(&current.beta), config)?;
            iterations += current.iterations;

            let ll = log_likelihood(&design.counts, &current.mu, next_alpha);
            let alpha_change = (next_alpha - alpha).abs() / next_alpha.max(alpha).max(MIN_DISPERSION);
            let ll_change = (ll - ll_old).abs() / scale;
            debug!("Outer iteration {outer}: alpha = {next_alpha:.6e}, loglik = {ll:.6}");

            alpha = next_alpha;
            ll_old = ll;

            if alpha_change < config.tolerance.sqrt() && ll_change < config.tolerance {
                converged = current.converged;
                break;
            }
        }
    }

    if !converged {
        warn!(
            "Model fit did not converge within {} iterations; results are flagged",
            config.max_iterations
        );
    }

    let w = irls_weights(&current.mu, alpha);
    let xw = &design.x * &w.view().insert_axis(Axis(1));
    let information = xw.t().dot(&design.x);
    let l = cholesky(&information).ok_or_else(|| FishHookError::SingularDesign {
        covariates: design.names.clone(),
    })?;
    let std_errors = inverse_diagonal(&l).into_iter().map(f64::sqrt).collect();

    Ok(FittedModel {
        names: design.names.clone(),
        coefficients: current.beta.to_vec(),
        std_errors,
        alpha,
        converged,
        iterations,
        log_likelihood: log_likelihood(&design.counts, &current.mu, alpha),
        num_observations: design.num_rows(),
    })
}
