//!
//! Count tail probabilities, multiple-testing adjustment and the QQ
//! inflation statistic.
//!
//! Negative binomial distributions use the NB2 parameterization: mean `mu`,
//! variance `mu + alpha * mu^2`. `alpha == 0` is the Poisson limit.
//!
use statrs::function::beta::beta_reg;
use statrs::function::erf::erfc;
use statrs::function::gamma::{gamma_lr, gamma_ur, ln_gamma};

use crate::config::FdrMethod;

/// Below this the dispersion is treated as zero.
pub const MIN_DISPERSION: f64 = 1e-10;

///
/// `P(Y >= y)` for `Y ~ NB2(mu, alpha)`. `mu` must be positive.
///
pub fn upper_tail(y: u64, mu: f64, alpha: f64) -> f64 {
    if y == 0 {
        return 1.0;
    }
    let y = y as f64;
    let p = if alpha < MIN_DISPERSION {
        gamma_lr(y, mu)
    } else {
        let r = 1.0 / alpha;
        beta_reg(y, r, mu / (r + mu))
    };
    p.clamp(0.0, 1.0)
}

///
/// `P(Y <= y)` for `Y ~ NB2(mu, alpha)`. `mu` must be positive.
///
pub fn lower_tail(y: u64, mu: f64, alpha: f64) -> f64 {
    let y = y as f64;
    let p = if alpha < MIN_DISPERSION {
        gamma_ur(y + 1.0, mu)
    } else {
        let r = 1.0 / alpha;
        beta_reg(r, y + 1.0, r / (r + mu))
    };
    p.clamp(0.0, 1.0)
}

/// Log probability mass of `y` under `NB2(mu, alpha)`.
pub fn log_pmf(y: u64, mu: f64, alpha: f64) -> f64 {
    let y = y as f64;
    if alpha < MIN_DISPERSION {
        return y * mu.ln() - mu - ln_gamma(y + 1.0);
    }
    let r = 1.0 / alpha;
    ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0) + r * (r / (r + mu)).ln()
        + y * (mu / (r + mu)).ln()
}

/// Two-sided p-value of a standard normal statistic.
pub fn wald_p_value(z: f64) -> f64 {
    erfc(z.abs() / std::f64::consts::SQRT_2)
}

///
/// Benjamini–Hochberg q-values: monotone in `p` and capped at 1.
///
pub fn benjamini_hochberg(p: &[f64]) -> Vec<f64> {
    let n = p.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p[b].total_cmp(&p[a]));

    let mut q = vec![0.0; n];
    let mut running = 1.0f64;
    for (k, &i) in order.iter().enumerate() {
        let rank = (n - k) as f64;
        running = running.min(p[i] * n as f64 / rank);
        q[i] = running.min(1.0);
    }
    q
}

pub fn bonferroni(p: &[f64]) -> Vec<f64> {
    let n = p.len() as f64;
    p.iter().map(|&v| (v * n).min(1.0)).collect()
}

///
/// Adjust the present p-values with `method`; missing entries stay missing
/// and do not count towards the number of tests.
///
pub fn adjust_p_values(p: &[Option<f64>], method: FdrMethod) -> Vec<Option<f64>> {
    let present: Vec<f64> = p.iter().flatten().copied().collect();
    let adjusted = match method {
        FdrMethod::Bh => benjamini_hochberg(&present),
        FdrMethod::Bonferroni => bonferroni(&present),
    };

    let mut adjusted = adjusted.into_iter();
    p.iter()
        .map(|v| v.and_then(|_| adjusted.next()))
        .collect()
}

///
/// Genomic inflation: least-squares slope, through the origin, of observed
/// against expected `-log10 p` on a QQ plot. `None` without p-values.
///
pub fn inflation_lambda(p: &[f64]) -> Option<f64> {
    if p.is_empty() {
        return None;
    }
    let n = p.len() as f64;
    let mut sorted: Vec<f64> = p.iter().map(|v| v.max(f64::MIN_POSITIVE)).collect();
    sorted.sort_by(f64::total_cmp);

    let (mut xy, mut xx) = (0.0, 0.0);
    for (i, observed) in sorted.iter().enumerate() {
        let expected = -((i + 1) as f64 / n).log10();
        xy += expected * -observed.log10();
        xx += expected * expected;
    }

    if xx == 0.0 { None } else { Some(xy / xx) }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[rstest]
    #[case(0, 1.0)]
    #[case(1, 1.0 - (-2.0f64).exp())]
    fn test_poisson_upper_tail(#[case] y: u64, #[case] expected: f64) {
        assert_close(upper_tail(y, 2.0, 0.0), expected);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(7)]
    fn test_geometric_tails(#[case] y: u64) {
        // alpha = 1 is a geometric distribution with P(Y >= y) = q^y
        let mu = 2.0;
        let q: f64 = mu / (1.0 + mu);
        assert_close(upper_tail(y, mu, 1.0), q.powi(y as i32));
        assert_close(lower_tail(y, mu, 1.0), 1.0 - q.powi(y as i32 + 1));
    }

    #[rstest]
    fn test_tails_are_complementary() {
        for y in 1..10u64 {
            let upper = upper_tail(y, 3.5, 0.4);
            let lower = lower_tail(y - 1, 3.5, 0.4);
            assert_close(upper + lower, 1.0);
        }
    }

    #[rstest]
    fn test_log_pmf_sums_to_one() {
        let total: f64 = (0..400u64).map(|y| log_pmf(y, 4.0, 0.3).exp()).sum();
        assert_close(total, 1.0);
    }

    #[rstest]
    fn test_small_dispersion_approaches_poisson() {
        let nb = upper_tail(5, 2.0, 1e-7);
        let poisson = upper_tail(5, 2.0, 0.0);
        assert!((nb - poisson).abs() < 1e-5);
    }

    #[rstest]
    fn test_benjamini_hochberg() {
        let q = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.005]);
        for (got, expected) in q.iter().zip([0.02, 0.04, 0.04, 0.02]) {
            assert_close(*got, expected);
        }
    }

    #[rstest]
    fn test_bh_is_monotone_and_capped() {
        let p = [0.9, 0.2, 0.5, 0.01, 0.7, 0.3];
        let q = benjamini_hochberg(&p);
        for i in 0..p.len() {
            assert!(q[i] >= p[i] && q[i] <= 1.0);
            for j in 0..p.len() {
                if p[i] <= p[j] {
                    assert!(q[i] <= q[j]);
                }
            }
        }
    }

    #[rstest]
    fn test_missing_values_are_not_tests() {
        let q = adjust_p_values(&[Some(0.01), None, Some(0.02)], FdrMethod::Bonferroni);
        assert_eq!(q, vec![Some(0.02), None, Some(0.04)]);
    }

    #[rstest]
    fn test_lambda_of_uniform_quantiles_is_one() {
        let p: Vec<f64> = (1..=50).map(|i| i as f64 / 50.0).collect();
        assert_close(inflation_lambda(&p).unwrap(), 1.0);
        assert_eq!(inflation_lambda(&[]), None);
    }

    #[rstest]
    fn test_lambda_flags_inflation() {
        let p: Vec<f64> = (1..=50).map(|i| (i as f64 / 50.0).powi(2)).collect();
        assert_close(inflation_lambda(&p).unwrap(), 2.0);
    }

    #[rstest]
    fn test_wald_p_value() {
        assert_close(wald_p_value(0.0), 1.0);
        assert!((wald_p_value(1.959963984540054) - 0.05).abs() < 1e-9);
    }
}
