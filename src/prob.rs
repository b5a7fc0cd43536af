//! Scalar probability helpers shared by every stage of the engine.

use std::cmp::Ordering;

pub const P_EPS: f64 = 1e-6;

/// Clamp into the open interval `(P_EPS, 1 - P_EPS)`; NaN maps to 0.5.
pub fn clamp_prob(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(P_EPS, 1.0 - P_EPS)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

pub fn inv_logit(z: f64) -> f64 {
    if z.is_nan() {
        return 0.5;
    }
    let p = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    clamp_prob(p)
}

/// Empirical-Bayes shrink of `hits / total` toward `m` with pseudo-count `tau`.
///
/// Returns `m` exactly when `total <= 0`.
pub fn beta_shrunk_rate(hits: f64, total: f64, m: f64, tau: f64) -> f64 {
    if total <= 0.0 {
        return m;
    }
    let tau = tau.max(0.0);
    let den = total + tau;
    if den <= 0.0 {
        return m;
    }
    (hits + m * tau) / den
}

/// `exp(-i / lambda)`; a non-finite or non-positive lambda disables decay.
pub fn recency_weight(i: usize, lambda: f64) -> f64 {
    if !lambda.is_finite() || lambda <= 0.0 {
        return 1.0;
    }
    (-(i as f64) / lambda).exp()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedCount {
    pub hits: f64,
    pub total: f64,
}

impl WeightedCount {
    pub fn push(&mut self, hit: bool, weight: f64) {
        self.total += weight;
        if hit {
            self.hits += weight;
        }
    }

    pub fn rate(&self) -> Option<f64> {
        (self.total > 0.0).then(|| self.hits / self.total)
    }

    pub fn shrunk(&self, m: f64, tau: f64) -> f64 {
        beta_shrunk_rate(self.hits, self.total, m, tau)
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation with an `n - 1` denominator.
pub fn sample_sd(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mu = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - mu).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Linear-interpolated order statistic, `q` in `[0, 1]`.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Standard score; zero when either input is missing or the spread is degenerate.
pub fn z_score(x: Option<f64>, mu: f64, sd: f64) -> f64 {
    match x {
        Some(x) if sd > 1e-9 && x.is_finite() => (x - mu) / sd,
        _ => 0.0,
    }
}

/// Reliability `n / (n + k)`.
pub fn reliability(n: f64, k: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    n / (n + k.max(1e-9))
}

/// Geometric mean of two non-negative values, `None` when either is missing.
pub fn geo_mean(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    Some((a.max(0.0) * b.max(0.0)).sqrt())
}

/// `ln(mult)` guarded against non-positive multipliers.
pub fn ln_mult(mult: f64) -> f64 {
    if mult.is_finite() && mult > 0.0 {
        mult.ln()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{
        beta_shrunk_rate, clamp_prob, inv_logit, logit, percentile, recency_weight, sample_sd,
        z_score,
    };

    #[test]
    fn shrink_with_no_observations_returns_prior_exactly() {
        for m in [0.01, 0.2, 0.55, 0.93] {
            for tau in [0.5, 8.0, 40.0] {
                assert_eq!(beta_shrunk_rate(0.0, 0.0, m, tau), m);
                assert_eq!(beta_shrunk_rate(3.0, 0.0, m, tau), m);
            }
        }
    }

    #[test]
    fn shrink_pulls_toward_prior() {
        let r = beta_shrunk_rate(4.0, 10.0, 0.55, 8.0);
        assert!((r - 8.4 / 18.0).abs() < 1e-12);
        assert!(r > 0.4 && r < 0.55);
    }

    #[test]
    fn logit_round_trip_and_clamp() {
        for p in [0.03, 0.5, 0.77] {
            assert!((inv_logit(logit(p)) - p).abs() < 1e-9);
        }
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
        assert!(clamp_prob(1.0) < 1.0);
        assert!(inv_logit(800.0) < 1.0);
        assert!(inv_logit(-800.0) > 0.0);
    }

    #[test]
    fn recency_weight_decays() {
        assert_eq!(recency_weight(0, 5.0), 1.0);
        assert!(recency_weight(3, 5.0) < recency_weight(2, 5.0));
        assert_eq!(recency_weight(9, f64::INFINITY), 1.0);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.5), Some(3.0));
        let p95 = percentile(&v, 0.95).unwrap();
        assert!((p95 - 4.8).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn sd_needs_two_samples() {
        assert_eq!(sample_sd(&[3.0]), None);
        let sd = sample_sd(&[2.0, 4.0]).unwrap();
        assert!((sd - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn missing_z_is_neutral() {
        assert_eq!(z_score(None, 1.0, 2.0), 0.0);
        assert_eq!(z_score(Some(5.0), 1.0, 0.0), 0.0);
        assert_eq!(z_score(Some(5.0), 1.0, 2.0), 2.0);
    }
}
