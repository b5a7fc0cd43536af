//! Precision-weighted fusion, market blending and temperature calibration.

use serde::Serialize;

use crate::config::Calibration;
use crate::prob::{clamp_prob, inv_logit, logit};

/// A probability together with the sample size that informed it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbabilityEstimate {
    pub p: f64,
    pub effective_n: f64,
}

impl ProbabilityEstimate {
    pub fn new(p: f64, effective_n: f64) -> Self {
        Self {
            p: clamp_prob(p),
            effective_n: effective_n.max(0.0),
        }
    }
}

/// Approximate `1 / Var(logit p)` of a binomial rate at sample size `n`.
pub fn precision_weight(p: f64, n: f64, max_precision: f64) -> f64 {
    if n.is_nan() || n <= 0.0 {
        return 0.0;
    }
    let p = clamp_prob(p);
    (n * p * (1.0 - p)).min(max_precision)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fused {
    pub p: f64,
    /// Share of the total precision carried by the second estimate.
    pub share_second: f64,
}

/// Logit-space inverse-variance average of two estimates.
///
/// An estimate with zero precision drops out entirely; when both are zero the logits are
/// averaged with equal weight.
pub fn fuse(p1: f64, n1: f64, p2: f64, n2: f64, max_precision: f64) -> Fused {
    let w1 = precision_weight(p1, n1, max_precision);
    let w2 = precision_weight(p2, n2, max_precision);
    match (w1 > 0.0, w2 > 0.0) {
        (false, false) => Fused {
            p: inv_logit((logit(p1) + logit(p2)) / 2.0),
            share_second: 0.5,
        },
        (true, false) => Fused {
            p: clamp_prob(p1),
            share_second: 0.0,
        },
        (false, true) => Fused {
            p: clamp_prob(p2),
            share_second: 1.0,
        },
        (true, true) => {
            let total = w1 + w2;
            Fused {
                p: inv_logit((w1 * logit(p1) + w2 * logit(p2)) / total),
                share_second: w2 / total,
            }
        }
    }
}

pub fn fuse_estimates(
    first: ProbabilityEstimate,
    second: ProbabilityEstimate,
    max_precision: f64,
) -> Fused {
    fuse(
        first.p,
        first.effective_n,
        second.p,
        second.effective_n,
        max_precision,
    )
}

/// `1 / odds`, or the two-way normalised share when the opposite price is known.
pub fn implied_probability(
    decimal: f64,
    opposite: Option<f64>,
    remove_margin: bool,
) -> Option<f64> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    let own = 1.0 / decimal;
    match opposite.filter(|o| remove_margin && o.is_finite() && *o > 1.0) {
        Some(o) => {
            let sum = own + 1.0 / o;
            (sum > 0.0).then(|| own / sum)
        }
        None => Some(own),
    }
}

/// `alpha * logit(p) + (1 - alpha) * logit(p_market)`; `p` unchanged without a market.
pub fn blend_with_market(p: f64, p_market: Option<f64>, alpha: f64) -> f64 {
    let Some(pm) = p_market else {
        return p;
    };
    let alpha = alpha.clamp(0.0, 1.0);
    inv_logit(alpha * logit(p) + (1.0 - alpha) * logit(pm))
}

/// Temperature scaling in logit space, clamped to `[floor, ceiling]`.
pub fn calibrate(p: f64, cal: &Calibration) -> f64 {
    let t = if cal.temperature > 1e-3 {
        cal.temperature
    } else {
        1.0
    };
    let (lo, hi) = if cal.floor <= cal.ceiling {
        (cal.floor, cal.ceiling)
    } else {
        (cal.ceiling, cal.floor)
    };
    inv_logit(logit(p) / t).clamp(lo, hi)
}
