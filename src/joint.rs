use serde::Serialize;

use crate::config::{JointParams, RhoParams};
use crate::match_data::{Market, Window};
use crate::prob::clamp_prob;

/// Correlation between the two sides' scoring indicators.
pub fn rho(params: &RhoParams, joint: &JointParams, pace_z: f64, tier_gap: i32) -> f64 {
    let pace_z = if pace_z.is_finite() { pace_z } else { 0.0 };
    let (lo, hi) = if params.min <= params.max {
        (params.min, params.max)
    } else {
        (params.max, params.min)
    };
    let raw = (params.base + params.pace_slope * pace_z).clamp(lo, hi);
    let gap_factor = (1.0 - joint.gap_decay * f64::from(tier_gap.abs())).max(joint.gap_floor);
    raw * gap_factor
}

fn bernoulli_sd_product(ph: f64, pa: f64) -> f64 {
    (ph * (1.0 - ph) * pa * (1.0 - pa)).max(0.0).sqrt()
}

/// `1 - P(neither scores)` under correlated Bernoulli sides.
pub fn at_least_one(ph: f64, pa: f64, rho: f64) -> f64 {
    let (ph, pa) = (clamp_prob(ph), clamp_prob(pa));
    let independent = (1.0 - ph) * (1.0 - pa);
    let cov = rho * bernoulli_sd_product(ph, pa);
    // P(neither) stays in [0, min(1-ph, 1-pa)], so a negative rho never drops the market
    // below the likelier side scoring.
    let upper = (1.0 - ph).min(1.0 - pa);
    let p_none = (independent - cov).clamp(0.0, upper);
    clamp_prob(1.0 - p_none)
}

/// Poisson rate whose `P(N >= 1)` equals `p`.
pub fn poisson_rate_from_prob(p: f64) -> f64 {
    -(1.0 - clamp_prob(p)).ln()
}

/// `P(N >= 2)` for a Poisson count with rate `lambda`.
pub fn poisson_at_least_two(lambda: f64) -> f64 {
    let l = lambda.max(0.0);
    1.0 - (-l).exp() * (1.0 + l)
}

pub fn synergy(joint: &JointParams, tier_gap: i32) -> f64 {
    (1.0 - joint.synergy_decay * f64::from(tier_gap.abs())).max(joint.synergy_floor)
}

pub fn at_least_two(ph: f64, pa: f64, synergy: f64) -> f64 {
    let lambda = (poisson_rate_from_prob(ph) + poisson_rate_from_prob(pa)) * synergy.max(0.0);
    clamp_prob(poisson_at_least_two(lambda))
}

pub fn both_score(ph: f64, pa: f64, rho: f64) -> f64 {
    let (ph, pa) = (clamp_prob(ph), clamp_prob(pa));
    (ph * pa + rho * bernoulli_sd_product(ph, pa)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointOutcome {
    pub p: f64,
    /// Correlation used, or the synergy factor for the two-goal market.
    pub coupling: f64,
}

/// Combine side probabilities into the market probability for `window`.
pub fn compose(
    joint: &JointParams,
    window: Window,
    market: Market,
    ph: f64,
    pa: f64,
    pace_z: f64,
    tier_gap: i32,
) -> JointOutcome {
    match market {
        Market::AtLeastOne => {
            let r = rho(&joint.at_least_one, joint, pace_z, tier_gap);
            JointOutcome {
                p: at_least_one(ph, pa, r),
                coupling: r,
            }
        }
        Market::AtLeastTwo => {
            let s = synergy(joint, tier_gap);
            JointOutcome {
                p: at_least_two(ph, pa, s),
                coupling: s,
            }
        }
        Market::BothScore => {
            let params = match window {
                Window::FirstHalf => &joint.both_score_first_half,
                Window::FullMatch => &joint.both_score_full_match,
            };
            let r = rho(params, joint, pace_z, tier_gap);
            JointOutcome {
                p: both_score(ph, pa, r),
                coupling: r,
            }
        }
    }
}
