//! Per-side logit model: the probability that one team scores in the window, built from
//! expected micro statistics, finishing profiles, strengths and match context.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{EngineConfig, ModelWeights, ProfileParams};
use crate::features::{MatchFeatures, fallback_side_baseline};
use crate::fusion::calibrate;
use crate::league_baseline::LeagueBaseline;
use crate::match_data::Side;
use crate::micro_stats::{POSSESSION_MAX, POSSESSION_MIN, StatKind};
use crate::prob::{inv_logit, ln_mult, logit, z_score};

const FINISH_CLAMP: (f64, f64) = (0.01, 0.99);
const REST_SPAN: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidePrediction {
    pub side: Side,
    /// Calibrated probability the side scores at least once.
    pub p: f64,
    pub raw_p: f64,
    pub z: f64,
    pub terms: BTreeMap<&'static str, f64>,
}

fn shrink_logit_delta(value: f64, prior: f64) -> f64 {
    let clamped = value.clamp(FINISH_CLAMP.0, FINISH_CLAMP.1);
    logit(clamped) - logit(prior.clamp(FINISH_CLAMP.0, FINISH_CLAMP.1))
}

fn fallback_z(kind: StatKind, value: Option<f64>, features: &MatchFeatures) -> f64 {
    match fallback_side_baseline(kind, features.window) {
        Some((mu, sd)) => z_score(value, mu, sd),
        None => 0.0,
    }
}

fn possession_share(features: &MatchFeatures, side: Side) -> f64 {
    let edge = match side {
        Side::Home => features.possession_edge,
        Side::Away => -features.possession_edge,
    };
    let span = (POSSESSION_MAX - POSSESSION_MIN) / 100.0;
    (edge / span).clamp(-1.0, 1.0)
}

/// Additive logit terms for `side`, keyed by name.
pub fn side_terms(
    w: &ModelWeights,
    profile: &ProfileParams,
    baseline: &LeagueBaseline,
    features: &MatchFeatures,
    side: Side,
) -> BTreeMap<&'static str, f64> {
    let f = features.side(side);
    let m = features.m_side;
    let cov = &features.coverage;
    let (mu_sot, sd_sot) = baseline.side_sot();
    let (mu_da, sd_da) = baseline.side_da();

    let mut t = BTreeMap::new();
    t.insert("base", logit(m));
    t.insert("bias", w.bias);
    t.insert("sot", w.z_sot * cov.sot * z_score(f.exp_sot, mu_sot, sd_sot));
    t.insert("da", w.z_da * cov.da * z_score(f.exp_da, mu_da, sd_da));
    t.insert(
        "shots",
        w.z_shots * fallback_z(StatKind::TotalShots, f.exp_shots, features),
    );
    t.insert(
        "xg",
        w.z_xg * fallback_z(StatKind::ExpectedGoals, f.exp_xg, features),
    );
    t.insert(
        "big_chances",
        w.z_big_chances * fallback_z(StatKind::BigChances, f.exp_big_chances, features),
    );
    t.insert(
        "possession",
        w.possession * cov.possession * possession_share(features, side),
    );
    t.insert(
        "finishing",
        w.finishing * f.finish_reliability * shrink_logit_delta(f.finish, profile.finish_prior),
    );
    t.insert("finishing_xg", 0.5 * w.finishing_xg * f.fin_xg);
    t.insert(
        "leak",
        w.leak * f.opp_leak_reliability * shrink_logit_delta(f.opp_leak, profile.leak_prior),
    );
    // A stronger keeper on the other side lowers this side's chance.
    t.insert("goalkeeper", -w.goalkeeper * (f.opp_gk_stop - profile.gk_save_prior));
    let rest_z = f
        .rest_days
        .map(|d| ((d - profile.rest_ref_days) / REST_SPAN).clamp(-1.0, 1.0))
        .unwrap_or(0.0);
    t.insert("rest", w.rest * rest_z);
    t.insert("congestion", -w.congestion * f.congestion);
    t.insert("attack", w.attack * (logit(f.attack) - logit(m)));
    t.insert("defence", w.defence * (logit(f.opp_def_allow) - logit(m)));
    let class_weight = if features.cup {
        w.tier_gap * w.cup_tier_mult
    } else {
        w.tier_gap
    };
    t.insert("tier_gap", class_weight * f64::from(features.tier_gap(side)));

    let factors = &features.factors;
    t.insert("referee_mult", w.referee_mult * ln_mult(factors.referee));
    t.insert("weather_mult", w.weather_mult * ln_mult(factors.weather));
    t.insert("lineup_mult", w.lineup_mult * ln_mult(f.lineup_mult));
    t.insert("penalty_var_mult", w.penalty_var_mult * ln_mult(factors.penalty_var));
    t.insert("stadium_mult", w.stadium_mult * ln_mult(factors.stadium));

    if side == Side::Home {
        let g = &features.global;
        t.insert("home", w.home);
        t.insert(
            "global",
            w.referee * g.referee
                + w.weather * g.weather
                + w.venue * g.venue
                + w.lineups * g.lineups
                + w.injuries * g.injuries
                + w.importance * g.importance
                + w.set_piece * g.set_piece_xg,
        );
    }
    t
}

pub fn predict_side(
    cfg: &EngineConfig,
    baseline: &LeagueBaseline,
    features: &MatchFeatures,
    side: Side,
) -> SidePrediction {
    let terms = side_terms(&cfg.weights, &cfg.profile, baseline, features, side);
    let z: f64 = terms.values().sum();
    let raw_p = inv_logit(z);
    SidePrediction {
        side,
        p: calibrate(raw_p, &cfg.side_calibration),
        raw_p,
        z,
        terms,
    }
}
