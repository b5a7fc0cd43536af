use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::context::{ContextFactors, ExtrasRecord};
use crate::league_baseline::LeagueBaseline;
use crate::match_data::{Side, TeamId, Window};
use crate::micro_form::MicroForm;
use crate::micro_stats::{POSSESSION_MAX, POSSESSION_MIN, StatKind};
use crate::prob::{geo_mean, reliability, z_score};
use crate::team_profile::TeamProfile;
use crate::team_strength::TeamStrength;

pub const MAX_TIER_GAP: i32 = 3;
const COVERAGE_K: f64 = 3.0;
const CORNER_XG: f64 = 0.025;
const FREE_KICK_XG: f64 = 0.010;
const MAX_REST_DAYS: f64 = 30.0;

/// Per-side mean and sd for statistics without a league baseline.
pub fn fallback_side_baseline(kind: StatKind, window: Window) -> Option<(f64, f64)> {
    let (mu, sd) = match kind {
        StatKind::TotalShots => (5.0, 2.0),
        StatKind::ExpectedGoals => (0.55, 0.30),
        StatKind::BigChances => (0.7, 0.8),
        _ => return None,
    };
    Some(match window {
        Window::FirstHalf => (mu, sd),
        Window::FullMatch => (mu * 2.0, sd * std::f64::consts::SQRT_2),
    })
}

/// Features of one side of the fixture, read from that side's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideFeatures {
    pub team_id: TeamId,
    pub exp_sot: Option<f64>,
    pub exp_da: Option<f64>,
    pub exp_shots: Option<f64>,
    pub exp_xg: Option<f64>,
    pub exp_big_chances: Option<f64>,
    pub set_piece_xg: Option<f64>,
    pub finish: f64,
    pub finish_reliability: f64,
    pub fin_xg: f64,
    pub opp_leak: f64,
    pub opp_leak_reliability: f64,
    pub opp_gk_stop: f64,
    pub attack: f64,
    pub opp_def_allow: f64,
    pub rest_days: Option<f64>,
    pub congestion: f64,
    pub tier: u8,
    pub lineup_mult: f64,
}

/// Additive logit adjustments applied once per fixture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GlobalAdjustments {
    pub referee: f64,
    pub weather: f64,
    pub venue: f64,
    pub lineups: f64,
    pub injuries: f64,
    pub importance: f64,
    pub set_piece_xg: f64,
}

impl GlobalAdjustments {
    pub fn from_extras(extras: Option<&ExtrasRecord>, set_piece_xg: f64) -> Self {
        let Some(e) = extras else {
            return Self {
                set_piece_xg,
                ..Self::default()
            };
        };
        Self {
            referee: e.ref_adj,
            weather: e.weather_adj,
            venue: e.venue_adj,
            lineups: if e.lineups_have { e.lineup_adj } else { 0.0 },
            injuries: e.inj_adj,
            importance: e.importance_adj,
            set_piece_xg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coverage {
    pub sot: f64,
    pub da: f64,
    pub possession: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchFeatures {
    pub window: Window,
    pub m_side: f64,
    pub home: SideFeatures,
    pub away: SideFeatures,
    /// Home possession share minus away, as a fraction in `[-1, 1]`.
    pub possession_edge: f64,
    /// Away tier minus home tier; positive when the home side plays higher.
    pub tier_gap_home: i32,
    pub cup: bool,
    pub pace_z: f64,
    pub z_sot_total: f64,
    pub z_da_total: f64,
    pub coverage: Coverage,
    pub factors: ContextFactors,
    pub global: GlobalAdjustments,
    pub micro_effective_n: f64,
}

impl MatchFeatures {
    pub fn side(&self, side: Side) -> &SideFeatures {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    /// Tier gap from `side`'s point of view.
    pub fn tier_gap(&self, side: Side) -> i32 {
        match side {
            Side::Home => self.tier_gap_home,
            Side::Away => -self.tier_gap_home,
        }
    }
}

/// One team's inputs to the feature builder.
#[derive(Debug, Clone, Copy)]
pub struct TeamInputs<'a> {
    pub team_id: TeamId,
    pub strength: &'a TeamStrength,
    pub profile: &'a TeamProfile,
    /// Form on the venue side the team occupies in this fixture.
    pub form: &'a MicroForm,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    pub window: Window,
    pub kickoff: Option<DateTime<Utc>>,
    pub baseline: &'a LeagueBaseline,
    pub home: TeamInputs<'a>,
    pub away: TeamInputs<'a>,
    pub extras: Option<&'a ExtrasRecord>,
    pub cup: bool,
}

fn profile_fallback(profile: &TeamProfile, kind: StatKind, allowed: bool) -> Option<f64> {
    match (kind, allowed) {
        (StatKind::ShotsOnTarget, false) => profile.sot_for,
        (StatKind::ShotsOnTarget, true) => profile.sot_allowed,
        (StatKind::DangerousAttacks, false) => profile.da_for,
        (StatKind::DangerousAttacks, true) => profile.da_allowed,
        (StatKind::Possession, false) => profile.possession,
        _ => None,
    }
}

/// Geometric mean of what `own` produces and what `opp` concedes, capped at `cap`.
fn expected_stat(
    own: &TeamInputs<'_>,
    opp: &TeamInputs<'_>,
    kind: StatKind,
    cap: f64,
) -> Option<f64> {
    let produced = own
        .form
        .mean_for(kind)
        .or_else(|| profile_fallback(own.profile, kind, false));
    let conceded = opp
        .form
        .mean_allowed(kind)
        .or_else(|| profile_fallback(opp.profile, kind, true));
    geo_mean(produced, conceded).map(|v| v.min(cap))
}

fn set_piece_xg(form: &MicroForm) -> Option<f64> {
    let corners = form.mean_for(StatKind::Corners);
    let free_kicks = form.mean_for(StatKind::FreeKicks);
    if corners.is_none() && free_kicks.is_none() {
        return None;
    }
    Some(CORNER_XG * corners.unwrap_or(0.0) + FREE_KICK_XG * free_kicks.unwrap_or(0.0))
}

pub fn rest_days(kickoff: Option<DateTime<Utc>>, last_match: Option<DateTime<Utc>>) -> Option<f64> {
    let (kickoff, last) = (kickoff?, last_match?);
    let days = (kickoff - last).num_minutes() as f64 / 1440.0;
    (days >= 0.0).then(|| days.min(MAX_REST_DAYS))
}

/// `max(0, (c7 - 2) * 0.5 + (c14 - 4) * 0.25)` capped at 1, counting matches in the
/// 7 and 14 days before kickoff.
pub fn congestion(kickoff: Option<DateTime<Utc>>, match_dates: &[DateTime<Utc>]) -> f64 {
    let Some(kickoff) = kickoff else {
        return 0.0;
    };
    let within = |days: i64| {
        let start = kickoff - Duration::days(days);
        match_dates
            .iter()
            .filter(|d| **d < kickoff && **d >= start)
            .count() as f64
    };
    let overload = (within(7) - 2.0) * 0.5 + (within(14) - 4.0) * 0.25;
    overload.clamp(0.0, 1.0)
}

fn side_features(
    input: &FeatureInputs<'_>,
    own: &TeamInputs<'_>,
    opp: &TeamInputs<'_>,
    lineup_mult: f64,
) -> SideFeatures {
    let window = input.window;
    let base = input.baseline;
    let cap = |kind: StatKind| kind.cap(window);
    SideFeatures {
        team_id: own.team_id,
        exp_sot: expected_stat(own, opp, StatKind::ShotsOnTarget, base.q95_sot / 2.0),
        exp_da: expected_stat(own, opp, StatKind::DangerousAttacks, base.q95_da / 2.0),
        exp_shots: expected_stat(own, opp, StatKind::TotalShots, cap(StatKind::TotalShots)),
        exp_xg: expected_stat(own, opp, StatKind::ExpectedGoals, cap(StatKind::ExpectedGoals)),
        exp_big_chances: expected_stat(own, opp, StatKind::BigChances, cap(StatKind::BigChances)),
        set_piece_xg: set_piece_xg(own.form),
        finish: own.profile.finish,
        finish_reliability: own.profile.finish_reliability,
        fin_xg: own.profile.fin_xg,
        opp_leak: opp.profile.leak,
        opp_leak_reliability: opp.profile.leak_reliability,
        opp_gk_stop: opp.profile.gk_stop,
        attack: own.strength.attack,
        opp_def_allow: opp.strength.def_allow,
        rest_days: rest_days(input.kickoff, own.profile.last_match),
        congestion: congestion(input.kickoff, &own.profile.match_dates),
        tier: own.profile.tier,
        lineup_mult,
    }
}

fn used_micro(form: &MicroForm) -> (usize, usize, usize) {
    (
        form.used_for(StatKind::ShotsOnTarget),
        form.used_for(StatKind::DangerousAttacks),
        form.used_for(StatKind::Possession),
    )
}

pub fn build_match_features(cfg: &EngineConfig, input: &FeatureInputs<'_>) -> MatchFeatures {
    let base = input.baseline;
    let factors = match input.extras {
        Some(e) => {
            let avg_finish = (input.home.profile.finish + input.away.profile.finish) / 2.0;
            ContextFactors::from_observations(&e.observations, avg_finish, cfg.profile.finish_prior)
        }
        None => ContextFactors::neutral(),
    };

    let home = side_features(input, &input.home, &input.away, factors.lineup_home);
    let away = side_features(input, &input.away, &input.home, factors.lineup_away);

    let pos_home = expected_stat(&input.home, &input.away, StatKind::Possession, POSSESSION_MAX);
    let pos_away = expected_stat(&input.away, &input.home, StatKind::Possession, POSSESSION_MAX);
    let possession_edge = match (pos_home, pos_away) {
        (Some(h), Some(a)) => {
            let (h, a) = (h.max(POSSESSION_MIN), a.max(POSSESSION_MIN));
            ((h - a) / 100.0).clamp(-1.0, 1.0)
        }
        _ => 0.0,
    };

    let tier_gap_home =
        (i32::from(away.tier) - i32::from(home.tier)).clamp(-MAX_TIER_GAP, MAX_TIER_GAP);

    let sum = |a: Option<f64>, b: Option<f64>| match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        _ => None,
    };
    let z_sot_total = z_score(sum(home.exp_sot, away.exp_sot), base.mu_sot, base.sd_sot);
    let z_da_total = z_score(sum(home.exp_da, away.exp_da), base.mu_da, base.sd_da);
    let pace_z = (z_sot_total + z_da_total) / 2.0;

    let (h_sot, h_da, h_pos) = used_micro(input.home.form);
    let (a_sot, a_da, a_pos) = used_micro(input.away.form);
    let coverage = Coverage {
        sot: reliability((h_sot + a_sot) as f64 / 2.0, COVERAGE_K),
        da: reliability((h_da + a_da) as f64 / 2.0, COVERAGE_K),
        possession: reliability((h_pos + a_pos) as f64 / 2.0, COVERAGE_K),
    };
    let used_total = (h_sot + h_da + h_pos + a_sot + a_da + a_pos) as f64;
    let micro_effective_n = used_total / 2.0
        + (input.home.profile.effective_n + input.away.profile.effective_n) / 4.0;

    let set_piece_total = match (home.set_piece_xg, away.set_piece_xg) {
        (None, None) => 0.0,
        (h, a) => h.unwrap_or(0.0) + a.unwrap_or(0.0),
    };

    MatchFeatures {
        window: input.window,
        m_side: base.rate_side,
        home,
        away,
        possession_edge,
        tier_gap_home,
        cup: input.cup,
        pace_z,
        z_sot_total,
        z_da_total,
        coverage,
        factors,
        global: GlobalAdjustments::from_extras(input.extras, set_piece_total),
        micro_effective_n,
    }
}
