use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::competition;
use crate::config::ProfileParams;
use crate::match_data::{HistoricalMatch, StatsSource, TeamHistory, TeamId, Window};
use crate::micro_stats::{StatKind, extract_match_micro};
use crate::prob::{beta_shrunk_rate, recency_weight, reliability};

/// Team efficiency and scheduling signals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamProfile {
    /// Shrunk goals per shot on target.
    pub finish: f64,
    /// Shrunk goals conceded per shot on target allowed.
    pub leak: f64,
    /// Shrunk save rate.
    pub gk_stop: f64,
    /// Shrunk relative deviation of goals from expected goals, in `[-1, 1]`.
    pub fin_xg: f64,
    pub sot_for: Option<f64>,
    pub sot_allowed: Option<f64>,
    pub da_for: Option<f64>,
    pub da_allowed: Option<f64>,
    pub possession: Option<f64>,
    pub last_match: Option<DateTime<Utc>>,
    /// Kickoffs of the walked matches, most recent first.
    pub match_dates: Vec<DateTime<Utc>>,
    pub tier: u8,
    pub fin_effn: f64,
    pub leak_effn: f64,
    pub finish_reliability: f64,
    pub leak_reliability: f64,
    /// Recency-weighted count of matches that carried statistics.
    pub effective_n: f64,
}

impl TeamProfile {
    pub fn neutral(params: &ProfileParams) -> Self {
        Self {
            finish: params.finish_prior,
            leak: params.leak_prior,
            gk_stop: params.gk_save_prior,
            fin_xg: 0.0,
            sot_for: None,
            sot_allowed: None,
            da_for: None,
            da_allowed: None,
            possession: None,
            last_match: None,
            match_dates: Vec::new(),
            tier: competition::DEFAULT_TEAM_TIER,
            fin_effn: 0.0,
            leak_effn: 0.0,
            finish_reliability: 0.0,
            leak_reliability: 0.0,
            effective_n: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct WeightedMean {
    sum: f64,
    weight: f64,
}

impl WeightedMean {
    fn push(&mut self, value: Option<f64>, w: f64) {
        if let Some(v) = value {
            self.sum += v * w;
            self.weight += w;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }
}

/// `matches` must be ordered most recent first.
pub fn compute_team_profile<S: StatsSource + ?Sized>(
    params: &ProfileParams,
    window: Window,
    team: TeamId,
    matches: &[HistoricalMatch],
    stats: &S,
) -> TeamProfile {
    let walked = &matches[..matches.len().min(params.max_n)];

    let mut sot_for = WeightedMean::default();
    let mut sot_allowed = WeightedMean::default();
    let mut da_for = WeightedMean::default();
    let mut da_allowed = WeightedMean::default();
    let mut possession = WeightedMean::default();

    let mut goals_on_target = 0.0;
    let mut sot_trials = 0.0;
    let mut conceded_on_target = 0.0;
    let mut sot_faced = 0.0;
    let mut saves = 0.0;
    let mut xg_goals = 0.0;
    let mut xg_sum = 0.0;
    let mut xg_weight = 0.0;
    let mut effective_n = 0.0;

    for (i, m) in walked.iter().enumerate() {
        let w = recency_weight(i, params.lambda);
        let Some(opponent) = m.opponent_of(team) else {
            continue;
        };
        let Some(micro) = stats
            .stats_for(m.fixture_id)
            .and_then(|s| extract_match_micro(s, team, opponent, window))
        else {
            continue;
        };
        effective_n += w;

        let own_sot = micro.team.get(StatKind::ShotsOnTarget);
        let opp_sot = micro.opponent.get(StatKind::ShotsOnTarget);
        sot_for.push(own_sot, w);
        sot_allowed.push(opp_sot, w);
        da_for.push(micro.team.get(StatKind::DangerousAttacks), w);
        da_allowed.push(micro.opponent.get(StatKind::DangerousAttacks), w);
        possession.push(micro.team.get(StatKind::Possession), w);

        let Some((gf, ga)) = m.goals_for_against(team, window) else {
            continue;
        };
        let (gf, ga) = (gf as f64, ga as f64);
        if let Some(sot) = own_sot {
            goals_on_target += w * gf;
            sot_trials += w * sot.max(gf);
        }
        if let Some(sot) = opp_sot {
            let faced = sot.max(ga);
            conceded_on_target += w * ga;
            sot_faced += w * faced;
            saves += w * (faced - ga);
        }
        if let Some(xg) = micro.team.get(StatKind::ExpectedGoals) {
            xg_goals += w * gf;
            xg_sum += w * xg;
            xg_weight += w;
        }
    }

    let fin_xg = if xg_weight > 0.0 {
        let raw = (xg_goals - xg_sum) / xg_sum.max(1.0);
        (raw * xg_weight / (xg_weight + params.fin_xg_tau)).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    TeamProfile {
        finish: beta_shrunk_rate(
            goals_on_target,
            sot_trials,
            params.finish_prior,
            params.finish_tau,
        ),
        leak: beta_shrunk_rate(
            conceded_on_target,
            sot_faced,
            params.leak_prior,
            params.finish_tau,
        ),
        gk_stop: beta_shrunk_rate(saves, sot_faced, params.gk_save_prior, params.gk_save_tau),
        fin_xg,
        sot_for: sot_for.value(),
        sot_allowed: sot_allowed.value(),
        da_for: da_for.value(),
        da_allowed: da_allowed.value(),
        possession: possession.value(),
        last_match: walked.iter().find_map(|m| m.kickoff),
        match_dates: walked.iter().filter_map(|m| m.kickoff).collect(),
        tier: competition::infer_team_tier(walked.iter().map(|m| &m.league)),
        fin_effn: sot_trials,
        leak_effn: sot_faced,
        finish_reliability: reliability(sot_trials, params.reliability_k),
        leak_reliability: reliability(sot_faced, params.reliability_k),
        effective_n,
    }
}

pub fn compute_profiles<S: StatsSource + ?Sized>(
    params: &ProfileParams,
    window: Window,
    history: &TeamHistory,
    stats: &S,
) -> HashMap<TeamId, TeamProfile> {
    history
        .iter()
        .map(|(team, matches)| {
            (
                *team,
                compute_team_profile(params, window, *team, matches, stats),
            )
        })
        .collect()
}
