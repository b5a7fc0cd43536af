//! Per-fixture context: the extras record supplied alongside a fixture, the builders that
//! turn raw observations into logit adjustments, and the multiplicative context factors.

use serde::{Deserialize, Serialize};

use crate::prob::{WeightedCount, logit, recency_weight};

const REFEREE_GOAL_BASE: f64 = 0.55;
const REFEREE_PEN_BASE: f64 = 0.10;
const REFEREE_LAMBDA: f64 = 8.0;
const REFEREE_TAU: f64 = 10.0;
const NEUTRAL_IMPORTANCE: f64 = 5.0;

/// Key players missing for one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Absences {
    pub forwards: u32,
    pub creators: u32,
    pub centre_backs: u32,
    pub goalkeeper: bool,
}

/// Raw observations a collaborator may attach to a fixture. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextObservations {
    /// Average window goals in the referee's recent matches.
    pub referee_goals: Option<f64>,
    /// Average window penalties in the referee's recent matches.
    pub referee_penalties: Option<f64>,
    /// Window-goal outcomes of the referee's recent matches, most recent first.
    pub referee_recent: Vec<bool>,
    pub wind_kmh: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub rain: Option<bool>,
    pub surface: Option<String>,
    pub altitude_m: Option<f64>,
    pub pitch_quality: Option<f64>,
    pub starters_known: Option<u32>,
    pub starting_forwards: Option<u32>,
    pub home_absences: Absences,
    pub away_absences: Absences,
    pub injuries: Option<u32>,
    pub importance: Option<f64>,
}

/// Logit-scale adjustments for one fixture. Absent fields are neutral.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrasRecord {
    pub ref_adj: f64,
    pub weather_adj: f64,
    pub venue_adj: f64,
    pub lineup_adj: f64,
    pub lineups_have: bool,
    pub inj_adj: f64,
    pub importance_adj: f64,
    pub coach_change_home: bool,
    pub coach_change_away: bool,
    pub observations: ContextObservations,
}

impl ExtrasRecord {
    /// Derive adjustments from the attached observations where those are present.
    pub fn apply_observations(&mut self, obs: ContextObservations, referee_base: f64) {
        if !obs.referee_recent.is_empty() {
            self.ref_adj = referee_adjustment(&obs.referee_recent, referee_base);
        }
        if obs.wind_kmh.is_some() || obs.temperature_c.is_some() || obs.humidity_pct.is_some() {
            self.weather_adj =
                weather_adjustment(obs.temperature_c, obs.wind_kmh, obs.humidity_pct);
        }
        if obs.surface.is_some() || obs.altitude_m.is_some() {
            self.venue_adj = venue_adjustment(obs.surface.as_deref(), obs.altitude_m);
        }
        if let (Some(starters), Some(forwards)) = (obs.starters_known, obs.starting_forwards) {
            let (adj, have) = lineup_adjustment(starters, forwards);
            self.lineup_adj = adj;
            self.lineups_have = have;
        }
        if let Some(count) = obs.injuries {
            self.inj_adj = injury_adjustment(count);
        }
        if let Some(score) = obs.importance {
            self.importance_adj = importance_adjustment(score);
        }
        self.observations = obs;
    }
}

/// `logit(shrunk referee rate) - logit(m)` over the referee's recent window outcomes.
pub fn referee_adjustment(recent: &[bool], m: f64) -> f64 {
    if recent.is_empty() {
        return 0.0;
    }
    let mut count = WeightedCount::default();
    for (i, hit) in recent.iter().enumerate() {
        count.push(*hit, recency_weight(i, REFEREE_LAMBDA));
    }
    let p = count.shrunk(m, REFEREE_TAU).clamp(0.01, 0.99);
    logit(p) - logit(m.clamp(0.01, 0.99))
}

pub fn weather_adjustment(
    temp_c: Option<f64>,
    wind_kmh: Option<f64>,
    humidity: Option<f64>,
) -> f64 {
    let mut adj: f64 = 0.0;
    if let Some(wind) = wind_kmh {
        if wind >= 35.0 {
            adj -= 0.25;
        } else if wind >= 25.0 {
            adj -= 0.12;
        }
    }
    if let Some(t) = temp_c {
        if t <= -2.0 || t >= 32.0 {
            adj -= 0.20;
        } else if (12.0..=20.0).contains(&t) {
            adj += 0.08;
        }
    }
    if humidity.is_some_and(|h| h >= 90.0) {
        adj -= 0.05;
    }
    adj.clamp(-0.5, 0.5)
}

pub fn venue_adjustment(surface: Option<&str>, elevation_m: Option<f64>) -> f64 {
    let mut adj: f64 = 0.0;
    let surface = surface.unwrap_or("").to_ascii_lowercase();
    if surface.contains("artificial") || surface.contains("turf") {
        adj += 0.04;
    }
    if elevation_m.is_some_and(|e| e > 1000.0) {
        adj -= 0.06;
    }
    adj.clamp(-0.2, 0.2)
}

/// Attacking shape of both published starting elevens. Needs at least 18 known starters.
pub fn lineup_adjustment(starters: u32, forwards: u32) -> (f64, bool) {
    if starters < 18 {
        return (0.0, false);
    }
    let adj = if forwards <= 1 {
        -0.12
    } else if forwards >= 4 {
        0.06
    } else {
        0.0
    };
    (adj, true)
}

pub fn injury_adjustment(count: u32) -> f64 {
    if count > 10 {
        -0.18
    } else if count > 6 {
        -0.10
    } else {
        0.0
    }
}

/// Importance score in `[0, 10]` mapped to `[-0.5, 0.5]`.
pub fn importance_adjustment(score: f64) -> f64 {
    ((score - NEUTRAL_IMPORTANCE) / 5.0).clamp(-0.5, 0.5)
}

/// Heuristic importance in `[0, 10]` from competition, round and table positions.
pub fn importance_score(
    league_name: &str,
    round: Option<&str>,
    standings: Option<(u32, u32, u32)>,
) -> f64 {
    let name = league_name.to_ascii_lowercase();
    let mut score: f64 = if ["champions", "europa", "libertadores", "world cup", "nations"]
        .iter()
        .any(|t| name.contains(t))
    {
        3.0
    } else if ["premier", "la liga", "serie", "bundesliga", "liga", "league"]
        .iter()
        .any(|t| name.contains(t))
    {
        2.0
    } else if name.contains("friendly") {
        0.0
    } else {
        1.0
    };

    let round = round.unwrap_or("").to_ascii_lowercase();
    if ["final", "semi", "quarter"].iter().any(|t| round.contains(t)) {
        score += 3.0;
    } else if ["group", "regular"].iter().any(|t| round.contains(t)) {
        score += 1.0;
    }

    // (home rank, away rank, table size): title or relegation races count once per team.
    if let Some((home_rank, away_rank, size)) = standings {
        for rank in [home_rank, away_rank] {
            if rank <= 3 || rank + 2 >= size {
                score += 2.0;
            }
        }
    }
    score.min(10.0)
}

/// Multiplicative context factors, each close to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextFactors {
    pub referee: f64,
    pub weather: f64,
    pub lineup_home: f64,
    pub lineup_away: f64,
    pub penalty_var: f64,
    pub stadium: f64,
}

impl ContextFactors {
    pub fn neutral() -> Self {
        Self {
            referee: 1.0,
            weather: 1.0,
            lineup_home: 1.0,
            lineup_away: 1.0,
            penalty_var: 1.0,
            stadium: 1.0,
        }
    }

    pub fn from_observations(
        obs: &ContextObservations,
        avg_finish: f64,
        finish_prior: f64,
    ) -> Self {
        let referee = referee_multiplier(obs.referee_goals, obs.referee_penalties);
        Self {
            referee,
            weather: weather_multiplier(obs.wind_kmh, obs.rain, obs.temperature_c),
            lineup_home: lineup_multiplier(&obs.home_absences),
            lineup_away: lineup_multiplier(&obs.away_absences),
            penalty_var: penalty_var_multiplier(avg_finish, finish_prior, referee),
            stadium: stadium_multiplier(obs.altitude_m, obs.surface.as_deref(), obs.pitch_quality),
        }
    }
}

pub fn referee_multiplier(goals: Option<f64>, penalties: Option<f64>) -> f64 {
    if goals.is_none() && penalties.is_none() {
        return 1.0;
    }
    let g = goals.unwrap_or(REFEREE_GOAL_BASE);
    let p = penalties.unwrap_or(REFEREE_PEN_BASE);
    ((1.0 + 0.06 * (g - REFEREE_GOAL_BASE)) * (1.0 + 0.04 * (p - REFEREE_PEN_BASE)))
        .clamp(0.94, 1.06)
}

pub fn weather_multiplier(wind_kmh: Option<f64>, rain: Option<bool>, temp_c: Option<f64>) -> f64 {
    let mut mult: f64 = 1.0;
    if wind_kmh.is_some_and(|w| w >= 25.0) {
        mult *= 0.97;
    }
    if rain == Some(true) {
        mult *= 0.98;
    }
    if temp_c.is_some_and(|t| t <= -2.0 || t >= 33.0) {
        mult *= 0.985;
    }
    f64::clamp(mult, 0.95, 1.03)
}

pub fn lineup_multiplier(absences: &Absences) -> f64 {
    let mut mult = 0.98f64.powi(absences.forwards as i32)
        * 0.985f64.powi(absences.creators as i32)
        * 0.988f64.powi(absences.centre_backs as i32);
    if absences.goalkeeper {
        mult *= 0.97;
    }
    mult.clamp(0.90, 1.10)
}

pub fn penalty_var_multiplier(avg_finish: f64, finish_prior: f64, referee_mult: f64) -> f64 {
    ((1.0 + 0.04 * (avg_finish - finish_prior)) * (1.0 + 0.5 * (referee_mult - 1.0)))
        .clamp(0.98, 1.04)
}

pub fn stadium_multiplier(
    altitude_m: Option<f64>,
    surface: Option<&str>,
    quality: Option<f64>,
) -> f64 {
    let mut mult: f64 = 1.0;
    if altitude_m.is_some_and(|a| a >= 900.0) {
        mult *= 0.985;
    }
    let surface = surface.unwrap_or("").to_ascii_lowercase();
    if surface.contains("artificial") || surface.contains("turf") {
        mult *= 0.992;
    }
    if let Some(q) = quality {
        mult *= 0.98 + 0.04 * q.clamp(0.0, 1.0);
    }
    f64::clamp(mult, 0.98, 1.03)
}
