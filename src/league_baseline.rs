use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::competition;
use crate::config::BaselineParams;
use crate::match_data::{
    HistoricalMatch, LeagueId, Market, MatchStats, StatsSource, TeamHistory, Window,
};
use crate::micro_stats::{StatKind, stat_value};
use crate::prob::{mean, percentile, sample_sd};

const RATE_FLOOR: f64 = 0.02;
const RATE_CEIL: f64 = 0.98;

/// Distribution of two-sided micro-stat totals and base event rates for one league.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueBaseline {
    pub mu_sot: f64,
    pub sd_sot: f64,
    pub q95_sot: f64,
    pub mu_da: f64,
    pub sd_da: f64,
    pub q95_da: f64,
    pub rate_ge1: f64,
    pub rate_ge2: f64,
    pub rate_btts: f64,
    /// Probability that one given side scores.
    pub rate_side: f64,
    pub stat_samples: usize,
    pub outcome_samples: usize,
}

impl LeagueBaseline {
    pub fn defaults(window: Window) -> Self {
        match window {
            Window::FirstHalf => Self {
                mu_sot: 2.6,
                sd_sot: 1.25,
                q95_sot: StatKind::ShotsOnTarget.cap(window),
                mu_da: 40.0,
                sd_da: 12.0,
                q95_da: StatKind::DangerousAttacks.cap(window),
                rate_ge1: 0.55,
                rate_ge2: 0.25,
                rate_btts: 0.12,
                rate_side: 0.33,
                stat_samples: 0,
                outcome_samples: 0,
            },
            Window::FullMatch => Self {
                mu_sot: 5.2,
                sd_sot: 1.25 * std::f64::consts::SQRT_2,
                q95_sot: StatKind::ShotsOnTarget.cap(window),
                mu_da: 80.0,
                sd_da: 12.0 * std::f64::consts::SQRT_2,
                q95_da: StatKind::DangerousAttacks.cap(window),
                rate_ge1: 0.92,
                rate_ge2: 0.75,
                rate_btts: 0.52,
                rate_side: 0.70,
                stat_samples: 0,
                outcome_samples: 0,
            },
        }
    }

    pub fn market_rate(&self, market: Market) -> f64 {
        match market {
            Market::AtLeastOne => self.rate_ge1,
            Market::AtLeastTwo => self.rate_ge2,
            Market::BothScore => self.rate_btts,
        }
    }

    /// Per-side mean and sd of shots on target: half the total, half the variance.
    pub fn side_sot(&self) -> (f64, f64) {
        (self.mu_sot / 2.0, self.sd_sot / std::f64::consts::SQRT_2)
    }

    pub fn side_da(&self) -> (f64, f64) {
        (self.mu_da / 2.0, self.sd_da / std::f64::consts::SQRT_2)
    }
}

/// Per-league baselines with a global fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueBaselines {
    pub window: Window,
    pub global: LeagueBaseline,
    pub by_league: HashMap<LeagueId, LeagueBaseline>,
}

impl LeagueBaselines {
    pub fn uniform(window: Window, baseline: LeagueBaseline) -> Self {
        Self {
            window,
            global: baseline,
            by_league: HashMap::new(),
        }
    }

    pub fn get(&self, league: Option<LeagueId>) -> &LeagueBaseline {
        league
            .and_then(|id| self.by_league.get(&id))
            .unwrap_or(&self.global)
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    sot: Vec<f64>,
    da: Vec<f64>,
    outcomes: usize,
    ge1: usize,
    ge2: usize,
    btts: usize,
    side_hits: usize,
}

impl Accumulator {
    fn push_match(&mut self, m: &HistoricalMatch, stats: Option<&MatchStats>, window: Window) {
        if let Some(score) = m.score(window) {
            self.outcomes += 1;
            self.ge1 += usize::from(score.market_hit(Market::AtLeastOne));
            self.ge2 += usize::from(score.market_hit(Market::AtLeastTwo));
            self.btts += usize::from(score.market_hit(Market::BothScore));
            self.side_hits += usize::from(score.home > 0) + usize::from(score.away > 0);
        }
        let Some(stats) = stats else {
            return;
        };
        if let Some(total) = two_sided_total(stats, m, StatKind::ShotsOnTarget, window) {
            self.sot.push(total);
        }
        if let Some(total) = two_sided_total(stats, m, StatKind::DangerousAttacks, window) {
            self.da.push(total);
        }
    }

    /// Every outcome rate needs `min_outcomes` matches. The per-side rate counts two trials per
    /// match but is gated on the same match count.
    fn finalize(&self, fallback: &LeagueBaseline, min_outcomes: usize) -> LeagueBaseline {
        let enough = self.outcomes >= min_outcomes.max(1);
        let rate = |hits: usize, trials: usize, fb: f64| {
            if enough {
                (hits as f64 / trials as f64).clamp(RATE_FLOOR, RATE_CEIL)
            } else {
                fb
            }
        };
        LeagueBaseline {
            mu_sot: mean(&self.sot).unwrap_or(fallback.mu_sot),
            sd_sot: sample_sd(&self.sot)
                .filter(|sd| *sd > 1e-9)
                .unwrap_or(fallback.sd_sot),
            q95_sot: percentile(&self.sot, 0.95).unwrap_or(fallback.q95_sot),
            mu_da: mean(&self.da).unwrap_or(fallback.mu_da),
            sd_da: sample_sd(&self.da)
                .filter(|sd| *sd > 1e-9)
                .unwrap_or(fallback.sd_da),
            q95_da: percentile(&self.da, 0.95).unwrap_or(fallback.q95_da),
            rate_ge1: rate(self.ge1, self.outcomes, fallback.rate_ge1),
            rate_ge2: rate(self.ge2, self.outcomes, fallback.rate_ge2),
            rate_btts: rate(self.btts, self.outcomes, fallback.rate_btts),
            rate_side: rate(self.side_hits, self.outcomes * 2, fallback.rate_side),
            stat_samples: self.sot.len().max(self.da.len()),
            outcome_samples: self.outcomes,
        }
    }
}

/// Sum of both sides' values; present when either side reported the statistic.
fn two_sided_total(
    stats: &MatchStats,
    m: &HistoricalMatch,
    kind: StatKind,
    window: Window,
) -> Option<f64> {
    let home = stats.block(m.home_id).and_then(|b| stat_value(b, kind, window));
    let away = stats.block(m.away_id).and_then(|b| stat_value(b, kind, window));
    match (home, away) {
        (None, None) => None,
        (h, a) => Some(h.unwrap_or(0.0) + a.unwrap_or(0.0)),
    }
}

/// Baselines for every league seen in `history`, back-filled field by field from the
/// global pool, which itself falls back to fixed defaults.
pub fn compute_baselines<S: StatsSource + ?Sized>(
    params: &BaselineParams,
    window: Window,
    history: &TeamHistory,
    stats: &S,
) -> LeagueBaselines {
    let mut seen: HashSet<u64> = HashSet::new();
    let mut global = Accumulator::default();
    let mut per_league: HashMap<LeagueId, Accumulator> = HashMap::new();

    for matches in history.values() {
        for m in matches {
            if !seen.insert(m.fixture_id) {
                continue;
            }
            if params.exclude_youth && !competition::classify(&m.league).admitted() {
                continue;
            }
            let block = stats.stats_for(m.fixture_id);
            global.push_match(m, block, window);
            if let Some(league_id) = m.league.id {
                per_league
                    .entry(league_id)
                    .or_default()
                    .push_match(m, block, window);
            }
        }
    }

    let global = global.finalize(&LeagueBaseline::defaults(window), 1);
    let by_league = per_league
        .into_iter()
        .map(|(id, acc)| (id, acc.finalize(&global, params.min_league_matches)))
        .collect();

    LeagueBaselines {
        window,
        global,
        by_league,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{LeagueBaseline, compute_baselines};
    use crate::config::BaselineParams;
    use crate::match_data::{
        HistoricalMatch, LeagueInfo, MatchStats, Score, StatEntry, TeamHistory, TeamStatBlock,
        Window,
    };

    fn game(
        id: u64,
        league: Option<u32>,
        home: u32,
        away: u32,
        ht: (u32, u32),
    ) -> HistoricalMatch {
        HistoricalMatch {
            fixture_id: id,
            kickoff: None,
            league: LeagueInfo {
                id: league,
                name: Some("Premier League".to_string()),
                ..LeagueInfo::default()
            },
            home_id: home,
            away_id: away,
            halftime: Some(Score {
                home: ht.0,
                away: ht.1,
            }),
            fulltime: Some(Score {
                home: ht.0 + 1,
                away: ht.1,
            }),
        }
    }

    fn sot_stats(home: u32, away: u32, h: f64, a: f64) -> MatchStats {
        let block = |team_id, v| TeamStatBlock {
            team_id,
            entries: vec![StatEntry {
                name: "1st Half Shots on Goal".to_string(),
                value: Some(v),
            }],
        };
        MatchStats {
            blocks: vec![block(home, h), block(away, a)],
        }
    }

    #[test]
    fn empty_pool_uses_defaults() {
        let history = TeamHistory::new();
        let stats: HashMap<u64, MatchStats> = HashMap::new();
        let params = BaselineParams::default();
        let out = compute_baselines(&params, Window::FirstHalf, &history, &stats);
        assert_eq!(out.global, LeagueBaseline::defaults(Window::FirstHalf));
        assert!(out.by_league.is_empty());
    }

    #[test]
    fn small_league_backfills_rates_from_global() {
        let mut history = TeamHistory::new();
        let mut stats: HashMap<u64, MatchStats> = HashMap::new();
        let mut big = Vec::new();
        for i in 0..6u64 {
            let ht = if i % 2 == 0 { (1, 0) } else { (0, 0) };
            big.push(game(i, Some(39), 1, 2, ht));
            stats.insert(i, sot_stats(1, 2, 2.0, 1.0 + i as f64 * 0.5));
        }
        history.insert(1, big.clone());
        history.insert(2, big);
        history.insert(3, vec![game(100, Some(140), 3, 4, (1, 1))]);

        let params = BaselineParams::default();
        let out = compute_baselines(&params, Window::FirstHalf, &history, &stats);
        let big = out.get(Some(39));
        assert_eq!(big.outcome_samples, 6);
        assert!((big.rate_ge1 - 0.5).abs() < 1e-12);
        assert!(big.sd_sot > 0.0);

        let small = out.get(Some(140));
        assert_eq!(small.outcome_samples, 1);
        assert_eq!(small.rate_ge1, out.global.rate_ge1);
        assert_eq!(small.mu_sot, out.global.mu_sot);

        assert_eq!(out.get(Some(999)), &out.global);
        assert_eq!(out.get(None), &out.global);
    }

    #[test]
    fn side_rate_needs_as_many_matches_as_the_other_rates() {
        let mut history = TeamHistory::new();
        let stats: HashMap<u64, MatchStats> = HashMap::new();
        // Three matches make six side trials, still short of five matches.
        let short: Vec<_> = (0..3u64).map(|i| game(200 + i, Some(78), 5, 6, (1, 1))).collect();
        history.insert(5, short);
        let quiet: Vec<_> = (0..6u64).map(|i| game(300 + i, Some(39), 7, 8, (0, 0))).collect();
        history.insert(7, quiet);
        let params = BaselineParams::default();
        let out = compute_baselines(&params, Window::FirstHalf, &history, &stats);
        let league = out.get(Some(78));
        assert_eq!(league.outcome_samples, 3);
        assert!((out.global.rate_side - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(league.rate_side, out.global.rate_side);
        assert_eq!(league.rate_btts, out.global.rate_btts);
    }

    #[test]
    fn side_baseline_halves_total() {
        let b = LeagueBaseline::defaults(Window::FirstHalf);
        let (mu, sd) = b.side_sot();
        assert!((mu - 1.3).abs() < 1e-12);
        assert!((sd - 1.25 / 2f64.sqrt()).abs() < 1e-12);
    }
}
