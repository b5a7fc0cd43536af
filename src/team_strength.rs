use std::collections::HashMap;

use serde::Serialize;

use crate::config::StrengthParams;
use crate::league_baseline::LeagueBaselines;
use crate::match_data::{HistoricalMatch, LeagueId, TeamHistory, TeamId, Window};
use crate::prob::{WeightedCount, recency_weight};

/// Shrunk probability that a team scores (`attack`) or concedes (`def_allow`) in the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TeamStrength {
    pub attack: f64,
    pub def_allow: f64,
    pub effective_n: f64,
    pub matches_used: usize,
}

impl TeamStrength {
    pub fn prior_only(m: f64) -> Self {
        Self {
            attack: m,
            def_allow: m,
            effective_n: 0.0,
            matches_used: 0,
        }
    }
}

/// League the team played most often in; ties go to the most recent appearance.
pub fn modal_league(matches: &[HistoricalMatch]) -> Option<LeagueId> {
    let mut counts: HashMap<LeagueId, (usize, usize)> = HashMap::new();
    for (i, m) in matches.iter().enumerate() {
        if let Some(id) = m.league.id {
            let entry = counts.entry(id).or_insert((0, i));
            entry.0 += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.1.cmp(&a.1.1)))
        .map(|(id, _)| id)
}

/// `matches` must be ordered most recent first.
pub fn compute_team_strength(
    team: TeamId,
    matches: &[HistoricalMatch],
    window: Window,
    m: f64,
    params: &StrengthParams,
) -> TeamStrength {
    let mut scored = WeightedCount::default();
    let mut conceded = WeightedCount::default();
    let mut used = 0usize;

    let played = matches
        .iter()
        .filter_map(|m| m.goals_for_against(team, window))
        .take(params.max_n);
    for (i, (goals_for, goals_against)) in played.enumerate() {
        let w = recency_weight(i, params.lambda);
        scored.push(goals_for > 0, w);
        conceded.push(goals_against > 0, w);
        used += 1;
    }

    TeamStrength {
        attack: scored.shrunk(m, params.tau),
        def_allow: conceded.shrunk(m, params.tau),
        effective_n: scored.total + conceded.total,
        matches_used: used,
    }
}

pub fn compute_strengths(
    params: &StrengthParams,
    window: Window,
    history: &TeamHistory,
    baselines: &LeagueBaselines,
) -> HashMap<TeamId, TeamStrength> {
    history
        .iter()
        .map(|(team, matches)| {
            let m = baselines.get(modal_league(matches)).rate_side;
            (
                *team,
                compute_team_strength(*team, matches, window, m, params),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{compute_team_strength, modal_league};
    use crate::config::StrengthParams;
    use crate::match_data::{HistoricalMatch, LeagueInfo, Score, Window};

    fn game(
        id: u64,
        league: u32,
        home: u32,
        away: u32,
        ht: Option<(u32, u32)>,
    ) -> HistoricalMatch {
        HistoricalMatch {
            fixture_id: id,
            kickoff: None,
            league: LeagueInfo {
                id: Some(league),
                ..LeagueInfo::default()
            },
            home_id: home,
            away_id: away,
            halftime: ht.map(|(home, away)| Score { home, away }),
            fulltime: None,
        }
    }

    #[test]
    fn no_matches_returns_prior() {
        let s = compute_team_strength(1, &[], Window::FirstHalf, 0.41, &StrengthParams::default());
        assert_eq!(s.attack, 0.41);
        assert_eq!(s.def_allow, 0.41);
        assert_eq!(s.effective_n, 0.0);
    }

    #[test]
    fn unscored_matches_are_skipped() {
        let matches = vec![
            game(1, 39, 1, 2, None),
            game(2, 39, 2, 1, Some((0, 1))),
            game(3, 39, 1, 3, Some((0, 0))),
        ];
        let params = StrengthParams {
            lambda: f64::INFINITY,
            ..StrengthParams::default()
        };
        let s = compute_team_strength(1, &matches, Window::FirstHalf, 0.5, &params);
        assert_eq!(s.matches_used, 2);
        assert_eq!(s.effective_n, 4.0);
        assert!((s.attack - (1.0 + 0.5 * 8.0) / 10.0).abs() < 1e-12);
        assert!((s.def_allow - (0.0 + 0.5 * 8.0) / 10.0).abs() < 1e-12);
    }

    #[test]
    fn effective_n_grows_with_matches() {
        let params = StrengthParams::default();
        let mut matches = Vec::new();
        let mut last = 0.0;
        for i in 0..10u64 {
            matches.push(game(i, 39, 1, 2, Some((1, 0))));
            let s = compute_team_strength(1, &matches, Window::FirstHalf, 0.4, &params);
            assert!(s.effective_n > last);
            last = s.effective_n;
        }
    }

    #[test]
    fn modal_league_prefers_recent_on_tie() {
        let matches = vec![game(1, 140, 1, 2, None), game(2, 39, 1, 2, None)];
        assert_eq!(modal_league(&matches), Some(140));
    }
}
