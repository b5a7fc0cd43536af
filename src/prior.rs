//! Outside-the-match probability: team history, head-to-head history and an optional
//! minute-bucket prior, followed by bounded logit nudges.

use serde::Serialize;

use crate::config::PriorParams;
use crate::context::ExtrasRecord;
use crate::fusion::{Fused, fuse};
use crate::match_data::{HistoricalMatch, Market, MinuteBuckets, TeamId, Window};
use crate::prob::{WeightedCount, beta_shrunk_rate, inv_logit, logit, recency_weight};

/// Everything the prior needs for one fixture and market.
#[derive(Debug, Clone, Copy)]
pub struct PriorInputs<'a> {
    pub window: Window,
    pub market: Market,
    pub home_id: TeamId,
    pub away_id: TeamId,
    pub home_matches: &'a [HistoricalMatch],
    pub away_matches: &'a [HistoricalMatch],
    pub h2h_matches: &'a [HistoricalMatch],
    /// League base rate of the market.
    pub m: f64,
    /// League rate of a single side scoring.
    pub m_side: f64,
    pub extras: Option<&'a ExtrasRecord>,
    pub minute_buckets: Option<(&'a MinuteBuckets, &'a MinuteBuckets)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PriorNudges {
    pub form_trend: f64,
    pub coach_change: f64,
    pub tendency: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorEstimate {
    pub p_team_home: f64,
    pub p_team_away: f64,
    pub p_team: f64,
    pub w_team: f64,
    pub p_h2h: f64,
    pub h2h_matches: usize,
    pub effn_h2h: f64,
    pub share_h2h: f64,
    /// Team and head-to-head fused, before the minute buckets and nudges.
    pub p_base: f64,
    pub p_minute: Option<f64>,
    pub nudges: PriorNudges,
    pub p: f64,
    pub effective_n: f64,
}

/// Recency-weighted market hits over matches that have a score in the window.
pub fn weighted_market_counts(
    matches: &[HistoricalMatch],
    window: Window,
    market: Market,
    lambda: f64,
    max_n: usize,
) -> (WeightedCount, usize) {
    let mut count = WeightedCount::default();
    let hits = matches
        .iter()
        .filter_map(|m| m.market_hit(window, market))
        .take(max_n);
    let mut used = 0usize;
    for (i, hit) in hits.enumerate() {
        count.push(hit, recency_weight(i, lambda));
        used += 1;
    }
    (count, used)
}

pub fn estimate_prior(
    params: &PriorParams,
    max_precision: f64,
    input: &PriorInputs<'_>,
) -> PriorEstimate {
    let (home_counts, _) = weighted_market_counts(
        input.home_matches,
        input.window,
        input.market,
        params.team_lambda,
        params.team_max_n,
    );
    let (away_counts, _) = weighted_market_counts(
        input.away_matches,
        input.window,
        input.market,
        params.team_lambda,
        params.team_max_n,
    );
    let p_team_home = home_counts.shrunk(input.m, params.team_tau);
    let p_team_away = away_counts.shrunk(input.m, params.team_tau);
    let p_team = (p_team_home + p_team_away) / 2.0;
    let w_team = home_counts.total + away_counts.total;

    let (h2h_counts, h2h_matches) = weighted_market_counts(
        input.h2h_matches,
        input.window,
        input.market,
        params.h2h_lambda,
        params.h2h_max_n,
    );
    let p_h2h = h2h_counts.shrunk(input.m, params.h2h_tau);
    let effn_h2h = if h2h_matches >= params.h2h_min_matches {
        h2h_counts.total * params.h2h_weight_scale
    } else {
        0.0
    };

    let Fused {
        p: p_base,
        share_second: share_h2h,
    } = fuse(p_team, w_team, p_h2h, effn_h2h, max_precision);

    let p_minute = input.minute_buckets.and_then(|(home, away)| {
        minute_bucket_probability(home, away, input.window, input.market)
    });
    let p_blended = match p_minute {
        Some(pm) if params.minute_bucket_weight > 0.0 => {
            let w = params.minute_bucket_weight.clamp(0.0, 1.0);
            inv_logit((1.0 - w) * logit(p_base) + w * logit(pm))
        }
        _ => p_base,
    };

    let nudges = compute_nudges(params, input);
    let p = if nudges.total != 0.0 {
        inv_logit(logit(p_blended) + nudges.total)
    } else {
        p_blended
    };

    PriorEstimate {
        p_team_home,
        p_team_away,
        p_team,
        w_team,
        p_h2h,
        h2h_matches,
        effn_h2h,
        share_h2h,
        p_base,
        p_minute,
        nudges,
        p,
        effective_n: w_team + effn_h2h,
    }
}

fn compute_nudges(params: &PriorParams, input: &PriorInputs<'_>) -> PriorNudges {
    let cap = params.nudge_total_cap.max(0.0);
    if cap == 0.0 {
        return PriorNudges::default();
    }

    let trend_home = form_trend(input.home_matches, input.window, input.market, params);
    let trend_away = form_trend(input.away_matches, input.window, input.market, params);
    let form_trend = (params.form_trend_weight * (trend_home + trend_away) / 2.0)
        .clamp(-params.form_trend_cap, params.form_trend_cap);

    let coach_change = input.extras.map_or(0.0, |e| {
        let changes = usize::from(e.coach_change_home) + usize::from(e.coach_change_away);
        params.coach_change_bump * changes as f64
    });

    let tendency = tendency_nudge(params, input);

    PriorNudges {
        form_trend,
        coach_change,
        tendency,
        total: (form_trend + coach_change + tendency).clamp(-cap, cap),
    }
}

/// Raw recent-window rate minus the team's overall rate; zero without enough history.
fn form_trend(
    matches: &[HistoricalMatch],
    window: Window,
    market: Market,
    params: &PriorParams,
) -> f64 {
    let hits: Vec<bool> = matches
        .iter()
        .filter_map(|m| m.market_hit(window, market))
        .take(params.team_max_n)
        .collect();
    if params.form_window == 0 || hits.len() <= params.form_window {
        return 0.0;
    }
    let rate = |xs: &[bool]| xs.iter().filter(|h| **h).count() as f64 / xs.len() as f64;
    rate(&hits[..params.form_window]) - rate(&hits)
}

/// Failed-to-score and clean-sheet frequencies against the league expectation `1 - m_side`.
/// More blanks than expected pushes the prior down.
fn tendency_nudge(params: &PriorParams, input: &PriorInputs<'_>) -> f64 {
    let expected_blank = 1.0 - input.m_side;
    let blanks = |team: TeamId, matches: &[HistoricalMatch]| {
        let mut failed = WeightedCount::default();
        let mut clean = WeightedCount::default();
        let played = matches
            .iter()
            .filter_map(|m| m.goals_for_against(team, input.window))
            .take(params.team_max_n);
        for (i, (gf, ga)) in played.enumerate() {
            let w = recency_weight(i, params.team_lambda);
            failed.push(gf == 0, w);
            clean.push(ga == 0, w);
        }
        (
            beta_shrunk_rate(failed.hits, failed.total, expected_blank, params.team_tau),
            beta_shrunk_rate(clean.hits, clean.total, expected_blank, params.team_tau),
        )
    };
    let (fts_home, cs_home) = blanks(input.home_id, input.home_matches);
    let (fts_away, cs_away) = blanks(input.away_id, input.away_matches);
    let excess = (fts_home + cs_home + fts_away + cs_away) / 4.0 - expected_blank;
    (-params.tendency_weight * excess).clamp(-params.tendency_cap, params.tendency_cap)
}

/// First two buckets per half cover minutes 1-30 and 46-75, the third includes stoppage time.
fn window_rate(goals: &[f64; 6], matches: u32, window: Window) -> Option<f64> {
    if matches == 0 {
        return None;
    }
    let segments = match window {
        Window::FirstHalf => &goals[..3],
        Window::FullMatch => &goals[..],
    };
    Some(segments.iter().map(|g| g.max(0.0)).sum::<f64>() / matches as f64)
}

/// Market probability implied by both teams' scoring-by-minute rates under Poisson goals.
pub fn minute_bucket_probability(
    home: &MinuteBuckets,
    away: &MinuteBuckets,
    window: Window,
    market: Market,
) -> Option<f64> {
    let home_for = window_rate(&home.goals_for, home.matches, window)?;
    let home_against = window_rate(&home.goals_against, home.matches, window)?;
    let away_for = window_rate(&away.goals_for, away.matches, window)?;
    let away_against = window_rate(&away.goals_against, away.matches, window)?;
    let lambda_home = (home_for + away_against) / 2.0;
    let lambda_away = (away_for + home_against) / 2.0;
    let total = lambda_home + lambda_away;
    let p = match market {
        Market::AtLeastOne => 1.0 - (-total).exp(),
        Market::AtLeastTwo => 1.0 - (-total).exp() * (1.0 + total),
        Market::BothScore => (1.0 - (-lambda_home).exp()) * (1.0 - (-lambda_away).exp()),
    };
    Some(p)
}

#[cfg(test)]
mod tests {
    use super::{PriorInputs, estimate_prior, minute_bucket_probability};
    use crate::config::PriorParams;
    use crate::match_data::{HistoricalMatch, LeagueInfo, Market, MinuteBuckets, Score, Window};

    fn game(id: u64, home: u32, away: u32, ht: (u32, u32)) -> HistoricalMatch {
        HistoricalMatch {
            fixture_id: id,
            kickoff: None,
            league: LeagueInfo::default(),
            home_id: home,
            away_id: away,
            halftime: Some(Score {
                home: ht.0,
                away: ht.1,
            }),
            fulltime: None,
        }
    }

    fn history(team: u32, hits: usize, n: usize, id0: u64) -> Vec<HistoricalMatch> {
        (0..n)
            .map(|i| {
                let ht = if i < hits { (1, 0) } else { (0, 0) };
                game(id0 + i as u64, team, 900 + i as u32, ht)
            })
            .collect()
    }

    fn flat_params() -> PriorParams {
        PriorParams {
            team_lambda: f64::INFINITY,
            h2h_lambda: f64::INFINITY,
            nudge_total_cap: 0.0,
            ..PriorParams::default()
        }
    }

    fn inputs<'a>(
        home: &'a [HistoricalMatch],
        away: &'a [HistoricalMatch],
        h2h: &'a [HistoricalMatch],
    ) -> PriorInputs<'a> {
        PriorInputs {
            window: Window::FirstHalf,
            market: Market::AtLeastOne,
            home_id: 1,
            away_id: 2,
            home_matches: home,
            away_matches: away,
            h2h_matches: h2h,
            m: 0.55,
            m_side: 0.33,
            extras: None,
            minute_buckets: None,
        }
    }

    #[test]
    fn team_rates_average_without_h2h() {
        let home = history(1, 4, 10, 0);
        let away = history(2, 6, 10, 100);
        let est = estimate_prior(&flat_params(), 1e6, &inputs(&home, &away, &[]));
        assert!((est.p_team_home - 8.4 / 18.0).abs() < 1e-12);
        assert!((est.p_team_away - 10.4 / 18.0).abs() < 1e-12);
        assert!((est.p - 18.8 / 36.0).abs() < 1e-12);
        assert_eq!(est.effn_h2h, 0.0);
        assert_eq!(est.effective_n, 20.0);
    }

    #[test]
    fn sparse_h2h_is_ignored() {
        let home = history(1, 4, 10, 0);
        let away = history(2, 6, 10, 100);
        let h2h = vec![game(500, 1, 2, (3, 2)), game(501, 2, 1, (1, 1))];
        let est = estimate_prior(&flat_params(), 1e6, &inputs(&home, &away, &h2h));
        assert_eq!(est.h2h_matches, 2);
        assert_eq!(est.effn_h2h, 0.0);
        assert_eq!(est.share_h2h, 0.0);

        let h2h: Vec<_> = (0..5).map(|i| game(600 + i, 1, 2, (1, 0))).collect();
        let est = estimate_prior(&flat_params(), 1e6, &inputs(&home, &away, &h2h));
        assert!((est.effn_h2h - 2.0).abs() < 1e-12);
        assert!(est.share_h2h > 0.0);
        assert!(est.p > est.p_team);
    }

    #[test]
    fn nudges_are_capped() {
        let params = PriorParams {
            coach_change_bump: 5.0,
            ..PriorParams::default()
        };
        let home = history(1, 4, 10, 0);
        let away = history(2, 6, 10, 100);
        let extras = crate::context::ExtrasRecord {
            coach_change_home: true,
            coach_change_away: true,
            ..Default::default()
        };
        let mut input = inputs(&home, &away, &[]);
        input.extras = Some(&extras);
        let est = estimate_prior(&params, 1e6, &input);
        assert!(est.nudges.total <= params.nudge_total_cap + 1e-12);
        assert!(est.p > est.p_base);
    }

    #[test]
    fn minute_buckets_follow_poisson() {
        let flat = MinuteBuckets {
            matches: 10,
            goals_for: [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            goals_against: [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        };
        let p = minute_bucket_probability(&flat, &flat, Window::FirstHalf, Market::AtLeastOne)
            .unwrap();
        assert!((p - (1.0 - (-0.6f64).exp())).abs() < 1e-12);
        let empty = MinuteBuckets::default();
        assert!(minute_bucket_probability(&flat, &empty, Window::FullMatch, Market::BothScore)
            .is_none());
    }
}
