use std::collections::HashMap;

use goalcast::config::EngineConfig;
use goalcast::engine::{BatchSnapshot, FixtureContext, score_all_markets, score_fixture};
use goalcast::league_baseline::{LeagueBaseline, LeagueBaselines};
use goalcast::match_data::{
    Fixture, FixtureId, HistoricalMatch, LeagueInfo, Market, MatchStats, Score, TeamHistory,
    Window,
};

fn league() -> LeagueInfo {
    LeagueInfo {
        id: Some(140),
        season: Some(2025),
        name: Some("La Liga".to_string()),
        country: Some("Spain".to_string()),
        round: Some("Regular Season - 9".to_string()),
    }
}

/// Ten first-half results for `team` at home, `hits` of them with a goal.
fn history_with_hits(team: u32, first_id: u64, hits: usize) -> Vec<HistoricalMatch> {
    (0..10)
        .map(|i| {
            let ht = if i < hits { (1, 0) } else { (0, 0) };
            HistoricalMatch {
                fixture_id: first_id + i as u64,
                kickoff: None,
                league: league(),
                home_id: team,
                away_id: 500 + i as u32,
                halftime: Some(Score {
                    home: ht.0,
                    away: ht.1,
                }),
                fulltime: Some(Score {
                    home: ht.0 + 1,
                    away: ht.1,
                }),
            }
        })
        .collect()
}

fn fixture() -> Fixture {
    Fixture {
        fixture_id: 9001,
        kickoff: None,
        league: league(),
        home_id: 1,
        away_id: 2,
        home_name: Some("Team A".to_string()),
        away_name: Some("Team B".to_string()),
        odds: Vec::new(),
    }
}

fn flat_prior_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.strength.lambda = f64::INFINITY;
    cfg.prior.team_lambda = f64::INFINITY;
    cfg.prior.h2h_lambda = f64::INFINITY;
    cfg.prior.nudge_total_cap = 0.0;
    cfg
}

fn snapshot(cfg: &EngineConfig) -> BatchSnapshot {
    let mut history = TeamHistory::new();
    history.insert(1, history_with_hits(1, 100, 4));
    history.insert(2, history_with_hits(2, 200, 6));
    let baseline = LeagueBaseline {
        rate_ge1: 0.55,
        ..LeagueBaseline::defaults(Window::FirstHalf)
    };
    let stats: HashMap<FixtureId, MatchStats> = HashMap::new();
    BatchSnapshot::with_baselines(
        cfg,
        Window::FirstHalf,
        history,
        &stats,
        LeagueBaselines::uniform(Window::FirstHalf, baseline),
    )
}

#[test]
fn prior_only_fixture_matches_shrunk_team_rates() {
    let cfg = flat_prior_config();
    let snap = snapshot(&cfg);
    let score = score_fixture(&snap, &fixture(), Market::AtLeastOne, &FixtureContext::default());

    // (4 + 8 * 0.55) / 18 and (6 + 8 * 0.55) / 18, averaged.
    let expected = 18.8 / 36.0;
    let p_prior = score.debug["p_prior"].as_f64().unwrap();
    let p_fused = score.debug["p_fused"].as_f64().unwrap();
    assert!((p_prior - expected).abs() < 1e-9, "p_prior = {p_prior}");
    assert!((p_fused - p_prior).abs() < 1e-12);
    assert_eq!(score.debug["effn_micro"].as_f64(), Some(0.0));
    assert_eq!(score.debug["effn_prior"].as_f64(), Some(20.0));
    assert!(score.debug["p_market"].is_null());
}

#[test]
fn every_market_is_scored_within_bounds() {
    let cfg = flat_prior_config();
    let snap = snapshot(&cfg);
    let scores = score_all_markets(&snap, &fixture(), &FixtureContext::default());
    assert_eq!(scores.len(), Market::ALL.len());
    for score in &scores {
        assert_eq!(score.window, Window::FirstHalf);
        assert!(score.probability > 0.0 && score.probability < 1.0);
        let calibration = &score.debug["calibration"];
        let floor = calibration["floor"].as_f64().unwrap();
        let ceiling = calibration["ceiling"].as_f64().unwrap();
        assert!(score.probability >= floor - 1e-12);
        assert!(score.probability <= ceiling + 1e-12);
    }
}
