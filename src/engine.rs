//! Per-batch snapshot of everything derived from history, and per-fixture scoring on top
//! of it.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::competition;
use crate::config::EngineConfig;
use crate::context::ExtrasRecord;
use crate::features::{FeatureInputs, MatchFeatures, TeamInputs, build_match_features};
use crate::fusion::{
    ProbabilityEstimate, blend_with_market, calibrate, fuse_estimates, implied_probability,
};
use crate::joint::compose;
use crate::league_baseline::{LeagueBaselines, compute_baselines};
use crate::match_data::{
    Fixture, HistoricalMatch, Market, MinuteBuckets, Side, StatsSource, TeamHistory, TeamId,
    Window, sort_recent_first,
};
use crate::micro_form::{MicroForm, compute_forms};
use crate::micro_model::{SidePrediction, predict_side};
use crate::prior::{PriorEstimate, PriorInputs, estimate_prior};
use crate::team_profile::{TeamProfile, compute_profiles};
use crate::team_strength::{TeamStrength, compute_strengths};

/// Immutable view of one batch: histories plus every per-team aggregate for one window.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub cfg: EngineConfig,
    pub window: Window,
    pub history: TeamHistory,
    pub baselines: LeagueBaselines,
    pub strengths: HashMap<TeamId, TeamStrength>,
    pub profiles: HashMap<TeamId, TeamProfile>,
    pub forms: HashMap<(TeamId, Side), MicroForm>,
}

impl BatchSnapshot {
    pub fn build<S: StatsSource + ?Sized>(
        cfg: &EngineConfig,
        window: Window,
        history: TeamHistory,
        stats: &S,
    ) -> Self {
        let baselines = compute_baselines(&cfg.baseline, window, &history, stats);
        Self::with_baselines(cfg, window, history, stats, baselines)
    }

    /// Same as [`BatchSnapshot::build`] with externally supplied baselines.
    pub fn with_baselines<S: StatsSource + ?Sized>(
        cfg: &EngineConfig,
        window: Window,
        mut history: TeamHistory,
        stats: &S,
        baselines: LeagueBaselines,
    ) -> Self {
        for matches in history.values_mut() {
            sort_recent_first(matches);
        }
        let strengths = compute_strengths(&cfg.strength, window, &history, &baselines);
        let profiles = compute_profiles(&cfg.profile, window, &history, stats);
        let forms = compute_forms(window, &history, stats, cfg.profile.max_n);
        debug!(
            window = window.as_str(),
            teams = history.len(),
            leagues = baselines.by_league.len(),
            "batch snapshot built"
        );
        Self {
            cfg: cfg.clone(),
            window,
            history,
            baselines,
            strengths,
            profiles,
            forms,
        }
    }

    pub fn matches_of(&self, team: TeamId) -> &[HistoricalMatch] {
        self.history.get(&team).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Per-fixture data that is not part of the snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureContext<'a> {
    pub h2h: &'a [HistoricalMatch],
    pub extras: Option<&'a ExtrasRecord>,
    pub minute_buckets: Option<(&'a MinuteBuckets, &'a MinuteBuckets)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketScore {
    pub window: Window,
    pub market: Market,
    pub probability: f64,
    pub debug: BTreeMap<String, Value>,
}

/// Micro-side result of one fixture, shared by the three markets.
#[derive(Debug, Clone)]
pub struct MicroOutcome {
    pub features: MatchFeatures,
    pub home: SidePrediction,
    pub away: SidePrediction,
}

pub fn micro_outcome(
    snapshot: &BatchSnapshot,
    fixture: &Fixture,
    extras: Option<&ExtrasRecord>,
) -> MicroOutcome {
    let cfg = &snapshot.cfg;
    let baseline = snapshot.baselines.get(fixture.league.id);
    let m_side = baseline.rate_side;

    let strength = |team: TeamId| {
        snapshot
            .strengths
            .get(&team)
            .copied()
            .unwrap_or_else(|| TeamStrength::prior_only(m_side))
    };
    let neutral_profile = TeamProfile::neutral(&cfg.profile);
    let profile = |team: TeamId| snapshot.profiles.get(&team).unwrap_or(&neutral_profile);
    let (empty_home, empty_away) = (MicroForm::empty(Side::Home), MicroForm::empty(Side::Away));
    let home_form = snapshot
        .forms
        .get(&(fixture.home_id, Side::Home))
        .unwrap_or(&empty_home);
    let away_form = snapshot
        .forms
        .get(&(fixture.away_id, Side::Away))
        .unwrap_or(&empty_away);
    let (home_strength, away_strength) = (strength(fixture.home_id), strength(fixture.away_id));

    let input = FeatureInputs {
        window: snapshot.window,
        kickoff: fixture.kickoff,
        baseline,
        home: TeamInputs {
            team_id: fixture.home_id,
            strength: &home_strength,
            profile: profile(fixture.home_id),
            form: home_form,
        },
        away: TeamInputs {
            team_id: fixture.away_id,
            strength: &away_strength,
            profile: profile(fixture.away_id),
            form: away_form,
        },
        extras,
        cup: competition::classify(&fixture.league).cup,
    };
    let features = build_match_features(cfg, &input);
    let home = predict_side(cfg, baseline, &features, Side::Home);
    let away = predict_side(cfg, baseline, &features, Side::Away);
    MicroOutcome {
        features,
        home,
        away,
    }
}

pub fn prior_estimate(
    snapshot: &BatchSnapshot,
    fixture: &Fixture,
    market: Market,
    ctx: &FixtureContext<'_>,
) -> PriorEstimate {
    let baseline = snapshot.baselines.get(fixture.league.id);
    let input = PriorInputs {
        window: snapshot.window,
        market,
        home_id: fixture.home_id,
        away_id: fixture.away_id,
        home_matches: snapshot.matches_of(fixture.home_id),
        away_matches: snapshot.matches_of(fixture.away_id),
        h2h_matches: ctx.h2h,
        m: baseline.market_rate(market),
        m_side: baseline.rate_side,
        extras: ctx.extras,
        minute_buckets: ctx.minute_buckets,
    };
    estimate_prior(&snapshot.cfg.prior, snapshot.cfg.fusion.max_precision, &input)
}

fn insert<T: Serialize>(debug: &mut BTreeMap<String, Value>, key: &str, value: T) {
    debug.insert(
        key.to_string(),
        serde_json::to_value(value).unwrap_or(Value::Null),
    );
}

/// Score one market from a prepared micro outcome.
pub fn score_market(
    snapshot: &BatchSnapshot,
    fixture: &Fixture,
    market: Market,
    ctx: &FixtureContext<'_>,
    micro: &MicroOutcome,
) -> MarketScore {
    let cfg = &snapshot.cfg;
    let window = snapshot.window;
    let prior = prior_estimate(snapshot, fixture, market, ctx);

    let features = &micro.features;
    let joint = compose(
        &cfg.joint,
        window,
        market,
        micro.home.p,
        micro.away.p,
        features.pace_z,
        features.tier_gap_home,
    );

    let fused = fuse_estimates(
        ProbabilityEstimate::new(prior.p, prior.effective_n),
        ProbabilityEstimate::new(joint.p, features.micro_effective_n),
        cfg.fusion.max_precision,
    );

    let p_market = fixture.odds_for(window, market).and_then(|o| {
        implied_probability(o.decimal, o.opposite, cfg.fusion.remove_margin)
    });
    let blended = blend_with_market(fused.p, p_market, cfg.fusion.alpha_model);
    let calibration = cfg.calibration.get(window, market);
    let probability = calibrate(blended, &calibration);

    let mut debug = BTreeMap::new();
    insert(&mut debug, "m", prior_m(snapshot, fixture, market));
    insert(&mut debug, "m_side", features.m_side);
    insert(&mut debug, "prior", &prior);
    insert(&mut debug, "p_prior", prior.p);
    insert(&mut debug, "effn_prior", prior.effective_n);
    insert(&mut debug, "p_home", micro.home.p);
    insert(&mut debug, "p_away", micro.away.p);
    insert(&mut debug, "p_micro", joint.p);
    insert(&mut debug, "joint_coupling", joint.coupling);
    insert(&mut debug, "effn_micro", features.micro_effective_n);
    insert(&mut debug, "w_micro", fused.share_second);
    insert(&mut debug, "p_fused", fused.p);
    insert(&mut debug, "p_market", p_market);
    insert(&mut debug, "p_blended", blended);
    insert(&mut debug, "calibration", calibration);
    insert(&mut debug, "pace_z", features.pace_z);
    insert(&mut debug, "z_sot_total", features.z_sot_total);
    insert(&mut debug, "z_da_total", features.z_da_total);
    insert(&mut debug, "tier_gap_home", features.tier_gap_home);
    insert(&mut debug, "cup", features.cup);
    insert(&mut debug, "competition", competition::classify(&fixture.league));
    insert(&mut debug, "coverage", features.coverage);
    insert(&mut debug, "factors", features.factors);
    insert(&mut debug, "global", features.global);
    insert(&mut debug, "home_features", &features.home);
    insert(&mut debug, "away_features", &features.away);
    debug.insert("home_terms".to_string(), json!(micro.home.terms));
    debug.insert("away_terms".to_string(), json!(micro.away.terms));

    MarketScore {
        window,
        market,
        probability,
        debug,
    }
}

fn prior_m(snapshot: &BatchSnapshot, fixture: &Fixture, market: Market) -> f64 {
    snapshot.baselines.get(fixture.league.id).market_rate(market)
}

pub fn score_fixture(
    snapshot: &BatchSnapshot,
    fixture: &Fixture,
    market: Market,
    ctx: &FixtureContext<'_>,
) -> MarketScore {
    let micro = micro_outcome(snapshot, fixture, ctx.extras);
    score_market(snapshot, fixture, market, ctx, &micro)
}

/// Every market of the snapshot's window, sharing one micro outcome.
pub fn score_all_markets(
    snapshot: &BatchSnapshot,
    fixture: &Fixture,
    ctx: &FixtureContext<'_>,
) -> Vec<MarketScore> {
    let micro = micro_outcome(snapshot, fixture, ctx.extras);
    Market::ALL
        .iter()
        .map(|market| score_market(snapshot, fixture, *market, ctx, &micro))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{BatchSnapshot, FixtureContext, score_all_markets, score_fixture};
    use crate::config::EngineConfig;
    use crate::match_data::{
        Fixture, HistoricalMatch, LeagueInfo, Market, MarketOdds, MatchStats, Score, TeamHistory,
        Window,
    };

    fn game(id: u64, home: u32, away: u32, ht: (u32, u32)) -> HistoricalMatch {
        HistoricalMatch {
            fixture_id: id,
            kickoff: None,
            league: LeagueInfo {
                id: Some(39),
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
                away: ht.1 + 1,
            }),
        }
    }

    fn fixture() -> Fixture {
        Fixture {
            fixture_id: 999,
            kickoff: None,
            league: LeagueInfo {
                id: Some(39),
                name: Some("Premier League".to_string()),
                ..LeagueInfo::default()
            },
            home_id: 1,
            away_id: 2,
            home_name: None,
            away_name: None,
            odds: Vec::new(),
        }
    }

    fn snapshot() -> BatchSnapshot {
        let mut history = TeamHistory::new();
        history.insert(
            1,
            (0..8)
                .map(|i| game(i, 1, 10 + i as u32, (i as u32 % 2, 0)))
                .collect(),
        );
        history.insert(
            2,
            (0..8)
                .map(|i| game(100 + i, 20 + i as u32, 2, (0, i as u32 % 3)))
                .collect(),
        );
        let stats: HashMap<u64, MatchStats> = HashMap::new();
        BatchSnapshot::build(&EngineConfig::default(), Window::FirstHalf, history, &stats)
    }

    #[test]
    fn scores_are_bounded_and_debugged() {
        let snap = snapshot();
        let scores = score_all_markets(&snap, &fixture(), &FixtureContext::default());
        assert_eq!(scores.len(), 3);
        for s in &scores {
            assert!(s.probability >= 0.02 && s.probability <= 0.98);
            for key in ["p_prior", "p_micro", "w_micro", "home_terms", "away_terms"] {
                assert!(s.debug.contains_key(key), "missing {key}");
            }
        }
    }

    #[test]
    fn market_odds_pull_the_estimate() {
        let snap = snapshot();
        let ctx = FixtureContext::default();
        let plain = score_fixture(&snap, &fixture(), Market::AtLeastOne, &ctx);
        let mut priced = fixture();
        priced.odds.push(MarketOdds {
            window: Window::FirstHalf,
            market: Market::AtLeastOne,
            decimal: 1.05,
            opposite: None,
        });
        let with_odds = score_fixture(&snap, &priced, Market::AtLeastOne, &ctx);
        assert!(with_odds.probability > plain.probability);
        assert!(with_odds.debug["p_market"].is_number());
        assert!(plain.debug["p_market"].is_null());
    }

    #[test]
    fn unknown_teams_fall_back_to_league_rates() {
        let snap = snapshot();
        let mut f = fixture();
        f.home_id = 7777;
        f.away_id = 8888;
        let s = score_fixture(&snap, &f, Market::BothScore, &FixtureContext::default());
        assert!(s.probability > 0.0 && s.probability < 1.0);
        assert_eq!(s.debug["effn_prior"], 0.0);
    }
}
