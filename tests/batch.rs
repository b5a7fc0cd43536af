use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use goalcast::batch::{self, BatchOutcome, DEFAULT_H2H_N, DEFAULT_LAST_N, DayRequest};
use goalcast::batch_lock;
use goalcast::config::{EngineConfig, RuntimeConfig};
use goalcast::context::{ContextObservations, ExtrasRecord, referee_adjustment};
use goalcast::engine::BatchSnapshot;
use goalcast::ingest::parse_bundle_json;
use goalcast::league_baseline::{LeagueBaseline, LeagueBaselines};
use goalcast::match_data::{Fixture, FixtureId, LeagueInfo, MatchStats, TeamHistory, Window};
use goalcast::store::{self, BatchStatus};

fn read_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(path).expect("fixture file")
}

fn temp_runtime(tag: &str) -> (PathBuf, RuntimeConfig) {
    let dir = std::env::temp_dir().join(format!("goalcast-{tag}-{}", std::process::id()));
    fs::remove_dir_all(&dir).ok();
    let rt = RuntimeConfig {
        db_path: dir.join("batch.sqlite"),
        engine_config_path: None,
        fetch_workers: 2,
        lock_ttl_secs: 600,
        sweep_interval_secs: 60,
        result_retention_days: 14,
        max_warm: 100,
    };
    (dir, rt)
}

#[test]
fn day_batch_scores_every_window_and_market() {
    let (dir, rt) = temp_runtime("batch-run");
    let bundle = parse_bundle_json(&read_fixture("day_bundle.json")).unwrap();

    let mut conn = store::open_db(&rt.db_path).unwrap();
    let ingest = batch::persist_bundle(&mut conn, &rt, &bundle).unwrap();
    assert_eq!(ingest.matches_upserted, 3);
    // Head-to-head matches are warmed too.
    assert_eq!(ingest.prewarm.requested, 3);
    assert_eq!(ingest.prewarm.fetched, 2);
    assert_eq!(store::existing_stats_ids(&conn, &[1034000]).unwrap().len(), 1);
    assert_eq!(ingest.extras_upserted, 1);
    drop(conn);

    let date = bundle.date.unwrap();
    let request = DayRequest {
        date,
        fixtures: &bundle.fixtures,
        minute_buckets: &bundle.minute_buckets,
        last_n: DEFAULT_LAST_N,
        h2h_n: DEFAULT_H2H_N,
    };
    let outcome = batch::run_day(
        &rt,
        &EngineConfig::default(),
        &request,
        None::<&HashMap<FixtureId, MatchStats>>,
    )
    .unwrap();

    let BatchOutcome::Completed(report) = outcome else {
        panic!("batch should run");
    };
    assert_eq!(report.batch_key, "day:2025-10-25");
    assert_eq!(report.fixtures, 1);
    assert_eq!(report.teams, 2);
    assert_eq!(report.results_written, 6);

    let conn = store::open_db(&rt.db_path).unwrap();
    assert_eq!(
        store::batch_status(&conn, "day:2025-10-25").unwrap(),
        Some(BatchStatus::Done)
    );
    drop(conn);
    fs::remove_dir_all(dir).ok();
}

#[test]
fn held_lock_reports_already_running() {
    let (dir, rt) = temp_runtime("batch-locked");
    let date = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
    let key = batch::batch_key(date);
    let guard = batch_lock::acquire(&rt.db_path, &key, 600).unwrap();
    assert!(guard.is_some());

    let minute_buckets = HashMap::new();
    let request = DayRequest {
        date,
        fixtures: &[],
        minute_buckets: &minute_buckets,
        last_n: DEFAULT_LAST_N,
        h2h_n: DEFAULT_H2H_N,
    };
    let cfg = EngineConfig::default();
    let fetcher: Option<&HashMap<FixtureId, MatchStats>> = None;
    let outcome = batch::run_day(&rt, &cfg, &request, fetcher).unwrap();
    assert_eq!(outcome, BatchOutcome::AlreadyRunning);

    drop(guard);
    let outcome = batch::run_day(&rt, &cfg, &request, fetcher).unwrap();
    let BatchOutcome::Completed(report) = outcome else {
        panic!("lock should be free after drop");
    };
    assert_eq!(report.results_written, 0);

    let conn = store::open_db(&rt.db_path).unwrap();
    assert_eq!(store::batch_status(&conn, &key).unwrap(), Some(BatchStatus::Skipped));
    drop(conn);
    fs::remove_dir_all(dir).ok();
}

#[test]
fn referee_outcomes_are_measured_against_the_window_rate() {
    let baseline = LeagueBaseline {
        rate_ge1: 0.55,
        rate_side: 0.33,
        ..LeagueBaseline::defaults(Window::FirstHalf)
    };
    let stats: HashMap<FixtureId, MatchStats> = HashMap::new();
    let snapshot = BatchSnapshot::with_baselines(
        &EngineConfig::default(),
        Window::FirstHalf,
        TeamHistory::new(),
        &stats,
        LeagueBaselines::uniform(Window::FirstHalf, baseline),
    );
    let fixture = Fixture {
        fixture_id: 77,
        kickoff: None,
        league: LeagueInfo {
            id: Some(39),
            name: Some("Premier League".to_string()),
            round: Some("Regular Season - 9".to_string()),
            ..LeagueInfo::default()
        },
        home_id: 1,
        away_id: 2,
        home_name: None,
        away_name: None,
        odds: Vec::new(),
    };

    // An ordinary referee: 11 of 20 recent matches with a first-half goal.
    let recent: Vec<bool> = (0..20).map(|i| i % 2 == 0 || i == 19).collect();
    assert_eq!(recent.iter().filter(|hit| **hit).count(), 11);
    let raw = HashMap::from([(
        77,
        ExtrasRecord {
            observations: ContextObservations {
                referee_recent: recent.clone(),
                ..ContextObservations::default()
            },
            ..ExtrasRecord::default()
        },
    )]);

    let prepared = batch::prepare_extras(&snapshot, std::slice::from_ref(&fixture), &raw);
    let record = &prepared[&77];
    assert_eq!(record.ref_adj, referee_adjustment(&recent, 0.55));
    assert!(record.ref_adj.abs() < 0.1, "ref_adj = {}", record.ref_adj);
    // League match in the regular season scores 3 of 10 on importance.
    assert!((record.importance_adj + 0.4).abs() < 1e-12);
    assert_eq!(record.observations.importance, Some(3.0));
}
