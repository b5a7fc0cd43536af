use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use tracing::{info, warn};

use goalcast::batch::{self, BatchOutcome, DEFAULT_H2H_N, DEFAULT_LAST_N, DayRequest};
use goalcast::config::{EngineConfig, RuntimeConfig, load_engine_config};
use goalcast::ingest::{Bundle, parse_bundle_json};
use goalcast::logging::init_tracing;
use goalcast::match_data::{FixtureId, MatchStats};
use goalcast::{store, sweeper};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let mut rt = RuntimeConfig::from_env();
    if let Some(db) = arg_value("--db") {
        rt.db_path = PathBuf::from(db);
    }
    let cfg = load_engine_config(rt.engine_config_path.as_deref())?;

    if has_flag("--daemon") {
        let dir = arg_value("--bundle-dir")
            .map(PathBuf::from)
            .context("--daemon needs --bundle-dir")?;
        return run_daemon(&rt, &cfg, &dir);
    }

    let bundle_path = arg_value("--bundle")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: goalcast --bundle PATH [--date YYYY-MM-DD] [--db PATH]"))?;
    let bundle = read_bundle(&bundle_path)?;
    let date = match arg_value("--date") {
        Some(raw) => parse_date(&raw)?,
        None => bundle.date.unwrap_or_else(|| Utc::now().date_naive()),
    };

    let outcome = run_bundle(&rt, &cfg, date, &bundle)?;
    print_outcome(date, &outcome);
    Ok(())
}

fn run_bundle(
    rt: &RuntimeConfig,
    cfg: &EngineConfig,
    date: NaiveDate,
    bundle: &Bundle,
) -> Result<BatchOutcome> {
    let mut conn = store::open_db(&rt.db_path)?;
    batch::persist_bundle(&mut conn, rt, bundle)?;
    drop(conn);

    let request = DayRequest {
        date,
        fixtures: &bundle.fixtures,
        minute_buckets: &bundle.minute_buckets,
        last_n: DEFAULT_LAST_N,
        h2h_n: DEFAULT_H2H_N,
    };
    batch::run_day(rt, cfg, &request, None::<&HashMap<FixtureId, MatchStats>>)
}

/// Run once per UTC day from `<dir>/<date>.json`, sweeping stale results in the background.
fn run_daemon(rt: &RuntimeConfig, cfg: &EngineConfig, dir: &Path) -> Result<()> {
    let _sweeper = sweeper::spawn(
        rt.db_path.clone(),
        StdDuration::from_secs(rt.sweep_interval_secs),
        rt.result_retention_days,
    );
    info!(dir = %dir.display(), "daemon started");

    loop {
        let date = Utc::now().date_naive();
        let path = dir.join(format!("{date}.json"));
        let bundle = if path.exists() {
            match read_bundle(&path) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!("bundle {} unreadable: {err:#}", path.display());
                    Bundle::default()
                }
            }
        } else {
            warn!(path = %path.display(), "no bundle for today");
            Bundle::default()
        };

        match run_bundle(rt, cfg, date, &bundle) {
            Ok(outcome) => print_outcome(date, &outcome),
            Err(err) => warn!(%date, "day batch failed: {err:#}"),
        }

        thread::sleep(until_next_run());
    }
}

fn until_next_run() -> StdDuration {
    let now = Utc::now();
    let next = (now.date_naive() + Duration::days(1))
        .and_time(NaiveTime::from_hms_opt(0, 1, 0).unwrap_or(NaiveTime::MIN))
        .and_utc();
    (next - now)
        .to_std()
        .unwrap_or(StdDuration::from_secs(60))
}

fn read_bundle(path: &Path) -> Result<Bundle> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read bundle {}", path.display()))?;
    parse_bundle_json(&raw)
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date {raw:?}, expected YYYY-MM-DD"))
}

fn print_outcome(date: NaiveDate, outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::AlreadyRunning => println!("{date}: batch already running"),
        BatchOutcome::Completed(report) => {
            println!("Batch {} complete", report.batch_key);
            println!("Fixtures: {}", report.fixtures);
            println!("Teams: {}", report.teams);
            println!("Results written: {}", report.results_written);
        }
    }
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}

fn arg_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
