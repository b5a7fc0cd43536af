use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};

use goalcast::batch::{self, BatchOutcome, DEFAULT_H2H_N, DEFAULT_LAST_N, DayRequest};
use goalcast::config::{RuntimeConfig, load_engine_config};
use goalcast::ingest::parse_bundle_json;
use goalcast::logging::init_tracing;
use goalcast::store;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let mut rt = RuntimeConfig::from_env();
    if let Some(db) = parse_path_arg("--db") {
        rt.db_path = db;
    }
    let bundle_path = parse_path_arg("--bundle")
        .ok_or_else(|| anyhow!("usage: ingest_bundle --bundle PATH [--db PATH] [--run]"))?;

    let raw = fs::read_to_string(&bundle_path)
        .with_context(|| format!("read bundle {}", bundle_path.display()))?;
    let bundle = parse_bundle_json(&raw)?;

    let mut conn = store::open_db(&rt.db_path)?;
    let summary = batch::persist_bundle(&mut conn, &rt, &bundle)?;
    drop(conn);

    println!("Bundle ingest complete");
    println!("DB: {}", rt.db_path.display());
    println!("Fixtures in bundle: {}", bundle.fixtures.len());
    println!("Matches upserted: {}", summary.matches_upserted);
    println!("Extras upserted: {}", summary.extras_upserted);
    println!(
        "Stats: requested={} cached={} stored={} empty={} failed={} over_cap={}",
        summary.prewarm.requested,
        summary.prewarm.already_cached,
        summary.prewarm.fetched,
        summary.prewarm.empty,
        summary.prewarm.failed,
        summary.prewarm.skipped_over_cap
    );

    if !std::env::args().skip(1).any(|a| a == "--run") {
        return Ok(());
    }

    let cfg = load_engine_config(rt.engine_config_path.as_deref())?;
    let date: NaiveDate = bundle.date.unwrap_or_else(|| Utc::now().date_naive());
    let request = DayRequest {
        date,
        fixtures: &bundle.fixtures,
        minute_buckets: &bundle.minute_buckets,
        last_n: DEFAULT_LAST_N,
        h2h_n: DEFAULT_H2H_N,
    };
    match batch::run_day(&rt, &cfg, &request, Some(&bundle.statistics))? {
        BatchOutcome::AlreadyRunning => println!("{date}: batch already running"),
        BatchOutcome::Completed(report) => {
            println!("Batch {}: {} results", report.batch_key, report.results_written);
        }
    }
    Ok(())
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == name {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
