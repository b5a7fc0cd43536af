//! Day batch: load history, warm statistics, build one snapshot per window, score every
//! fixture for every market and store the results, all under the batch lock.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::batch_lock;
use crate::config::{EngineConfig, RuntimeConfig};
use crate::context::{ExtrasRecord, importance_score};
use crate::engine::{BatchSnapshot, FixtureContext, MarketScore, score_all_markets};
use crate::ingest::Bundle;
use crate::match_data::{
    Fixture, FixtureId, H2hHistory, MinuteBuckets, TeamHistory, TeamId, Window, h2h_key,
};
use crate::prefetch::{PrewarmSummary, StatsFetcher, collect_fixture_ids, prewarm_stats};
use crate::store::{self, BatchStatus};

pub const DEFAULT_LAST_N: usize = 15;
pub const DEFAULT_H2H_N: usize = 10;

#[derive(Debug, Clone)]
pub struct DayRequest<'a> {
    pub date: NaiveDate,
    pub fixtures: &'a [Fixture],
    pub minute_buckets: &'a HashMap<TeamId, MinuteBuckets>,
    pub last_n: usize,
    pub h2h_n: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub batch_key: String,
    pub fixtures: usize,
    pub teams: usize,
    pub results_written: usize,
    pub prewarm: Option<PrewarmSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    AlreadyRunning,
    Completed(BatchReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleIngest {
    pub matches_upserted: usize,
    pub extras_upserted: usize,
    pub prewarm: PrewarmSummary,
}

/// Store a bundle's played matches, statistics and extras so a later batch reads them back.
pub fn persist_bundle(
    conn: &mut Connection,
    rt: &RuntimeConfig,
    bundle: &Bundle,
) -> Result<BundleIngest> {
    let mut matches: Vec<_> = bundle
        .team_last_matches
        .values()
        .chain(bundle.h2h.values())
        .flatten()
        .cloned()
        .collect();
    matches.sort_by_key(|m| m.fixture_id);
    matches.dedup_by_key(|m| m.fixture_id);
    let matches_upserted = store::upsert_matches(conn, &matches)?;

    let mut warm = TeamHistory::new();
    for m in &matches {
        warm.entry(m.home_id).or_default().push(m.clone());
    }
    let prewarm = prewarm_stats(
        conn,
        &bundle.statistics,
        &warm,
        rt.fetch_workers,
        rt.max_warm,
    )?;

    for (id, record) in &bundle.extras {
        store::upsert_extras(conn, *id, record)?;
    }
    info!(
        matches = matches_upserted,
        extras = bundle.extras.len(),
        "bundle stored"
    );
    Ok(BundleIngest {
        matches_upserted,
        extras_upserted: bundle.extras.len(),
        prewarm,
    })
}

pub fn batch_key(date: NaiveDate) -> String {
    format!("day:{date}")
}

/// Run the batch for one day. A batch already running here or in another process is
/// reported, not treated as an error.
pub fn run_day<F: StatsFetcher + ?Sized>(
    rt: &RuntimeConfig,
    cfg: &EngineConfig,
    request: &DayRequest<'_>,
    fetcher: Option<&F>,
) -> Result<BatchOutcome> {
    let key = batch_key(request.date);
    let Some(_guard) = batch_lock::acquire(&rt.db_path, &key, rt.lock_ttl_secs)? else {
        info!(batch_key = %key, "batch already running, skipping");
        return Ok(BatchOutcome::AlreadyRunning);
    };

    let mut conn = store::open_db(&rt.db_path)?;
    store::set_batch_status(&conn, &key, BatchStatus::Queued, None)?;
    if request.fixtures.is_empty() {
        store::set_batch_status(&conn, &key, BatchStatus::Skipped, Some("no fixtures"))?;
        info!(batch_key = %key, "no fixtures, batch skipped");
        return Ok(BatchOutcome::Completed(BatchReport {
            batch_key: key,
            ..BatchReport::default()
        }));
    }

    store::set_batch_status(&conn, &key, BatchStatus::Running, None)?;
    match run_locked(&mut conn, rt, cfg, request, fetcher, &key) {
        Ok(report) => {
            let detail = format!("{} results", report.results_written);
            store::set_batch_status(&conn, &key, BatchStatus::Done, Some(&detail))?;
            info!(
                batch_key = %key,
                fixtures = report.fixtures,
                results = report.results_written,
                "batch done"
            );
            Ok(BatchOutcome::Completed(report))
        }
        Err(err) => {
            let detail = format!("{err:#}");
            if let Err(status_err) =
                store::set_batch_status(&conn, &key, BatchStatus::Error, Some(&detail))
            {
                warn!(batch_key = %key, "could not record batch error: {status_err:#}");
            }
            Err(err)
        }
    }
}

fn run_locked<F: StatsFetcher + ?Sized>(
    conn: &mut Connection,
    rt: &RuntimeConfig,
    cfg: &EngineConfig,
    request: &DayRequest<'_>,
    fetcher: Option<&F>,
    key: &str,
) -> Result<BatchReport> {
    let cutoff = request.date.and_time(NaiveTime::MIN).and_utc();
    let teams: Vec<TeamId> = request
        .fixtures
        .iter()
        .flat_map(|f| [f.home_id, f.away_id])
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let history = store::load_team_history(conn, &teams, request.last_n, Some(cutoff))?;

    let mut h2h = H2hHistory::new();
    for f in request.fixtures {
        let pair = store::load_h2h(conn, f.home_id, f.away_id, request.h2h_n, Some(cutoff))?;
        h2h.insert(h2h_key(f.home_id, f.away_id), pair);
    }

    let prewarm = match fetcher {
        Some(fetcher) => Some(prewarm_stats(
            conn,
            fetcher,
            &history,
            rt.fetch_workers,
            rt.max_warm,
        )?),
        None => None,
    };

    let match_ids = collect_fixture_ids(&history);
    let stats = store::load_stats(conn, &match_ids)?;
    let fixture_ids: Vec<FixtureId> = request.fixtures.iter().map(|f| f.fixture_id).collect();
    let raw_extras = store::load_extras(conn, &fixture_ids)?;

    let mut results: Vec<(FixtureId, MarketScore)> = Vec::new();
    for window in Window::ALL {
        let snapshot = BatchSnapshot::build(cfg, window, history.clone(), &stats);
        let extras = prepare_extras(&snapshot, request.fixtures, &raw_extras);
        let scored: Vec<(FixtureId, MarketScore)> = request
            .fixtures
            .par_iter()
            .flat_map_iter(|f| {
                let ctx = FixtureContext {
                    h2h: h2h
                        .get(&h2h_key(f.home_id, f.away_id))
                        .map(Vec::as_slice)
                        .unwrap_or(&[]),
                    extras: extras.get(&f.fixture_id),
                    minute_buckets: request
                        .minute_buckets
                        .get(&f.home_id)
                        .zip(request.minute_buckets.get(&f.away_id)),
                };
                score_all_markets(&snapshot, f, &ctx)
                    .into_iter()
                    .map(move |s| (f.fixture_id, s))
            })
            .collect();
        results.extend(scored);
    }

    let results_written = store::write_results(conn, key, &results)?;
    Ok(BatchReport {
        batch_key: key.to_string(),
        fixtures: request.fixtures.len(),
        teams: teams.len(),
        results_written,
        prewarm,
    })
}

/// Fill in adjustments from observations, and an importance score from the competition when
/// none was observed. Referee outcomes are window goal outcomes, so they are measured against
/// the league's window rate rather than the per-side rate.
pub fn prepare_extras(
    snapshot: &BatchSnapshot,
    fixtures: &[Fixture],
    raw: &HashMap<FixtureId, ExtrasRecord>,
) -> HashMap<FixtureId, ExtrasRecord> {
    fixtures
        .iter()
        .filter_map(|f| {
            let mut record = raw.get(&f.fixture_id)?.clone();
            let mut obs = record.observations.clone();
            if obs.importance.is_none()
                && let Some(name) = f.league.name.as_deref()
            {
                obs.importance = Some(importance_score(name, f.league.round.as_deref(), None));
            }
            let rate_ge1 = snapshot.baselines.get(f.league.id).rate_ge1;
            record.apply_observations(obs, rate_ge1);
            Some((f.fixture_id, record))
        })
        .collect()
}
