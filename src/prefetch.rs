//! Bulk statistics warm-up over a small worker pool. Worker failures are counted and
//! logged, never propagated.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::match_data::{FixtureId, MatchStats, TeamHistory};
use crate::store;

pub const MAX_FETCH_WORKERS: usize = 8;

/// Source of statistics for one played fixture; `Ok(None)` when the provider has none.
pub trait StatsFetcher: Sync {
    fn fetch_stats(&self, fixture_id: FixtureId) -> Result<Option<MatchStats>>;
}

impl StatsFetcher for HashMap<FixtureId, MatchStats> {
    fn fetch_stats(&self, fixture_id: FixtureId) -> Result<Option<MatchStats>> {
        Ok(self.get(&fixture_id).cloned())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrewarmSummary {
    pub requested: usize,
    pub already_cached: usize,
    pub skipped_over_cap: usize,
    pub fetched: usize,
    pub empty: usize,
    pub failed: usize,
}

fn build_fetch_pool(workers: usize) -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.clamp(1, MAX_FETCH_WORKERS))
        .build()
        .ok()
}

/// Fixture ids of every match in `history`, deduplicated and in ascending order.
pub fn collect_fixture_ids(history: &TeamHistory) -> Vec<FixtureId> {
    history
        .values()
        .flatten()
        .map(|m| m.fixture_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fetch statistics for every match in `history` not yet stored, at most `max_warm` of
/// them, and store what comes back.
pub fn prewarm_stats<F: StatsFetcher + ?Sized>(
    conn: &Connection,
    fetcher: &F,
    history: &TeamHistory,
    workers: usize,
    max_warm: usize,
) -> Result<PrewarmSummary> {
    let all = collect_fixture_ids(history);
    let existing = store::existing_stats_ids(conn, &all)?;
    let mut missing: Vec<FixtureId> = all
        .iter()
        .copied()
        .filter(|id| !existing.contains(id))
        .collect();

    let mut summary = PrewarmSummary {
        requested: all.len(),
        already_cached: existing.len(),
        ..PrewarmSummary::default()
    };
    if missing.is_empty() {
        info!(requested = summary.requested, "stats warm-up: nothing missing");
        return Ok(summary);
    }
    if missing.len() > max_warm {
        warn!(
            missing = missing.len(),
            cap = max_warm,
            "stats warm-up: too many missing, trimming"
        );
        summary.skipped_over_cap = missing.len() - max_warm;
        missing.truncate(max_warm);
    }

    info!(
        missing = missing.len(),
        workers, "stats warm-up: fetching missing statistics"
    );
    let failed = AtomicUsize::new(0);
    let fetch_all = || {
        missing
            .par_iter()
            .filter_map(|id| match fetcher.fetch_stats(*id) {
                Ok(stats) => Some((*id, stats)),
                Err(err) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(fixture_id = id, "stats warm-up fetch failed: {err:#}");
                    None
                }
            })
            .collect::<Vec<_>>()
    };
    let fetched = match build_fetch_pool(workers) {
        Some(pool) => pool.install(fetch_all),
        None => fetch_all(),
    };

    for (id, stats) in fetched {
        match stats {
            Some(stats) if !stats.blocks.is_empty() => {
                store::upsert_stats(conn, id, &stats)?;
                summary.fetched += 1;
            }
            _ => summary.empty += 1,
        }
    }
    summary.failed = failed.load(Ordering::Relaxed);
    info!(
        fetched = summary.fetched,
        empty = summary.empty,
        failed = summary.failed,
        "stats warm-up done"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::{Result, bail};

    use super::{StatsFetcher, prewarm_stats};
    use crate::match_data::{
        FixtureId, HistoricalMatch, LeagueInfo, MatchStats, StatEntry, TeamHistory,
        TeamStatBlock,
    };
    use crate::store::{self, open_in_memory};

    struct Flaky;

    impl StatsFetcher for Flaky {
        fn fetch_stats(&self, fixture_id: FixtureId) -> Result<Option<MatchStats>> {
            if fixture_id % 3 == 0 {
                bail!("provider timeout");
            }
            if fixture_id % 3 == 1 {
                return Ok(None);
            }
            Ok(Some(MatchStats {
                blocks: vec![TeamStatBlock {
                    team_id: 1,
                    entries: vec![StatEntry {
                        name: "Shots on Goal".to_string(),
                        value: Some(3.0),
                    }],
                }],
            }))
        }
    }

    fn history(ids: &[u64]) -> TeamHistory {
        let matches = ids
            .iter()
            .map(|id| HistoricalMatch {
                fixture_id: *id,
                kickoff: None,
                league: LeagueInfo::default(),
                home_id: 1,
                away_id: 2,
                halftime: None,
                fulltime: None,
            })
            .collect::<Vec<_>>();
        let mut out = TeamHistory::new();
        out.insert(1, matches.clone());
        out.insert(2, matches);
        out
    }

    #[test]
    fn failures_are_counted_not_raised() {
        let conn = open_in_memory().unwrap();
        let summary = prewarm_stats(&conn, &Flaky, &history(&[1, 2, 3, 4, 5, 6]), 2, 100).unwrap();
        assert_eq!(summary.requested, 6);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.empty, 2);
        assert_eq!(summary.fetched, 2);
        assert_eq!(store::existing_stats_ids(&conn, &[2, 5]).unwrap().len(), 2);
    }

    #[test]
    fn cached_ids_are_skipped_and_cap_applies() {
        let conn = open_in_memory().unwrap();
        store::upsert_stats(&conn, 2, &MatchStats::default()).unwrap();
        let source: HashMap<FixtureId, MatchStats> = HashMap::new();
        let summary = prewarm_stats(&conn, &source, &history(&[2, 5, 8, 11]), 1, 2).unwrap();
        assert_eq!(summary.already_cached, 1);
        assert_eq!(summary.skipped_over_cap, 1);
        assert_eq!(summary.empty, 2);
    }
}
