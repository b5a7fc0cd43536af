//! Local sqlite store: played matches, statistics, extras, derived results and batch
//! bookkeeping.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::context::ExtrasRecord;
use crate::engine::MarketScore;
use crate::match_data::{
    FixtureId, HistoricalMatch, LeagueInfo, Market, MatchStats, Score, TeamHistory, TeamId,
    Window,
};

/// Lifecycle of one day batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Queued,
    Running,
    Done,
    Error,
    Skipped,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Done => "done",
            BatchStatus::Error => "error",
            BatchStatus::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(BatchStatus::Queued),
            "running" => Some(BatchStatus::Running),
            "done" => Some(BatchStatus::Done),
            "error" => Some(BatchStatus::Error),
            "skipped" => Some(BatchStatus::Skipped),
            _ => None,
        }
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            fixture_id INTEGER PRIMARY KEY,
            kickoff TEXT NULL,
            league_id INTEGER NULL,
            season INTEGER NULL,
            league_name TEXT NULL,
            country TEXT NULL,
            round TEXT NULL,
            home_id INTEGER NOT NULL,
            away_id INTEGER NOT NULL,
            ht_home INTEGER NULL,
            ht_away INTEGER NULL,
            ft_home INTEGER NULL,
            ft_away INTEGER NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_home ON matches(home_id, kickoff);
        CREATE INDEX IF NOT EXISTS idx_matches_away ON matches(away_id, kickoff);

        CREATE TABLE IF NOT EXISTS fixture_stats (
            fixture_id INTEGER PRIMARY KEY,
            stats_json TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS extras (
            fixture_id INTEGER PRIMARY KEY,
            extras_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS derived_results (
            fixture_id INTEGER NOT NULL,
            window TEXT NOT NULL,
            market TEXT NOT NULL,
            batch_key TEXT NOT NULL,
            probability REAL NOT NULL,
            raw_probability REAL NOT NULL,
            debug_json TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (fixture_id, window, market)
        );
        CREATE INDEX IF NOT EXISTS idx_results_computed ON derived_results(computed_at);

        CREATE TABLE IF NOT EXISTS batch_runs (
            batch_key TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            detail TEXT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS batch_locks (
            lock_key TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn score_pair(home: Option<u32>, away: Option<u32>) -> Option<Score> {
    Some(Score {
        home: home?,
        away: away?,
    })
}

fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?.as_str())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

const MATCH_COLUMNS: &str = "fixture_id, kickoff, league_id, season, league_name, country, \
     round, home_id, away_id, ht_home, ht_away, ft_home, ft_away";

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<HistoricalMatch> {
    Ok(HistoricalMatch {
        fixture_id: row.get::<_, u64>(0)?,
        kickoff: parse_time(row.get(1)?),
        league: LeagueInfo {
            id: row.get(2)?,
            season: row.get(3)?,
            name: row.get(4)?,
            country: row.get(5)?,
            round: row.get(6)?,
        },
        home_id: row.get(7)?,
        away_id: row.get(8)?,
        halftime: score_pair(row.get(9)?, row.get(10)?),
        fulltime: score_pair(row.get(11)?, row.get(12)?),
    })
}

pub fn upsert_matches(conn: &mut Connection, matches: &[HistoricalMatch]) -> Result<usize> {
    let tx = conn.transaction().context("begin match upsert")?;
    let now = Utc::now().to_rfc3339();
    for m in matches {
        tx.execute(
            r#"
            INSERT INTO matches (
                fixture_id, kickoff, league_id, season, league_name, country, round,
                home_id, away_id, ht_home, ht_away, ft_home, ft_away, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(fixture_id) DO UPDATE SET
                kickoff = excluded.kickoff,
                league_id = excluded.league_id,
                season = excluded.season,
                league_name = excluded.league_name,
                country = excluded.country,
                round = excluded.round,
                home_id = excluded.home_id,
                away_id = excluded.away_id,
                ht_home = excluded.ht_home,
                ht_away = excluded.ht_away,
                ft_home = excluded.ft_home,
                ft_away = excluded.ft_away,
                updated_at = excluded.updated_at
            "#,
            params![
                m.fixture_id as i64,
                m.kickoff.map(|k| k.to_rfc3339()),
                m.league.id,
                m.league.season,
                m.league.name,
                m.league.country,
                m.league.round,
                m.home_id,
                m.away_id,
                m.halftime.map(|s| s.home),
                m.halftime.map(|s| s.away),
                m.fulltime.map(|s| s.home),
                m.fulltime.map(|s| s.away),
                now,
            ],
        )
        .with_context(|| format!("upsert match {}", m.fixture_id))?;
    }
    tx.commit().context("commit match upsert")?;
    Ok(matches.len())
}

/// Upper bound used when no cutoff is given; sorts after every RFC 3339 timestamp.
const OPEN_CUTOFF: &str = "9999";

/// Last `last_n` scored matches of each team that kicked off before `before`.
pub fn load_team_history(
    conn: &Connection,
    teams: &[TeamId],
    last_n: usize,
    before: Option<DateTime<Utc>>,
) -> Result<TeamHistory> {
    let cutoff = before.map_or_else(|| OPEN_CUTOFF.to_string(), |b| b.to_rfc3339());
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM matches \
         WHERE (home_id = ?1 OR away_id = ?1) AND ft_home IS NOT NULL \
           AND kickoff IS NOT NULL AND kickoff < ?2 \
         ORDER BY kickoff DESC, fixture_id DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql).context("prepare team history query")?;
    let mut out = TeamHistory::new();
    for team in teams {
        let rows = stmt
            .query_map(params![team, cutoff, last_n as i64], match_from_row)
            .context("query team history")?;
        let mut matches = Vec::new();
        for row in rows {
            matches.push(row.context("decode match row")?);
        }
        out.insert(*team, matches);
    }
    Ok(out)
}

pub fn load_h2h(
    conn: &Connection,
    a: TeamId,
    b: TeamId,
    last_n: usize,
    before: Option<DateTime<Utc>>,
) -> Result<Vec<HistoricalMatch>> {
    let cutoff = before.map_or_else(|| OPEN_CUTOFF.to_string(), |b| b.to_rfc3339());
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM matches \
         WHERE ((home_id = ?1 AND away_id = ?2) OR (home_id = ?2 AND away_id = ?1)) \
           AND ft_home IS NOT NULL AND kickoff IS NOT NULL AND kickoff < ?3 \
         ORDER BY kickoff DESC, fixture_id DESC LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql).context("prepare h2h query")?;
    let rows = stmt
        .query_map(params![a, b, cutoff, last_n as i64], match_from_row)
        .context("query h2h")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode match row")?);
    }
    Ok(out)
}

pub fn upsert_stats(conn: &Connection, fixture_id: FixtureId, stats: &MatchStats) -> Result<()> {
    let json = serde_json::to_string(stats).context("serialize fixture stats")?;
    conn.execute(
        r#"
        INSERT INTO fixture_stats (fixture_id, stats_json, fetched_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(fixture_id) DO UPDATE SET
            stats_json = excluded.stats_json,
            fetched_at = excluded.fetched_at
        "#,
        params![fixture_id as i64, json, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("upsert stats for fixture {fixture_id}"))?;
    Ok(())
}

pub fn existing_stats_ids(conn: &Connection, ids: &[FixtureId]) -> Result<HashSet<FixtureId>> {
    let mut stmt = conn
        .prepare("SELECT 1 FROM fixture_stats WHERE fixture_id = ?1")
        .context("prepare stats lookup")?;
    let mut out = HashSet::new();
    for id in ids {
        if stmt.exists(params![*id as i64]).context("query stats lookup")? {
            out.insert(*id);
        }
    }
    Ok(out)
}

pub fn load_stats(conn: &Connection, ids: &[FixtureId]) -> Result<HashMap<FixtureId, MatchStats>> {
    let mut stmt = conn
        .prepare("SELECT stats_json FROM fixture_stats WHERE fixture_id = ?1")
        .context("prepare stats query")?;
    let mut out = HashMap::new();
    for id in ids {
        let raw: Option<String> = stmt
            .query_row(params![*id as i64], |row| row.get(0))
            .optional()
            .context("query fixture stats")?;
        if let Some(raw) = raw {
            let stats: MatchStats = serde_json::from_str(&raw)
                .with_context(|| format!("decode stats for fixture {id}"))?;
            out.insert(*id, stats);
        }
    }
    Ok(out)
}

pub fn upsert_extras(
    conn: &Connection,
    fixture_id: FixtureId,
    extras: &ExtrasRecord,
) -> Result<()> {
    let json = serde_json::to_string(extras).context("serialize extras")?;
    conn.execute(
        r#"
        INSERT INTO extras (fixture_id, extras_json, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(fixture_id) DO UPDATE SET
            extras_json = excluded.extras_json,
            updated_at = excluded.updated_at
        "#,
        params![fixture_id as i64, json, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("upsert extras for fixture {fixture_id}"))?;
    Ok(())
}

pub fn load_extras(
    conn: &Connection,
    ids: &[FixtureId],
) -> Result<HashMap<FixtureId, ExtrasRecord>> {
    let mut stmt = conn
        .prepare("SELECT extras_json FROM extras WHERE fixture_id = ?1")
        .context("prepare extras query")?;
    let mut out = HashMap::new();
    for id in ids {
        let raw: Option<String> = stmt
            .query_row(params![*id as i64], |row| row.get(0))
            .optional()
            .context("query extras")?;
        if let Some(raw) = raw {
            let extras: ExtrasRecord = serde_json::from_str(&raw)
                .with_context(|| format!("decode extras for fixture {id}"))?;
            out.insert(*id, extras);
        }
    }
    Ok(out)
}

/// Write scores, replacing any earlier result for the same fixture, window and market.
pub fn write_results(
    conn: &mut Connection,
    batch_key: &str,
    results: &[(FixtureId, MarketScore)],
) -> Result<usize> {
    let tx = conn.transaction().context("begin result write")?;
    let now = Utc::now().to_rfc3339();
    for (fixture_id, score) in results {
        let raw = score
            .debug
            .get("p_blended")
            .and_then(|v| v.as_f64())
            .unwrap_or(score.probability);
        let debug = serde_json::to_string(&score.debug).context("serialize debug map")?;
        tx.execute(
            r#"
            INSERT INTO derived_results (
                fixture_id, window, market, batch_key, probability, raw_probability,
                debug_json, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(fixture_id, window, market) DO UPDATE SET
                batch_key = excluded.batch_key,
                probability = excluded.probability,
                raw_probability = excluded.raw_probability,
                debug_json = excluded.debug_json,
                computed_at = excluded.computed_at
            "#,
            params![
                *fixture_id as i64,
                score.window.as_str(),
                score.market.as_str(),
                batch_key,
                score.probability,
                raw,
                debug,
                now,
            ],
        )
        .with_context(|| format!("write result for fixture {fixture_id}"))?;
    }
    tx.commit().context("commit result write")?;
    Ok(results.len())
}

pub fn purge_results_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM derived_results WHERE computed_at < ?1",
        params![cutoff.to_rfc3339()],
    )
    .context("purge derived results")
}

/// Pre-calibration probability and outcome for every stored result whose match has a score.
pub fn load_graded(conn: &Connection, window: Window, market: Market) -> Result<Vec<(f64, bool)>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT r.raw_probability, m.ht_home, m.ht_away, m.ft_home, m.ft_away
            FROM derived_results r
            JOIN matches m ON m.fixture_id = r.fixture_id
            WHERE r.window = ?1 AND r.market = ?2
            "#,
        )
        .context("prepare graded query")?;
    let rows = stmt
        .query_map(params![window.as_str(), market.as_str()], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                score_pair(row.get(1)?, row.get(2)?),
                score_pair(row.get(3)?, row.get(4)?),
            ))
        })
        .context("query graded results")?;
    let mut out = Vec::new();
    for row in rows {
        let (p, halftime, fulltime) = row.context("decode graded row")?;
        let score = match window {
            Window::FirstHalf => halftime,
            Window::FullMatch => fulltime,
        };
        if let Some(score) = score {
            out.push((p, score.market_hit(market)));
        }
    }
    Ok(out)
}

pub fn set_batch_status(
    conn: &Connection,
    batch_key: &str,
    status: BatchStatus,
    detail: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO batch_runs (batch_key, status, detail, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(batch_key) DO UPDATE SET
            status = excluded.status,
            detail = excluded.detail,
            updated_at = excluded.updated_at
        "#,
        params![batch_key, status.as_str(), detail, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("set status of batch {batch_key}"))?;
    Ok(())
}

pub fn batch_status(conn: &Connection, batch_key: &str) -> Result<Option<BatchStatus>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM batch_runs WHERE batch_key = ?1",
            params![batch_key],
            |row| row.get(0),
        )
        .optional()
        .context("query batch status")?;
    Ok(raw.as_deref().and_then(BatchStatus::parse))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn game(id: u64, home: u32, away: u32, day: u32, ht: (u32, u32)) -> HistoricalMatch {
        HistoricalMatch {
            fixture_id: id,
            kickoff: Utc.with_ymd_and_hms(2025, 3, day, 15, 0, 0).single(),
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
                away: ht.1,
            }),
        }
    }

    #[test]
    fn history_is_recent_first_and_respects_cutoff() {
        let mut conn = open_in_memory().unwrap();
        let matches = vec![
            game(1, 10, 20, 1, (0, 0)),
            game(2, 30, 10, 8, (1, 0)),
            game(3, 10, 40, 15, (0, 1)),
            game(4, 20, 10, 22, (2, 2)),
        ];
        upsert_matches(&mut conn, &matches).unwrap();

        let cutoff = Utc.with_ymd_and_hms(2025, 3, 20, 0, 0, 0).single();
        let history = load_team_history(&conn, &[10], 15, cutoff).unwrap();
        let ids: Vec<u64> = history[&10].iter().map(|m| m.fixture_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(history[&10][0].league.name.as_deref(), Some("Premier League"));

        let h2h = load_h2h(&conn, 20, 10, 10, None).unwrap();
        assert_eq!(h2h.len(), 2);
        assert_eq!(h2h[0].fixture_id, 4);
    }

    #[test]
    fn stats_round_trip_through_json() {
        let conn = open_in_memory().unwrap();
        let stats = MatchStats::default();
        upsert_stats(&conn, 77, &stats).unwrap();
        let existing = existing_stats_ids(&conn, &[77, 78]).unwrap();
        assert!(existing.contains(&77) && !existing.contains(&78));
        assert_eq!(load_stats(&conn, &[77]).unwrap()[&77], stats);
    }

    #[test]
    fn purge_drops_only_old_results() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO derived_results VALUES (1, '1h', 'btts', 'k', 0.4, 0.4, '{}', ?1)",
            params![(Utc::now() - Duration::days(30)).to_rfc3339()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO derived_results VALUES (2, '1h', 'btts', 'k', 0.4, 0.4, '{}', ?1)",
            params![Utc::now().to_rfc3339()],
        )
        .unwrap();
        let purged = purge_results_before(&conn, Utc::now() - Duration::days(14)).unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn batch_status_upserts() {
        let conn = open_in_memory().unwrap();
        assert_eq!(batch_status(&conn, "day:2025-03-01").unwrap(), None);
        set_batch_status(&conn, "day:2025-03-01", BatchStatus::Running, None).unwrap();
        set_batch_status(&conn, "day:2025-03-01", BatchStatus::Done, Some("42")).unwrap();
        assert_eq!(
            batch_status(&conn, "day:2025-03-01").unwrap(),
            Some(BatchStatus::Done)
        );
    }
}
