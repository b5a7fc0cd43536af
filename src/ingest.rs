//! Provider-shaped JSON into canonical records. Nothing past this module sees raw JSON.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::warn;

use crate::context::ExtrasRecord;
use crate::match_data::{
    Fixture, FixtureId, H2hHistory, HistoricalMatch, LeagueInfo, Market, MarketOdds,
    MatchStats, MinuteBuckets, Score, StatEntry, TeamHistory, TeamId, TeamStatBlock, Window,
    h2h_key,
};

const FINISHED_STATUSES: [&str; 3] = ["FT", "AET", "PEN"];

/// Everything one day batch needs, as handed over by the fetch layer.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub date: Option<NaiveDate>,
    pub fixtures: Vec<Fixture>,
    pub team_last_matches: TeamHistory,
    pub h2h: H2hHistory,
    pub statistics: HashMap<FixtureId, MatchStats>,
    pub extras: HashMap<FixtureId, ExtrasRecord>,
    pub minute_buckets: HashMap<TeamId, MinuteBuckets>,
}

/// Numbers may arrive as JSON numbers, numeric strings, or percentages like `"54%"`.
pub fn stat_number(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return n.is_finite().then_some(n);
    }
    let raw = v.as_str()?.trim().trim_end_matches('%').trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn as_u64_any(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<u64>().ok()
}

fn as_u32_any(v: &Value) -> Option<u32> {
    let n = as_u64_any(v)?;
    u32::try_from(n).ok()
}

fn as_string(v: Option<&Value>) -> Option<String> {
    let s = v?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_kickoff(v: Option<&Value>) -> Option<DateTime<Utc>> {
    if let Some(ts) = v.and_then(Value::as_i64) {
        return DateTime::from_timestamp(ts, 0);
    }
    let raw = v?.as_str()?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn fixture_kickoff(fixture: &Value) -> Option<DateTime<Utc>> {
    parse_kickoff(fixture.get("date")).or_else(|| parse_kickoff(fixture.get("timestamp")))
}

fn parse_score(v: Option<&Value>) -> Option<Score> {
    let v = v?;
    let home = v.get("home").and_then(as_u32_any)?;
    let away = v.get("away").and_then(as_u32_any)?;
    Some(Score { home, away })
}

fn parse_league(v: Option<&Value>) -> LeagueInfo {
    let Some(v) = v else {
        return LeagueInfo::default();
    };
    LeagueInfo {
        id: v.get("id").and_then(as_u32_any),
        season: v
            .get("season")
            .and_then(as_u64_any)
            .and_then(|n| i32::try_from(n).ok()),
        name: as_string(v.get("name")),
        country: as_string(v.get("country")),
        round: as_string(v.get("round")),
    }
}

fn team_id(entry: &Value, side: &str) -> Option<TeamId> {
    entry.get("teams")?.get(side)?.get("id").and_then(as_u32_any)
}

fn team_name(entry: &Value, side: &str) -> Option<String> {
    as_string(entry.get("teams")?.get(side)?.get("name"))
}

/// The `response` array of an envelope, a bare array, or nothing for `null`.
fn response_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("response") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// A played fixture; entries that are not finished or lack ids are skipped.
pub fn parse_historical_entry(entry: &Value) -> Option<HistoricalMatch> {
    let fixture = entry.get("fixture")?;
    let fixture_id = fixture.get("id").and_then(as_u64_any)?;
    if let Some(status) = fixture
        .get("status")
        .and_then(|s| s.get("short"))
        .and_then(Value::as_str)
        && !FINISHED_STATUSES.contains(&status)
    {
        return None;
    }
    let score = entry.get("score");
    let fulltime = parse_score(score.and_then(|s| s.get("fulltime")))
        .or_else(|| parse_score(entry.get("goals")));
    Some(HistoricalMatch {
        fixture_id,
        kickoff: fixture_kickoff(fixture),
        league: parse_league(entry.get("league")),
        home_id: team_id(entry, "home")?,
        away_id: team_id(entry, "away")?,
        halftime: parse_score(score.and_then(|s| s.get("halftime"))),
        fulltime,
    })
}

pub fn parse_historical_json(raw: &str) -> Result<Vec<HistoricalMatch>> {
    let value: Value = serde_json::from_str(raw).context("parse fixtures json")?;
    Ok(response_items(&value)
        .into_iter()
        .filter_map(parse_historical_entry)
        .collect())
}

/// Odds keyed `"<window>_<market>"`, e.g. `"1h_over_0_5"`, valued by a decimal price or
/// `{"decimal": .., "opposite": ..}`.
fn parse_odds(v: Option<&Value>) -> Vec<MarketOdds> {
    let Some(Value::Object(map)) = v else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (key, price) in map {
        let Some((window, market)) = key.split_once('_') else {
            continue;
        };
        let (Some(window), Some(market)) = (Window::parse(window), Market::parse(market)) else {
            continue;
        };
        let (decimal, opposite) = match price {
            Value::Object(p) => (
                p.get("decimal").and_then(stat_number),
                p.get("opposite").and_then(stat_number),
            ),
            other => (stat_number(other), None),
        };
        if let Some(decimal) = decimal {
            out.push(MarketOdds {
                window,
                market,
                decimal,
                opposite,
            });
        }
    }
    out.sort_by_key(|o| (o.window, o.market));
    out
}

pub fn parse_upcoming_entry(entry: &Value) -> Option<Fixture> {
    let fixture = entry.get("fixture")?;
    Some(Fixture {
        fixture_id: fixture.get("id").and_then(as_u64_any)?,
        kickoff: fixture_kickoff(fixture),
        league: parse_league(entry.get("league")),
        home_id: team_id(entry, "home")?,
        away_id: team_id(entry, "away")?,
        home_name: team_name(entry, "home"),
        away_name: team_name(entry, "away"),
        odds: parse_odds(entry.get("odds")),
    })
}

pub fn parse_upcoming_json(raw: &str) -> Result<Vec<Fixture>> {
    let value: Value = serde_json::from_str(raw).context("parse upcoming json")?;
    Ok(response_items(&value)
        .into_iter()
        .filter_map(parse_upcoming_entry)
        .collect())
}

/// One statistics response: a list of `{team: {id}, statistics: [{type, value}]}`.
pub fn parse_statistics_value(value: &Value) -> MatchStats {
    let blocks = response_items(value)
        .into_iter()
        .filter_map(|item| {
            let team_id = item.get("team")?.get("id").and_then(as_u32_any)?;
            let entries = item
                .get("statistics")
                .and_then(Value::as_array)
                .map(|stats| {
                    stats
                        .iter()
                        .filter_map(|s| {
                            Some(StatEntry {
                                name: as_string(s.get("type"))?,
                                value: s.get("value").and_then(stat_number),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(TeamStatBlock { team_id, entries })
        })
        .collect();
    MatchStats { blocks }
}

pub fn parse_statistics_json(raw: &str) -> Result<MatchStats> {
    let value: Value = serde_json::from_str(raw).context("parse statistics json")?;
    Ok(parse_statistics_value(&value))
}

fn parse_team_map<T>(
    v: Option<&Value>,
    mut parse: impl FnMut(&Value) -> Option<T>,
) -> HashMap<TeamId, T> {
    let Some(Value::Object(map)) = v else {
        return HashMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| Some((k.trim().parse::<TeamId>().ok()?, parse(v)?)))
        .collect()
}

fn parse_match_list(v: &Value) -> Vec<HistoricalMatch> {
    response_items(v)
        .into_iter()
        .filter_map(parse_historical_entry)
        .collect()
}

/// Re-key head-to-head lists so both `"a-b"` and `"b-a"` land on [`h2h_key`].
fn parse_h2h(v: Option<&Value>) -> H2hHistory {
    let Some(Value::Object(map)) = v else {
        return H2hHistory::new();
    };
    let mut out = H2hHistory::new();
    for (key, list) in map {
        let Some((a, b)) = key.split_once('-') else {
            continue;
        };
        let (Ok(a), Ok(b)) = (a.trim().parse::<TeamId>(), b.trim().parse::<TeamId>()) else {
            continue;
        };
        out.entry(h2h_key(a, b))
            .or_default()
            .extend(parse_match_list(list));
    }
    out
}

pub fn parse_bundle_json(raw: &str) -> Result<Bundle> {
    let value: Value = serde_json::from_str(raw).context("parse bundle json")?;
    if value.is_null() {
        return Ok(Bundle::default());
    }

    let date = value
        .get("date")
        .and_then(Value::as_str)
        .map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d"))
        .transpose()
        .context("parse bundle date")?;

    let fixtures = value
        .get("fixtures")
        .map(|v| {
            response_items(v)
                .into_iter()
                .filter_map(parse_upcoming_entry)
                .collect()
        })
        .unwrap_or_default();

    let team_last_matches = parse_team_map(value.get("team_last_matches"), |v| {
        Some(parse_match_list(v))
    });

    let statistics = match value.get("statistics") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| Some((k.trim().parse::<FixtureId>().ok()?, v)))
            .map(|(id, v)| (id, parse_statistics_value(v)))
            .filter(|(_, stats)| !stats.blocks.is_empty())
            .collect(),
        _ => HashMap::new(),
    };

    let mut extras = HashMap::new();
    if let Some(Value::Object(map)) = value.get("extras") {
        for (k, v) in map {
            let Ok(id) = k.trim().parse::<FixtureId>() else {
                continue;
            };
            match serde_json::from_value::<ExtrasRecord>(v.clone()) {
                Ok(record) => {
                    extras.insert(id, record);
                }
                Err(err) => warn!(fixture_id = id, error = %err, "skipping malformed extras"),
            }
        }
    }

    let minute_buckets = parse_team_map(value.get("minute_buckets"), |v| {
        serde_json::from_value::<MinuteBuckets>(v.clone()).ok()
    });

    Ok(Bundle {
        date,
        fixtures,
        team_last_matches,
        h2h: parse_h2h(value.get("h2h")),
        statistics,
        extras,
        minute_buckets,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_historical_entry, parse_odds, stat_number};
    use crate::match_data::{Market, Window};

    #[test]
    fn stat_numbers_accept_percent_and_null() {
        assert_eq!(stat_number(&json!("54%")), Some(54.0));
        assert_eq!(stat_number(&json!(" 0.87 ")), Some(0.87));
        assert_eq!(stat_number(&json!(7)), Some(7.0));
        assert_eq!(stat_number(&json!(null)), None);
        assert_eq!(stat_number(&json!("")), None);
        assert_eq!(stat_number(&json!("n/a")), None);
    }

    #[test]
    fn unfinished_fixture_is_skipped() {
        let entry = json!({
            "fixture": {"id": 5, "status": {"short": "NS"}},
            "teams": {"home": {"id": 1}, "away": {"id": 2}}
        });
        assert!(parse_historical_entry(&entry).is_none());
    }

    #[test]
    fn odds_keys_split_window_and_market() {
        let odds = parse_odds(Some(&json!({
            "1h_over_0_5": 1.4,
            "ft_btts": {"decimal": "1.9", "opposite": 1.95},
            "weird": 2.0
        })));
        assert_eq!(odds.len(), 2);
        assert_eq!(odds[0].window, Window::FirstHalf);
        assert_eq!(odds[0].market, Market::AtLeastOne);
        assert_eq!(odds[1].market, Market::BothScore);
        assert_eq!(odds[1].opposite, Some(1.95));
    }
}
