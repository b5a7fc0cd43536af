use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TeamId = u32;
pub type FixtureId = u64;
pub type LeagueId = u32;

/// Time segment a market is scored over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    FirstHalf,
    FullMatch,
}

impl Window {
    pub const ALL: [Window; 2] = [Window::FirstHalf, Window::FullMatch];

    pub fn as_str(self) -> &'static str {
        match self {
            Window::FirstHalf => "1h",
            Window::FullMatch => "ft",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1h" | "first_half" | "ht" => Some(Window::FirstHalf),
            "ft" | "full_match" | "full" => Some(Window::FullMatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    AtLeastOne,
    AtLeastTwo,
    BothScore,
}

impl Market {
    pub const ALL: [Market; 3] = [Market::AtLeastOne, Market::AtLeastTwo, Market::BothScore];

    pub fn as_str(self) -> &'static str {
        match self {
            Market::AtLeastOne => "over_0_5",
            Market::AtLeastTwo => "over_1_5",
            Market::BothScore => "btts",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "over_0_5" | "ge1" | "at_least_one" => Some(Market::AtLeastOne),
            "over_1_5" | "ge2" | "at_least_two" => Some(Market::AtLeastTwo),
            "btts" | "both_score" | "gg" => Some(Market::BothScore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.home + self.away
    }

    pub fn side(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }

    pub fn market_hit(&self, market: Market) -> bool {
        match market {
            Market::AtLeastOne => self.total() >= 1,
            Market::AtLeastTwo => self.total() >= 2,
            Market::BothScore => self.home > 0 && self.away > 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeagueInfo {
    pub id: Option<LeagueId>,
    pub season: Option<i32>,
    pub name: Option<String>,
    pub country: Option<String>,
    pub round: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub fixture_id: FixtureId,
    pub kickoff: Option<DateTime<Utc>>,
    #[serde(default)]
    pub league: LeagueInfo,
    pub home_id: TeamId,
    pub away_id: TeamId,
    pub halftime: Option<Score>,
    pub fulltime: Option<Score>,
}

impl HistoricalMatch {
    pub fn score(&self, window: Window) -> Option<Score> {
        match window {
            Window::FirstHalf => self.halftime,
            Window::FullMatch => self.fulltime,
        }
    }

    pub fn side_of(&self, team: TeamId) -> Option<Side> {
        if self.home_id == team {
            Some(Side::Home)
        } else if self.away_id == team {
            Some(Side::Away)
        } else {
            None
        }
    }

    pub fn team_on(&self, side: Side) -> TeamId {
        match side {
            Side::Home => self.home_id,
            Side::Away => self.away_id,
        }
    }

    pub fn opponent_of(&self, team: TeamId) -> Option<TeamId> {
        self.side_of(team).map(|side| self.team_on(side.other()))
    }

    /// Goals scored and conceded by `team` inside `window`.
    pub fn goals_for_against(&self, team: TeamId, window: Window) -> Option<(u32, u32)> {
        let side = self.side_of(team)?;
        let score = self.score(window)?;
        Some((score.side(side), score.side(side.other())))
    }

    pub fn market_hit(&self, window: Window, market: Market) -> Option<bool> {
        self.score(window).map(|s| s.market_hit(market))
    }
}

/// Decimal odds quoted for one market of an upcoming fixture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    pub window: Window,
    pub market: Market,
    pub decimal: f64,
    #[serde(default)]
    pub opposite: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub fixture_id: FixtureId,
    pub kickoff: Option<DateTime<Utc>>,
    #[serde(default)]
    pub league: LeagueInfo,
    pub home_id: TeamId,
    pub away_id: TeamId,
    #[serde(default)]
    pub home_name: Option<String>,
    #[serde(default)]
    pub away_name: Option<String>,
    #[serde(default)]
    pub odds: Vec<MarketOdds>,
}

impl Fixture {
    pub fn odds_for(&self, window: Window, market: Market) -> Option<&MarketOdds> {
        self.odds
            .iter()
            .find(|o| o.window == window && o.market == market)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatBlock {
    pub team_id: TeamId,
    pub entries: Vec<StatEntry>,
}

/// Per-team statistic blocks of one played match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub blocks: Vec<TeamStatBlock>,
}

impl MatchStats {
    pub fn block(&self, team: TeamId) -> Option<&TeamStatBlock> {
        self.blocks.iter().find(|b| b.team_id == team)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.entries.is_empty())
    }
}

/// Lookup of statistics blocks by fixture id.
pub trait StatsSource {
    fn stats_for(&self, fixture_id: FixtureId) -> Option<&MatchStats>;
}

impl StatsSource for HashMap<FixtureId, MatchStats> {
    fn stats_for(&self, fixture_id: FixtureId) -> Option<&MatchStats> {
        self.get(&fixture_id)
    }
}

/// Season goals split into six 15-minute segments (stoppage time folded into the last one
/// of each half).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MinuteBuckets {
    pub matches: u32,
    pub goals_for: [f64; 6],
    pub goals_against: [f64; 6],
}

pub type TeamHistory = HashMap<TeamId, Vec<HistoricalMatch>>;
pub type H2hHistory = HashMap<String, Vec<HistoricalMatch>>;

/// Head-to-head key for a pair of teams, numerically sorted.
pub fn h2h_key(a: TeamId, b: TeamId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}-{hi}")
}

/// Most recent kickoff first; undated matches sink to the end.
pub fn sort_recent_first(matches: &mut [HistoricalMatch]) {
    matches.sort_by(|a, b| {
        b.kickoff
            .cmp(&a.kickoff)
            .then_with(|| b.fixture_id.cmp(&a.fixture_id))
    });
}
