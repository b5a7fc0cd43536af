use serde::{Deserialize, Serialize};

use crate::match_data::{MatchStats, TeamId, TeamStatBlock, Window};

pub const POSSESSION_MIN: f64 = 20.0;
pub const POSSESSION_MAX: f64 = 80.0;

/// Tracked in-match counting statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    ShotsOnTarget,
    TotalShots,
    DangerousAttacks,
    Possession,
    ExpectedGoals,
    BigChances,
    Corners,
    FreeKicks,
    Offsides,
    Crosses,
    Counters,
    Saves,
    ShotsInsideBox,
    ShotsOutsideBox,
    Woodwork,
}

impl StatKind {
    pub const COUNT: usize = 15;

    pub const ALL: [StatKind; StatKind::COUNT] = [
        StatKind::ShotsOnTarget,
        StatKind::TotalShots,
        StatKind::DangerousAttacks,
        StatKind::Possession,
        StatKind::ExpectedGoals,
        StatKind::BigChances,
        StatKind::Corners,
        StatKind::FreeKicks,
        StatKind::Offsides,
        StatKind::Crosses,
        StatKind::Counters,
        StatKind::Saves,
        StatKind::ShotsInsideBox,
        StatKind::ShotsOutsideBox,
        StatKind::Woodwork,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn key(self) -> &'static str {
        match self {
            StatKind::ShotsOnTarget => "sot",
            StatKind::TotalShots => "shots",
            StatKind::DangerousAttacks => "da",
            StatKind::Possession => "pos",
            StatKind::ExpectedGoals => "xg",
            StatKind::BigChances => "big_chances",
            StatKind::Corners => "corners",
            StatKind::FreeKicks => "free_kicks",
            StatKind::Offsides => "offsides",
            StatKind::Crosses => "crosses",
            StatKind::Counters => "counters",
            StatKind::Saves => "saves",
            StatKind::ShotsInsideBox => "shots_inside",
            StatKind::ShotsOutsideBox => "shots_outside",
            StatKind::Woodwork => "woodwork",
        }
    }

    /// Lower-case provider names, most specific first.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            StatKind::ShotsOnTarget => &["shots on goal", "shots on target"],
            StatKind::TotalShots => &["total shots", "shots total", "shots"],
            StatKind::DangerousAttacks => &["dangerous attacks"],
            StatKind::Possession => &["ball possession", "possession"],
            StatKind::ExpectedGoals => &["expected_goals", "expected goals", "xg"],
            StatKind::BigChances => &["big chances", "big chances created"],
            StatKind::Corners => &["corner kicks", "corners"],
            StatKind::FreeKicks => &["free kicks"],
            StatKind::Offsides => &["offsides"],
            StatKind::Crosses => &["crosses", "total crosses"],
            StatKind::Counters => &["counter attacks", "counterattacks"],
            StatKind::Saves => &["goalkeeper saves", "saves"],
            StatKind::ShotsInsideBox => &["shots insidebox", "shots inside box"],
            StatKind::ShotsOutsideBox => &["shots outsidebox", "shots outside box"],
            StatKind::Woodwork => &["hit woodwork", "woodwork"],
        }
    }

    /// Upper bound for a first-half value; full-match caps are double.
    fn first_half_cap(self) -> f64 {
        match self {
            StatKind::ShotsOnTarget => 6.0,
            StatKind::TotalShots => 10.0,
            StatKind::DangerousAttacks => 65.0,
            StatKind::Possession => POSSESSION_MAX,
            StatKind::ExpectedGoals => 1.2,
            StatKind::BigChances => 3.0,
            StatKind::Corners => 6.0,
            StatKind::FreeKicks => 8.0,
            StatKind::Offsides => 4.0,
            StatKind::Crosses => 14.0,
            StatKind::Counters => 6.0,
            StatKind::Saves => 6.0,
            StatKind::ShotsInsideBox => 8.0,
            StatKind::ShotsOutsideBox => 6.0,
            StatKind::Woodwork => 2.0,
        }
    }

    pub fn cap(self, window: Window) -> f64 {
        match (self, window) {
            (StatKind::Possession, _) => POSSESSION_MAX,
            (_, Window::FirstHalf) => self.first_half_cap(),
            (_, Window::FullMatch) => self.first_half_cap() * 2.0,
        }
    }
}

/// One value per [`StatKind`], `None` where the provider had nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatLine {
    values: [Option<f64>; StatKind::COUNT],
}

impl StatLine {
    pub fn get(&self, kind: StatKind) -> Option<f64> {
        self.values[kind.index()]
    }

    pub fn set(&mut self, kind: StatKind, value: Option<f64>) {
        self.values[kind.index()] = value;
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// A team's window statistics from one match plus the opponent's, read as "allowed".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchMicro {
    pub team: StatLine,
    pub opponent: StatLine,
}

fn strip_half_marker(name: &str) -> Option<&str> {
    for prefix in ["1st half ", "first half "] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return Some(rest);
        }
    }
    for suffix in [" 1st half", " first half"] {
        if let Some(rest) = name.strip_suffix(suffix) {
            return Some(rest);
        }
    }
    None
}

fn lookup(block: &TeamStatBlock, kind: StatKind, first_half: bool) -> Option<f64> {
    for candidate in kind.candidates() {
        for entry in &block.entries {
            let name = entry.name.trim().to_ascii_lowercase();
            let matched = if first_half {
                strip_half_marker(&name) == Some(*candidate)
            } else {
                strip_half_marker(&name).is_none() && name == *candidate
            };
            if matched && let Some(v) = entry.value.filter(|v| v.is_finite()) {
                return Some(v);
            }
        }
    }
    None
}

/// Window value of one statistic: explicit first-half entries win, otherwise the
/// full-match value is halved. Values are clamped to `[0, cap]`.
pub fn stat_value(block: &TeamStatBlock, kind: StatKind, window: Window) -> Option<f64> {
    if kind == StatKind::Possession {
        let v = match window {
            Window::FirstHalf => lookup(block, kind, true).or_else(|| lookup(block, kind, false)),
            Window::FullMatch => lookup(block, kind, false),
        }?;
        return Some(v.clamp(POSSESSION_MIN, POSSESSION_MAX));
    }
    let raw = match window {
        Window::FirstHalf => lookup(block, kind, true)
            .or_else(|| lookup(block, kind, false).map(|v| v / 2.0)),
        Window::FullMatch => lookup(block, kind, false),
    }?;
    Some(raw.clamp(0.0, kind.cap(window)))
}

pub fn stat_line(block: &TeamStatBlock, window: Window) -> StatLine {
    let mut line = StatLine::default();
    for kind in StatKind::ALL {
        line.set(kind, stat_value(block, kind, window));
    }
    line
}

/// Both sides' lines for `team`; `None` when either block is missing.
pub fn extract_match_micro(
    stats: &MatchStats,
    team: TeamId,
    opponent: TeamId,
    window: Window,
) -> Option<MatchMicro> {
    let tb = stats.block(team)?;
    let ob = stats.block(opponent)?;
    Some(MatchMicro {
        team: stat_line(tb, window),
        opponent: stat_line(ob, window),
    })
}

#[cfg(test)]
mod tests {
    use super::{StatKind, extract_match_micro, stat_value};
    use crate::match_data::{MatchStats, StatEntry, TeamStatBlock, Window};

    fn block(team_id: u32, entries: &[(&str, Option<f64>)]) -> TeamStatBlock {
        TeamStatBlock {
            team_id,
            entries: entries
                .iter()
                .map(|(n, v)| StatEntry {
                    name: n.to_string(),
                    value: *v,
                })
                .collect(),
        }
    }

    #[test]
    fn prefers_explicit_first_half_value() {
        let b = block(
            1,
            &[("Shots on Goal", Some(8.0)), ("1st Half Shots on Goal", Some(3.0))],
        );
        assert_eq!(stat_value(&b, StatKind::ShotsOnTarget, Window::FirstHalf), Some(3.0));
        assert_eq!(stat_value(&b, StatKind::ShotsOnTarget, Window::FullMatch), Some(8.0));
    }

    #[test]
    fn halves_full_match_and_caps() {
        let b = block(1, &[("Shots on target", Some(20.0)), ("Dangerous Attacks", Some(70.0))]);
        assert_eq!(stat_value(&b, StatKind::ShotsOnTarget, Window::FirstHalf), Some(6.0));
        assert_eq!(stat_value(&b, StatKind::DangerousAttacks, Window::FirstHalf), Some(35.0));
        assert_eq!(stat_value(&b, StatKind::ShotsOnTarget, Window::FullMatch), Some(12.0));
    }

    #[test]
    fn possession_is_not_halved() {
        let b = block(1, &[("Ball Possession", Some(91.0))]);
        assert_eq!(stat_value(&b, StatKind::Possession, Window::FirstHalf), Some(80.0));
    }

    #[test]
    fn null_values_are_missing() {
        let b = block(1, &[("expected_goals", None)]);
        assert_eq!(stat_value(&b, StatKind::ExpectedGoals, Window::FullMatch), None);
    }

    #[test]
    fn missing_opponent_block_skips_match() {
        let stats = MatchStats {
            blocks: vec![block(1, &[("Shots on Goal", Some(4.0))])],
        };
        assert!(extract_match_micro(&stats, 1, 2, Window::FirstHalf).is_none());
    }
}
