use std::collections::HashMap;

use serde::Serialize;
use serde::ser::SerializeMap;

use crate::match_data::{HistoricalMatch, Side, StatsSource, TeamHistory, TeamId, Window};
use crate::micro_stats::{StatKind, StatLine, extract_match_micro};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningMean {
    sum: f64,
    used: usize,
}

impl RunningMean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.used += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.used > 0).then(|| self.sum / self.used as f64)
    }
}

/// Average window statistics of a team on one venue side, for and allowed, each with its
/// own coverage count.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroForm {
    pub side: Side,
    pub matches_used: usize,
    own: [RunningMean; StatKind::COUNT],
    allowed: [RunningMean; StatKind::COUNT],
}

impl MicroForm {
    pub fn empty(side: Side) -> Self {
        Self {
            side,
            matches_used: 0,
            own: [RunningMean::default(); StatKind::COUNT],
            allowed: [RunningMean::default(); StatKind::COUNT],
        }
    }

    fn push(&mut self, team: &StatLine, opponent: &StatLine) {
        self.matches_used += 1;
        for kind in StatKind::ALL {
            self.own[kind.index()].push(team.get(kind));
            self.allowed[kind.index()].push(opponent.get(kind));
        }
    }

    /// `None` when no match reported the statistic.
    pub fn mean_for(&self, kind: StatKind) -> Option<f64> {
        self.own[kind.index()].mean()
    }

    pub fn mean_allowed(&self, kind: StatKind) -> Option<f64> {
        self.allowed[kind.index()].mean()
    }

    pub fn used_for(&self, kind: StatKind) -> usize {
        self.own[kind.index()].used
    }
}

impl Serialize for MicroForm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("side", &self.side)?;
        map.serialize_entry("matches_used", &self.matches_used)?;
        for kind in StatKind::ALL {
            map.serialize_entry(&format!("{}_for", kind.key()), &self.mean_for(kind))?;
            map.serialize_entry(&format!("{}_allowed", kind.key()), &self.mean_allowed(kind))?;
        }
        map.end()
    }
}

/// `matches` must be ordered most recent first; at most `max_n` matches on `side` are used.
pub fn compute_micro_form<S: StatsSource + ?Sized>(
    window: Window,
    team: TeamId,
    side: Side,
    matches: &[HistoricalMatch],
    stats: &S,
    max_n: usize,
) -> MicroForm {
    let mut form = MicroForm::empty(side);
    let on_side = matches
        .iter()
        .filter(|m| m.side_of(team) == Some(side))
        .take(max_n);
    for m in on_side {
        let opponent = m.team_on(side.other());
        let Some(micro) = stats
            .stats_for(m.fixture_id)
            .and_then(|s| extract_match_micro(s, team, opponent, window))
        else {
            continue;
        };
        form.push(&micro.team, &micro.opponent);
    }
    form
}

pub fn compute_forms<S: StatsSource + ?Sized>(
    window: Window,
    history: &TeamHistory,
    stats: &S,
    max_n: usize,
) -> HashMap<(TeamId, Side), MicroForm> {
    let mut out = HashMap::with_capacity(history.len() * 2);
    for (team, matches) in history {
        for side in [Side::Home, Side::Away] {
            let form = compute_micro_form(window, *team, side, matches, stats, max_n);
            out.insert((*team, side), form);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::compute_micro_form;
    use crate::match_data::{
        HistoricalMatch, LeagueInfo, MatchStats, Side, StatEntry, TeamStatBlock, Window,
    };
    use crate::micro_stats::StatKind;

    fn entry(name: &str, v: f64) -> StatEntry {
        StatEntry {
            name: name.to_string(),
            value: Some(v),
        }
    }

    fn game(id: u64, home: u32, away: u32) -> HistoricalMatch {
        HistoricalMatch {
            fixture_id: id,
            kickoff: None,
            league: LeagueInfo::default(),
            home_id: home,
            away_id: away,
            halftime: None,
            fulltime: None,
        }
    }

    #[test]
    fn per_stat_coverage_and_none_for_unseen() {
        let mut stats: HashMap<u64, MatchStats> = HashMap::new();
        stats.insert(
            1,
            MatchStats {
                blocks: vec![
                    TeamStatBlock {
                        team_id: 7,
                        entries: vec![entry("Shots on Goal", 6.0), entry("Corner Kicks", 0.0)],
                    },
                    TeamStatBlock {
                        team_id: 8,
                        entries: vec![entry("Shots on Goal", 2.0)],
                    },
                ],
            },
        );
        stats.insert(
            2,
            MatchStats {
                blocks: vec![
                    TeamStatBlock {
                        team_id: 7,
                        entries: vec![entry("Shots on Goal", 2.0)],
                    },
                    TeamStatBlock {
                        team_id: 9,
                        entries: vec![],
                    },
                ],
            },
        );
        // Away match and a match with no opponent block are both ignored.
        stats.insert(
            3,
            MatchStats {
                blocks: vec![TeamStatBlock {
                    team_id: 7,
                    entries: vec![entry("Shots on Goal", 6.0)],
                }],
            },
        );
        let matches = vec![game(1, 7, 8), game(2, 7, 9), game(3, 7, 10), game(4, 11, 7)];
        let form = compute_micro_form(Window::FirstHalf, 7, Side::Home, &matches, &stats, 15);

        assert_eq!(form.matches_used, 2);
        assert_eq!(form.mean_for(StatKind::ShotsOnTarget), Some(2.0));
        assert_eq!(form.used_for(StatKind::ShotsOnTarget), 2);
        assert_eq!(form.mean_for(StatKind::Corners), Some(0.0));
        assert_eq!(form.used_for(StatKind::Corners), 1);
        assert_eq!(form.mean_allowed(StatKind::ShotsOnTarget), Some(1.0));
        assert_eq!(form.mean_for(StatKind::ExpectedGoals), None);
    }
}
