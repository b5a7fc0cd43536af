//! Competition-name heuristics: level inference, cup detection and youth/reserve filtering.

use serde::Serialize;

use crate::match_data::LeagueInfo;

pub const DEFAULT_TEAM_TIER: u8 = 2;

const TOP_LEVEL_TOKENS: &[&str] = &[
    "premier",
    "primeira",
    "primera",
    "serie a",
    "bundesliga",
    "ligue 1",
    "ekstraklasa",
    "eredivisie",
    "allsvenskan",
    "eliteserien",
    "super lig",
    "superliga",
    "super league",
    "hnl",
    "mls",
    "a-league",
];

const SECOND_LEVEL_TOKENS: &[&str] = &[
    "championship",
    "ligue 2",
    "serie b",
    "2. bundesliga",
    "segunda",
    "liga 2",
    "eerste divisie",
    "superettan",
    "1. divisjon",
    "obos-ligaen",
    "1st division",
    "1. division",
    "i liga",
    "1. liga",
    "challenger pro league",
    "first league",
    "pro league",
];

const LEVEL3_PLUS_TOKENS: &[&str] = &[
    "ii liga",
    "2. liga",
    "third",
    "3. division",
    "iii liga",
    "liga 3",
    "regionalliga",
    "oberliga",
    "girone",
    "isthmian",
    "npl",
];

const YOUTH_RESERVE_TOKENS: &[&str] = &[
    " u17 ", " u18 ", " u19 ", " u20 ", " u21 ", " u23 ", " youth ", " junior ", " juniors ",
    " academy ", " primavera ", " reserves ", " reserve ",
];

const WOMEN_TOKENS: &[&str] = &[" women ", " womens ", " feminine ", " frauen ", " w "];

const CUP_WORDS: &[&str] = &["cup", "taca", "pokal", "coppa", "copa", "coupe", "kupa"];

const CONTINENTAL_TOKENS: &[&str] = &[
    "champions league",
    "europa league",
    "conference league",
    "libertadores",
    "sudamericana",
    "afc champions",
    "caf champions",
    "concacaf champions",
    "ofc champions",
    "uefa super cup",
];

const NATIONAL_TEAM_TOKENS: &[&str] = &[
    "world cup",
    "euro",
    "nations league",
    "qualif",
    "african cup",
    "asian cup",
    "friendlies",
];

const INTERNATIONAL_COUNTRIES: &[&str] = &[
    "world",
    "europe",
    "asia",
    "africa",
    "south america",
    "north america",
    "international",
];

fn fold_char(ch: char) -> Option<char> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ı' => 'i',
        'ł' | 'ľ' => 'l',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ő' => 'o',
        'ř' => 'r',
        'ś' | 'š' | 'ş' | 'ș' => 's',
        'ť' | 'ţ' | 'ț' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        c if c.is_ascii() => c,
        _ => return None,
    };
    Some(folded)
}

/// Lower-case, trim and strip diacritics; non-Latin characters are dropped.
pub fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter_map(fold_char)
        .collect()
}

fn padded(name: &str) -> String {
    format!(" {} ", normalize(name).replace('-', " "))
}

fn roman_or_digit_level(word: &str) -> Option<u8> {
    match word {
        "i" | "1" => Some(1),
        "ii" | "2" => Some(2),
        "iii" | "3" => Some(3),
        "iv" | "4" => Some(4),
        _ => None,
    }
}

/// Level 1..=4 from a competition name, `None` when nothing matches.
pub fn infer_level(name: &str) -> Option<u8> {
    let s = normalize(name);
    if s.is_empty() {
        return None;
    }
    if TOP_LEVEL_TOKENS.iter().any(|t| s.contains(t)) {
        return Some(1);
    }
    if SECOND_LEVEL_TOKENS.iter().any(|t| s.contains(t)) {
        return Some(2);
    }
    let words = s.replace('.', " ");
    if let Some(level) = words.split_whitespace().find_map(roman_or_digit_level) {
        return Some(level);
    }
    if LEVEL3_PLUS_TOKENS.iter().any(|t| s.contains(t)) {
        return Some(3);
    }
    None
}

pub fn is_cup(name: &str) -> bool {
    let s = normalize(name);
    s.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '\'')
        .any(|word| CUP_WORDS.contains(&word))
}

pub fn is_youth_or_reserve(name: &str) -> bool {
    let s = padded(name);
    YOUTH_RESERVE_TOKENS.iter().any(|t| s.contains(t))
}

pub fn is_women(name: &str) -> bool {
    let s = padded(name);
    WOMEN_TOKENS.iter().any(|t| s.contains(t))
}

pub fn is_international(name: &str, country: Option<&str>) -> bool {
    let s = normalize(name);
    let country = country.map(normalize).unwrap_or_default();
    INTERNATIONAL_COUNTRIES.contains(&country.as_str())
        || CONTINENTAL_TOKENS.iter().any(|t| s.contains(t))
        || NATIONAL_TEAM_TOKENS.iter().any(|t| s.contains(t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    YouthOrReserve,
    Women,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompetitionVerdict {
    pub level: Option<u8>,
    pub cup: bool,
    pub international: bool,
    pub rejected: Option<RejectReason>,
}

impl CompetitionVerdict {
    pub fn admitted(&self) -> bool {
        self.rejected.is_none()
    }
}

pub fn classify(league: &LeagueInfo) -> CompetitionVerdict {
    let name = league.name.as_deref().unwrap_or("");
    let rejected = if is_youth_or_reserve(name) {
        Some(RejectReason::YouthOrReserve)
    } else if is_women(name) {
        Some(RejectReason::Women)
    } else {
        None
    };
    CompetitionVerdict {
        level: infer_level(name),
        cup: is_cup(name),
        international: is_international(name, league.country.as_deref()),
        rejected,
    }
}

/// Highest level (smallest number) a team has played at, clamped to `[1, 4]`.
pub fn infer_team_tier<'a, I>(leagues: I) -> u8
where
    I: IntoIterator<Item = &'a LeagueInfo>,
{
    leagues
        .into_iter()
        .filter_map(|l| l.name.as_deref().and_then(infer_level))
        .min()
        .unwrap_or(DEFAULT_TEAM_TIER)
        .clamp(1, 4)
}
