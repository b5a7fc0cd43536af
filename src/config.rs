use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::match_data::{Market, Window};

/// Logit-model coefficients for the per-side scoring probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelWeights {
    pub bias: f64,
    pub z_sot: f64,
    pub z_da: f64,
    pub z_shots: f64,
    pub z_xg: f64,
    pub z_big_chances: f64,
    pub possession: f64,
    pub finishing: f64,
    pub finishing_xg: f64,
    pub leak: f64,
    pub goalkeeper: f64,
    pub rest: f64,
    pub congestion: f64,
    pub home: f64,
    pub attack: f64,
    pub defence: f64,
    pub tier_gap: f64,
    pub cup_tier_mult: f64,
    pub set_piece: f64,
    pub referee_mult: f64,
    pub weather_mult: f64,
    pub lineup_mult: f64,
    pub penalty_var_mult: f64,
    pub stadium_mult: f64,
    pub referee: f64,
    pub weather: f64,
    pub venue: f64,
    pub lineups: f64,
    pub injuries: f64,
    pub importance: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            bias: 0.0,
            z_sot: 0.55,
            z_da: 0.22,
            z_shots: 0.18,
            z_xg: 0.28,
            z_big_chances: 0.14,
            possession: 0.18,
            finishing: 0.38,
            finishing_xg: 0.19,
            leak: 0.32,
            goalkeeper: 0.08,
            rest: 0.06,
            congestion: 0.06,
            home: 0.05,
            attack: 0.25,
            defence: 0.25,
            tier_gap: 0.35,
            cup_tier_mult: 1.35,
            set_piece: 0.10,
            referee_mult: 0.06,
            weather_mult: 0.04,
            lineup_mult: 0.08,
            penalty_var_mult: 0.03,
            stadium_mult: 0.02,
            referee: 0.08,
            weather: 0.05,
            venue: 0.03,
            lineups: 0.05,
            injuries: 0.05,
            importance: 0.05,
        }
    }
}

/// Recency walk and pseudo-count for team strengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthParams {
    pub lambda: f64,
    pub max_n: usize,
    pub tau: f64,
}

impl Default for StrengthParams {
    fn default() -> Self {
        Self {
            lambda: 5.0,
            max_n: 15,
            tau: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileParams {
    pub lambda: f64,
    pub max_n: usize,
    pub finish_prior: f64,
    pub leak_prior: f64,
    pub finish_tau: f64,
    pub gk_save_prior: f64,
    pub gk_save_tau: f64,
    pub fin_xg_tau: f64,
    pub rest_ref_days: f64,
    pub reliability_k: f64,
}

impl Default for ProfileParams {
    fn default() -> Self {
        Self {
            lambda: 5.0,
            max_n: 15,
            finish_prior: 0.34,
            leak_prior: 0.34,
            finish_tau: 6.0,
            gk_save_prior: 0.70,
            gk_save_tau: 8.0,
            fin_xg_tau: 6.0,
            rest_ref_days: 5.0,
            reliability_k: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineParams {
    /// Leagues with fewer outcome samples use the global rates.
    pub min_league_matches: usize,
    pub exclude_youth: bool,
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self {
            min_league_matches: 5,
            exclude_youth: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorParams {
    pub team_lambda: f64,
    pub team_max_n: usize,
    pub team_tau: f64,
    pub h2h_lambda: f64,
    pub h2h_max_n: usize,
    pub h2h_tau: f64,
    pub h2h_min_matches: usize,
    pub h2h_weight_scale: f64,
    pub minute_bucket_weight: f64,
    pub form_window: usize,
    pub form_trend_weight: f64,
    pub form_trend_cap: f64,
    pub coach_change_bump: f64,
    pub tendency_weight: f64,
    pub tendency_cap: f64,
    pub nudge_total_cap: f64,
}

impl Default for PriorParams {
    fn default() -> Self {
        Self {
            team_lambda: 5.0,
            team_max_n: 15,
            team_tau: 8.0,
            h2h_lambda: 4.0,
            h2h_max_n: 10,
            h2h_tau: 12.0,
            h2h_min_matches: 3,
            h2h_weight_scale: 0.4,
            minute_bucket_weight: 0.15,
            form_window: 5,
            form_trend_weight: 0.6,
            form_trend_cap: 0.15,
            coach_change_bump: 0.08,
            tendency_weight: 0.5,
            tendency_cap: 0.12,
            nudge_total_cap: 0.35,
        }
    }
}

/// `rho = clamp(base + slope * pace_z, min, max) * max(gap_floor, 1 - gap_decay * |gap|)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhoParams {
    pub base: f64,
    pub pace_slope: f64,
    pub min: f64,
    pub max: f64,
}

impl RhoParams {
    pub const AT_LEAST_ONE: Self = Self {
        base: 0.05,
        pace_slope: 0.05,
        min: -0.05,
        max: 0.20,
    };
    pub const BOTH_SCORE_FIRST_HALF: Self = Self {
        base: 0.15,
        pace_slope: 0.06,
        min: 0.0,
        max: 0.35,
    };
    pub const BOTH_SCORE_FULL_MATCH: Self = Self {
        base: 0.10,
        pace_slope: 0.05,
        min: 0.0,
        max: 0.30,
    };
}

impl Default for RhoParams {
    fn default() -> Self {
        Self::AT_LEAST_ONE
    }
}

/// A partial `RhoParams` from JSON; absent fields keep the market's own defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RhoOverride {
    base: Option<f64>,
    pace_slope: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

impl RhoOverride {
    fn over(self, defaults: RhoParams) -> RhoParams {
        RhoParams {
            base: self.base.unwrap_or(defaults.base),
            pace_slope: self.pace_slope.unwrap_or(defaults.pace_slope),
            min: self.min.unwrap_or(defaults.min),
            max: self.max.unwrap_or(defaults.max),
        }
    }
}

fn rho_over<'de, D: Deserializer<'de>>(
    deserializer: D,
    defaults: RhoParams,
) -> Result<RhoParams, D::Error> {
    RhoOverride::deserialize(deserializer).map(|o| o.over(defaults))
}

fn at_least_one_rho<'de, D: Deserializer<'de>>(d: D) -> Result<RhoParams, D::Error> {
    rho_over(d, RhoParams::AT_LEAST_ONE)
}

fn both_score_first_half_rho<'de, D: Deserializer<'de>>(d: D) -> Result<RhoParams, D::Error> {
    rho_over(d, RhoParams::BOTH_SCORE_FIRST_HALF)
}

fn both_score_full_match_rho<'de, D: Deserializer<'de>>(d: D) -> Result<RhoParams, D::Error> {
    rho_over(d, RhoParams::BOTH_SCORE_FULL_MATCH)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JointParams {
    #[serde(deserialize_with = "at_least_one_rho")]
    pub at_least_one: RhoParams,
    #[serde(deserialize_with = "both_score_first_half_rho")]
    pub both_score_first_half: RhoParams,
    #[serde(deserialize_with = "both_score_full_match_rho")]
    pub both_score_full_match: RhoParams,
    pub gap_decay: f64,
    pub gap_floor: f64,
    pub synergy_decay: f64,
    pub synergy_floor: f64,
}

impl Default for JointParams {
    fn default() -> Self {
        Self {
            at_least_one: RhoParams::AT_LEAST_ONE,
            both_score_first_half: RhoParams::BOTH_SCORE_FIRST_HALF,
            both_score_full_match: RhoParams::BOTH_SCORE_FULL_MATCH,
            gap_decay: 0.2,
            gap_floor: 0.5,
            synergy_decay: 0.12,
            synergy_floor: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub temperature: f64,
    pub floor: f64,
    pub ceiling: f64,
}

impl Calibration {
    pub const SIDE: Self = Self {
        temperature: 1.05,
        floor: 0.02,
        ceiling: 0.98,
    };
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            floor: 0.02,
            ceiling: 0.98,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CalibrationOverride {
    temperature: Option<f64>,
    floor: Option<f64>,
    ceiling: Option<f64>,
}

/// Side calibration read over its own defaults rather than the per-market ones.
fn side_calibration_over<'de, D: Deserializer<'de>>(d: D) -> Result<Calibration, D::Error> {
    let o = CalibrationOverride::deserialize(d)?;
    let defaults = Calibration::SIDE;
    Ok(Calibration {
        temperature: o.temperature.unwrap_or(defaults.temperature),
        floor: o.floor.unwrap_or(defaults.floor),
        ceiling: o.ceiling.unwrap_or(defaults.ceiling),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerMarket<T> {
    pub at_least_one: T,
    pub at_least_two: T,
    pub both_score: T,
}

impl<T> PerMarket<T> {
    pub fn get(&self, market: Market) -> &T {
        match market {
            Market::AtLeastOne => &self.at_least_one,
            Market::AtLeastTwo => &self.at_least_two,
            Market::BothScore => &self.both_score,
        }
    }

    pub fn get_mut(&mut self, market: Market) -> &mut T {
        match market {
            Market::AtLeastOne => &mut self.at_least_one,
            Market::AtLeastTwo => &mut self.at_least_two,
            Market::BothScore => &mut self.both_score,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTable {
    pub first_half: PerMarket<Calibration>,
    pub full_match: PerMarket<Calibration>,
}

impl CalibrationTable {
    pub fn get(&self, window: Window, market: Market) -> Calibration {
        match window {
            Window::FirstHalf => *self.first_half.get(market),
            Window::FullMatch => *self.full_match.get(market),
        }
    }

    pub fn get_mut(&mut self, window: Window, market: Market) -> &mut Calibration {
        match window {
            Window::FirstHalf => self.first_half.get_mut(market),
            Window::FullMatch => self.full_match.get_mut(market),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Model share when blending with a market-implied probability.
    pub alpha_model: f64,
    pub max_precision: f64,
    pub remove_margin: bool,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            alpha_model: 0.7,
            max_precision: 1e6,
            remove_margin: true,
        }
    }
}

/// Every tunable of the engine. Built once, then shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: ModelWeights,
    pub strength: StrengthParams,
    pub profile: ProfileParams,
    pub baseline: BaselineParams,
    pub prior: PriorParams,
    pub joint: JointParams,
    pub fusion: FusionParams,
    #[serde(deserialize_with = "side_calibration_over")]
    pub side_calibration: Calibration,
    pub calibration: CalibrationTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: ModelWeights::default(),
            strength: StrengthParams::default(),
            profile: ProfileParams::default(),
            baseline: BaselineParams::default(),
            prior: PriorParams::default(),
            joint: JointParams::default(),
            fusion: FusionParams::default(),
            side_calibration: Calibration::SIDE,
            calibration: CalibrationTable::default(),
        }
    }
}

/// Defaults when `path` is `None`, otherwise a JSON file merged over the defaults.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read engine config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse engine config {}", path.display()))
}

pub fn save_engine_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(cfg).context("serialize engine config")?;
    fs::write(&tmp, json).context("write engine config")?;
    fs::rename(&tmp, path).context("swap engine config")?;
    Ok(())
}

const DEFAULT_DB_PATH: &str = "data/goalcast.sqlite";

/// Process settings for the orchestration layer, read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub engine_config_path: Option<PathBuf>,
    pub fetch_workers: usize,
    pub lock_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub result_retention_days: i64,
    pub max_warm: usize,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let db_path = env::var("GOALCAST_DB")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let engine_config_path = env::var("GOALCAST_CONFIG")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Self {
            db_path,
            engine_config_path,
            fetch_workers: env_parse("GOALCAST_FETCH_WORKERS", 2usize).clamp(1, 8),
            lock_ttl_secs: env_parse("GOALCAST_LOCK_TTL_SECS", 3600i64).clamp(60, 86_400),
            sweep_interval_secs: env_parse("GOALCAST_SWEEP_INTERVAL_SECS", 900u64)
                .clamp(10, 86_400),
            result_retention_days: env_parse("GOALCAST_RESULT_RETENTION_DAYS", 14i64)
                .clamp(1, 365),
            max_warm: env_parse("GOALCAST_MAX_WARM", 1200usize).clamp(0, 20_000),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, RhoParams, load_engine_config};
    use crate::match_data::{Market, Window};

    #[test]
    fn partial_json_keeps_defaults() {
        let raw = r#"{"weights":{"z_sot":0.9},"prior":{"h2h_min_matches":5}}"#;
        let cfg: EngineConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.weights.z_sot, 0.9);
        assert_eq!(cfg.weights.z_da, 0.22);
        assert_eq!(cfg.prior.h2h_min_matches, 5);
        assert_eq!(cfg.prior.h2h_tau, 12.0);
        assert_eq!(cfg.side_calibration.temperature, 1.05);
    }

    #[test]
    fn partial_rho_override_keeps_its_own_market_defaults() {
        let raw = r#"{"joint":{"both_score_first_half":{"base":0.2},"at_least_one":{"max":0.3}}}"#;
        let cfg: EngineConfig = serde_json::from_str(raw).unwrap();
        let btts = cfg.joint.both_score_first_half;
        assert_eq!(btts.base, 0.2);
        assert_eq!(btts.pace_slope, 0.06);
        assert_eq!(btts.min, 0.0);
        assert_eq!(btts.max, 0.35);
        assert_eq!(cfg.joint.at_least_one.max, 0.3);
        assert_eq!(cfg.joint.at_least_one.min, -0.05);
        assert_eq!(cfg.joint.both_score_full_match, RhoParams::BOTH_SCORE_FULL_MATCH);
    }

    #[test]
    fn partial_side_calibration_keeps_side_temperature() {
        let raw = r#"{"side_calibration":{"ceiling":0.95}}"#;
        let cfg: EngineConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.side_calibration.ceiling, 0.95);
        assert_eq!(cfg.side_calibration.temperature, 1.05);
    }

    #[test]
    fn calibration_table_lookup() {
        let mut cfg = EngineConfig::default();
        cfg.calibration
            .get_mut(Window::FullMatch, Market::BothScore)
            .temperature = 1.2;
        assert_eq!(
            cfg.calibration
                .get(Window::FullMatch, Market::BothScore)
                .temperature,
            1.2
        );
        assert_eq!(
            cfg.calibration
                .get(Window::FirstHalf, Market::BothScore)
                .temperature,
            1.0
        );
    }

    #[test]
    fn missing_path_gives_defaults() {
        let cfg = load_engine_config(None).unwrap();
        assert_eq!(cfg.fusion.alpha_model, 0.7);
    }
}
