use std::path::PathBuf;

use anyhow::{Context, Result};

use goalcast::calibration::{Graded, calibration_bins, evaluate, fit_temperature};
use goalcast::config::{RuntimeConfig, load_engine_config, save_engine_config};
use goalcast::logging::init_tracing;
use goalcast::match_data::{Market, Window};
use goalcast::store;

const MIN_SAMPLES: usize = 50;
const BINS: usize = 10;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let mut rt = RuntimeConfig::from_env();
    if let Some(db) = parse_path_arg("--db") {
        rt.db_path = db;
    }
    let out_path = parse_path_arg("--out")
        .or_else(|| rt.engine_config_path.clone())
        .context("no output path: pass --out or set GOALCAST_CONFIG")?;
    let dry_run = std::env::args().skip(1).any(|a| a == "--dry-run");

    let conn = store::open_db(&rt.db_path)?;
    let mut cfg = load_engine_config(rt.engine_config_path.as_deref())?;

    println!("Calibration fit");
    println!("DB: {}", rt.db_path.display());
    let mut changed = 0usize;
    for window in Window::ALL {
        for market in Market::ALL {
            let graded: Vec<Graded> = store::load_graded(&conn, window, market)?
                .into_iter()
                .map(|(p, hit)| Graded { p, hit })
                .collect();
            let label = format!("{}/{}", window.as_str(), market.as_str());
            if graded.len() < MIN_SAMPLES {
                println!("{label}: {} graded, need {MIN_SAMPLES}, kept", graded.len());
                continue;
            }

            let before = evaluate(&graded);
            let current = cfg.calibration.get(window, market);
            let (fitted, after) = fit_temperature(&graded, current);
            println!(
                "{label}: n={} base_rate={:.3} log_loss {:.4} -> {:.4} brier {:.4} -> {:.4} \
                 temperature {:.2} -> {:.2}",
                before.samples,
                before.base_rate,
                before.log_loss,
                after.log_loss,
                before.brier,
                after.brier,
                current.temperature,
                fitted.temperature
            );
            for bin in calibration_bins(&graded, BINS).iter().filter(|b| b.count > 0) {
                println!(
                    "  [{:.1}, {:.1}) n={} pred={:.3} actual={:.3}",
                    bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
                );
            }

            *cfg.calibration.get_mut(window, market) = fitted;
            changed += 1;
        }
    }

    if dry_run || changed == 0 {
        println!("No config written ({changed} markets fitted)");
        return Ok(());
    }
    save_engine_config(&out_path, &cfg)?;
    println!("Wrote {} ({changed} markets fitted)", out_path.display());
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
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
