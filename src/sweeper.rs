use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::store;

const STOP_POLL: StdDuration = StdDuration::from_millis(250);

/// Delete derived results older than `retention_days`.
pub fn sweep_once(db_path: &Path, retention_days: i64) -> Result<usize> {
    let conn = store::open_db(db_path)?;
    let cutoff = Utc::now() - Duration::days(retention_days.max(0));
    store::purge_results_before(&conn, cutoff).context("sweep derived results")
}

#[derive(Debug, Default)]
pub struct SweepCounters {
    pub attempts: AtomicUsize,
    pub failures: AtomicUsize,
}

pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    counters: Arc<SweepCounters>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn counters(&self) -> &SweepCounters {
        &self.counters
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            warn!("sweeper thread panicked");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sweep every `interval` until stopped. Failed sweeps are logged and retried next tick.
pub fn spawn(db_path: PathBuf, interval: StdDuration, retention_days: i64) -> SweeperHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let counters = Arc::new(SweepCounters::default());
    let tally = Arc::clone(&counters);
    let join = thread::Builder::new()
        .name("result-sweeper".to_string())
        .spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                tally.attempts.fetch_add(1, Ordering::SeqCst);
                match sweep_once(&db_path, retention_days) {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "swept stale derived results"),
                    Err(err) => {
                        tally.failures.fetch_add(1, Ordering::SeqCst);
                        warn!("result sweep failed: {err:#}");
                    }
                }
                let mut waited = StdDuration::ZERO;
                while waited < interval && !flag.load(Ordering::SeqCst) {
                    thread::sleep(STOP_POLL.min(interval));
                    waited += STOP_POLL.min(interval);
                }
            }
        });
    let join = match join {
        Ok(join) => Some(join),
        Err(err) => {
            warn!("could not start sweeper thread: {err}");
            None
        }
    };
    SweeperHandle {
        stop,
        counters,
        join,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::{spawn, sweep_once};

    #[test]
    fn sweeper_stops_promptly() {
        let dir = std::env::temp_dir().join(format!("goalcast-sweep-{}", std::process::id()));
        let db = dir.join("sweep.sqlite");
        assert_eq!(sweep_once(&db, 14).unwrap(), 0);
        let handle = spawn(db, Duration::from_secs(3600), 14);
        std::thread::sleep(Duration::from_millis(50));
        handle.stop();
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn failed_sweeps_are_retried() {
        let dir = std::env::temp_dir().join(format!("goalcast-sweep-fail-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // The database's parent is a plain file, so every open fails.
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let db = blocker.join("sweep.sqlite");
        assert!(sweep_once(&db, 14).is_err());

        let handle = spawn(db, Duration::from_millis(10), 14);
        let mut waited = 0;
        while handle.counters().failures.load(Ordering::SeqCst) < 3 && waited < 200 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert!(handle.counters().failures.load(Ordering::SeqCst) >= 3);
        assert!(handle.is_running());
        handle.stop();
        std::fs::remove_dir_all(dir).ok();
    }
}
