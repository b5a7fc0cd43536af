//! Cross-process batch lock on a sqlite row with a TTL, plus a process-local mutex.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::store;

/// Batch keys running in this process.
static LOCAL_RUNNING: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn local_running() -> MutexGuard<'static, HashSet<String>> {
    // poisoned by a panicked batch; the set itself is still consistent
    LOCAL_RUNNING
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the duration of one batch. Dropping it removes the row and the local claim.
pub struct BatchLockGuard {
    db_path: PathBuf,
    lock_key: String,
    owner: String,
}

impl std::fmt::Debug for BatchLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLockGuard")
            .field("lock_key", &self.lock_key)
            .field("owner", &self.owner)
            .finish()
    }
}

impl BatchLockGuard {
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }
}

impl Drop for BatchLockGuard {
    fn drop(&mut self) {
        let released = Connection::open(&self.db_path)
            .context("open sqlite db for lock release")
            .and_then(|conn| release(&conn, &self.lock_key, &self.owner));
        if let Err(err) = released {
            warn!(lock_key = %self.lock_key, "batch lock release failed: {err:#}");
        }
        local_running().remove(&self.lock_key);
    }
}

fn owner_id() -> String {
    format!(
        "pid-{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

/// Insert the lock row, taking over an expired one. `Ok(false)` when someone else holds it.
pub fn try_acquire_row(
    conn: &Connection,
    lock_key: &str,
    owner: &str,
    ttl_secs: i64,
) -> Result<bool> {
    let now = Utc::now();
    let expires = now + Duration::seconds(ttl_secs.max(1));
    let changed = conn
        .execute(
            r#"
            INSERT INTO batch_locks (lock_key, owner, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(lock_key) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE batch_locks.expires_at < ?3
            "#,
            params![lock_key, owner, now.to_rfc3339(), expires.to_rfc3339()],
        )
        .context("acquire batch lock row")?;
    Ok(changed > 0)
}

pub fn release(conn: &Connection, lock_key: &str, owner: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM batch_locks WHERE lock_key = ?1 AND owner = ?2",
        params![lock_key, owner],
    )
    .context("release batch lock row")?;
    Ok(())
}

/// `Ok(None)` when the batch is already running here or in another process.
pub fn acquire(
    db_path: &Path,
    lock_key: &str,
    ttl_secs: i64,
) -> Result<Option<BatchLockGuard>> {
    if !local_running().insert(lock_key.to_string()) {
        debug!(lock_key, "batch already running in this process");
        return Ok(None);
    }

    let acquired = store::open_db(db_path).and_then(|conn| {
        let owner = owner_id();
        let won = try_acquire_row(&conn, lock_key, &owner, ttl_secs)?;
        Ok(won.then_some(owner))
    });
    match acquired {
        Ok(Some(owner)) => Ok(Some(BatchLockGuard {
            db_path: db_path.to_path_buf(),
            lock_key: lock_key.to_string(),
            owner,
        })),
        Ok(None) => {
            local_running().remove(lock_key);
            debug!(lock_key, "batch lock held by another process");
            Ok(None)
        }
        Err(err) => {
            local_running().remove(lock_key);
            Err(err)
        }
    }
}
