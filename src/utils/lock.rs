// dbvault/src/utils/lock.rs
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// Contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub run_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive single-run lock backed by a file created with `O_EXCL`.
///
/// The file is removed when the lock is dropped, which also happens when the
/// run is aborted by a signal. A lock left behind by a killed process is taken
/// over once it is older than the configured stale age.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(lock_dir: &Path, key: &str, run_id: &str, stale_after: Duration) -> Result<Self> {
        fs::create_dir_all(lock_dir)?;
        let path = lock_path(lock_dir, key);

        match Self::create(&path, run_id) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let age = fs::metadata(&path)?
                    .modified()
                    .ok()
                    .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
                    .unwrap_or_default();

                if age <= stale_after {
                    let holder = read_lock(&path)
                        .map(|info| format!("pid {} since {}", info.pid, info.acquired_at))
                        .unwrap_or_else(|| "unknown holder".to_string());
                    return Err(AppError::PreconditionFailed(format!(
                        "another '{key}' run is in progress ({holder}); lock file {}",
                        path.display()
                    )));
                }

                log::warn!(
                    target: "lock",
                    "Taking over stale lock {} ({}s old)",
                    path.display(),
                    age.as_secs()
                );
                fs::remove_file(&path)?;
                Self::create(&path, run_id).map_err(AppError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let mut file = File::create_new(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            run_id: run_id.to_string(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
        file.write_all(&body)?;
        log::debug!(target: "lock", "Acquired {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!(target: "lock", "Released {}", self.path.display()),
            Err(e) => log::warn!(target: "lock", "Failed to release {}: {e}", self.path.display()),
        }
    }
}

fn lock_path(lock_dir: &Path, key: &str) -> PathBuf {
    lock_dir.join(format!("{key}.lock"))
}

fn read_lock(path: &Path) -> Option<LockInfo> {
    let body = fs::read(path).ok()?;
    serde_json::from_slice(&body).ok()
}

/// Returns the holder of the lock `key`, if any.
pub fn current_holder(lock_dir: &Path, key: &str) -> Option<LockInfo> {
    read_lock(&lock_path(lock_dir, key))
}
