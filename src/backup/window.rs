// dbvault/src/backup/window.rs
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::catalog::naming::BackupClass;
use crate::errors::Result;

const STATE_FILE: &str = "last_runs.json";

/// Time range of source data covered by one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BackupWindow {
    /// Computes the window of a run happening at `now`.
    ///
    /// A full backup covers the whole history. An incremental backup starts
    /// where the previous successful window ended, or `lookback` before `now`
    /// when nothing has been recorded yet.
    pub fn compute(
        class: BackupClass,
        now: DateTime<Utc>,
        previous_end: Option<DateTime<Utc>>,
        lookback: Duration,
    ) -> Self {
        let start = match class {
            BackupClass::Full => DateTime::<Utc>::UNIX_EPOCH,
            BackupClass::Incremental => {
                let fallback = chrono::Duration::from_std(lookback)
                    .ok()
                    .and_then(|lookback| now.checked_sub_signed(lookback))
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                match previous_end {
                    Some(end) if end <= now => end,
                    Some(end) => {
                        log::warn!(
                            target: "backup::window",
                            "Recorded window end {end} lies in the future, falling back to a {}h look-back",
                            lookback.as_secs() / 3600
                        );
                        fallback
                    }
                    None => fallback,
                }
            }
        };
        Self { start, end: now }
    }
}

/// Window ends of the last successful run per class, persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    last_window_end: BTreeMap<String, DateTime<Utc>>,
}

impl RunState {
    fn state_path(state_dir: &Path) -> PathBuf {
        state_dir.join(STATE_FILE)
    }

    /// Missing or unreadable state yields an empty record.
    pub fn load(state_dir: &Path) -> Self {
        let path = Self::state_path(state_dir);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!(target: "backup::window", "Cannot read {}: {e}", path.display());
                return Self::default();
            }
        };
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            log::warn!(target: "backup::window", "Ignoring corrupt state file {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn entries(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.last_window_end
    }

    pub fn last_window_end(&self, class: BackupClass) -> Option<DateTime<Utc>> {
        self.last_window_end.get(class.as_str()).copied()
    }

    /// Start of the next incremental window: a full backup also covers everything up to its end.
    pub fn incremental_start(&self) -> Option<DateTime<Utc>> {
        BackupClass::ALL
            .iter()
            .filter_map(|class| self.last_window_end(*class))
            .max()
    }

    pub fn record(&mut self, class: BackupClass, window_end: DateTime<Utc>) {
        self.last_window_end
            .insert(class.as_str().to_string(), window_end);
    }

    /// Writes the state atomically (temporary file + rename).
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        fs::create_dir_all(state_dir)?;
        let mut file = NamedTempFile::new_in(state_dir)?;
        file.write_all(&serde_json::to_vec_pretty(self)?)?;
        file.persist(Self::state_path(state_dir))
            .map_err(|e| e.error)?;
        Ok(())
    }
}
