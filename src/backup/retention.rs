// dbvault/src/backup/retention.rs
use std::fs;
use std::time::SystemTime;

use serde::Serialize;

use crate::catalog::{BackupArtifact, scan_location};
use crate::catalog::naming::BackupClass;
use crate::config::{RetentionPolicy, StorageLocation, StorageRole};

const SECONDS_PER_DAY: u64 = 86_400;

/// Deletions performed in one storage location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocationCleanup {
    pub incremental_deleted: usize,
    pub full_deleted: usize,
    pub missing: bool,
    pub errors: Vec<String>,
}

impl LocationCleanup {
    pub fn deleted(&self, class: BackupClass) -> usize {
        match class {
            BackupClass::Incremental => self.incremental_deleted,
            BackupClass::Full => self.full_deleted,
        }
    }

    fn count(&mut self, class: BackupClass) {
        match class {
            BackupClass::Incremental => self.incremental_deleted += 1,
            BackupClass::Full => self.full_deleted += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub locations: Vec<(StorageRole, LocationCleanup)>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.locations
            .iter()
            .map(|(_, c)| c.incremental_deleted + c.full_deleted)
            .sum()
    }

    pub fn for_location(&self, role: StorageRole) -> Option<&LocationCleanup> {
        self.locations.iter().find(|(r, _)| *r == role).map(|(_, c)| c)
    }
}

/// Whole days since the last modification; a future mtime counts as age zero.
pub fn age_in_days(modified: SystemTime, now: SystemTime) -> u64 {
    now.duration_since(modified)
        .map(|age| age.as_secs() / SECONDS_PER_DAY)
        .unwrap_or(0)
}

/// An artifact expires once its age is strictly greater than the threshold.
pub fn is_expired(artifact: &BackupArtifact, policy: &RetentionPolicy, now: SystemTime) -> bool {
    age_in_days(artifact.modified, now) > policy.max_age_days(artifact.class())
}

/// Deletes expired artifacts in every location.
///
/// Locations are handled independently: a missing directory or a failed
/// deletion is recorded and logged, and cleanup carries on.
pub fn cleanup(locations: &[&StorageLocation], policy: &RetentionPolicy, now: SystemTime) -> RetentionReport {
    let mut report = RetentionReport::default();
    for location in locations {
        let mut outcome = LocationCleanup::default();
        if !location.exists() {
            log::warn!(
                target: "backup::retention",
                "Skipping {} storage, directory not found: {}",
                location.role,
                location.root.display()
            );
            outcome.missing = true;
            report.locations.push((location.role, outcome));
            continue;
        }

        let artifacts = match scan_location(location) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                log::error!(target: "backup::retention", "Cannot list {}: {e}", location.root.display());
                outcome.errors.push(e.to_string());
                report.locations.push((location.role, outcome));
                continue;
            }
        };

        for artifact in artifacts.iter().filter(|a| is_expired(a, policy, now)) {
            match fs::remove_file(&artifact.path) {
                Ok(()) => {
                    log::info!(
                        target: "backup::retention",
                        "🗑 Removed {} backup {} from {} storage ({} days old)",
                        artifact.class(),
                        artifact.file_name(),
                        location.role,
                        age_in_days(artifact.modified, now)
                    );
                    outcome.count(artifact.class());
                }
                Err(e) => {
                    log::error!(target: "backup::retention", "Cannot remove {}: {e}", artifact.path.display());
                    outcome.errors.push(format!("{}: {e}", artifact.path.display()));
                }
            }
        }
        report.locations.push((location.role, outcome));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::Path;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(SECONDS_PER_DAY);

    fn artifact_aged(dir: &Path, name: &str, now: SystemTime, age: Duration) -> anyhow::Result<()> {
        let path = dir.join(name);
        fs::write(&path, b"payload")?;
        File::options().write(true).open(&path)?.set_modified(now - age)?;
        Ok(())
    }

    fn setup() -> anyhow::Result<(tempfile::TempDir, StorageLocation, StorageLocation)> {
        let dir = tempfile::tempdir()?;
        let primary = StorageLocation::new(dir.path().join("local"), StorageRole::Primary);
        let secondary = StorageLocation::new(dir.path().join("remote"), StorageRole::Secondary);
        fs::create_dir_all(&primary.root)?;
        fs::create_dir_all(&secondary.root)?;
        Ok((dir, primary, secondary))
    }

    #[test]
    fn threshold_age_is_retained_and_one_day_more_is_deleted() -> anyhow::Result<()> {
        let (_dir, primary, secondary) = setup()?;
        let now = SystemTime::now();
        let policy = RetentionPolicy {
            incremental_days: 7,
            full_days: 30,
        };
        let minute = Duration::from_secs(60);
        artifact_aged(&primary.root, "pg_incremental_20240101_000000.tar.gz", now, DAY * 7 + minute)?;
        artifact_aged(&primary.root, "pg_incremental_20240102_000000.tar.gz", now, DAY * 8 + minute)?;
        artifact_aged(&primary.root, "pg_full_20240101_000000.tar.gz", now, DAY * 30 + minute)?;
        artifact_aged(&secondary.root, "pg_full_20231201_000000.tar.gz.enc", now, DAY * 31 + minute)?;

        let report = cleanup(&[&primary, &secondary], &policy, now);
        let local = report.for_location(StorageRole::Primary).unwrap();
        let remote = report.for_location(StorageRole::Secondary).unwrap();
        assert_eq!((local.deleted(BackupClass::Incremental), local.deleted(BackupClass::Full)), (1, 0));
        assert_eq!((remote.deleted(BackupClass::Incremental), remote.deleted(BackupClass::Full)), (0, 1));

        assert!(primary.root.join("pg_incremental_20240101_000000.tar.gz").exists());
        assert!(!primary.root.join("pg_incremental_20240102_000000.tar.gz").exists());
        assert!(primary.root.join("pg_full_20240101_000000.tar.gz").exists());
        Ok(())
    }

    #[test]
    fn second_run_deletes_nothing() -> anyhow::Result<()> {
        let (_dir, primary, secondary) = setup()?;
        let now = SystemTime::now();
        artifact_aged(&primary.root, "pg_full_20200101_000000.tar.gz", now, DAY * 400)?;
        artifact_aged(&primary.root, "pg_full_20240101_000000.tar.gz", now, DAY)?;
        let policy = RetentionPolicy::default();

        assert_eq!(cleanup(&[&primary, &secondary], &policy, now).total_deleted(), 1);
        assert_eq!(cleanup(&[&primary, &secondary], &policy, now).total_deleted(), 0);
        assert!(primary.root.join("pg_full_20240101_000000.tar.gz").exists());
        Ok(())
    }

    #[test]
    fn unrelated_files_are_never_touched() -> anyhow::Result<()> {
        let (_dir, primary, _secondary) = setup()?;
        let now = SystemTime::now();
        artifact_aged(&primary.root, "README.txt", now, DAY * 1000)?;
        artifact_aged(&primary.root, ".pg_full_20200101_000000.tar.gz.part", now, DAY * 1000)?;

        assert_eq!(cleanup(&[&primary], &RetentionPolicy::default(), now).total_deleted(), 0);
        assert_eq!(fs::read_dir(&primary.root)?.count(), 2);
        Ok(())
    }

    #[test]
    fn missing_location_does_not_stop_the_other() -> anyhow::Result<()> {
        let (dir, primary, _secondary) = setup()?;
        let gone = StorageLocation::new(dir.path().join("unmounted"), StorageRole::Secondary);
        let now = SystemTime::now();
        artifact_aged(&primary.root, "pg_incremental_20200101_000000.tar.gz", now, DAY * 100)?;

        let report = cleanup(&[&gone, &primary], &RetentionPolicy::default(), now);
        assert!(report.for_location(StorageRole::Secondary).unwrap().missing);
        assert_eq!(report.for_location(StorageRole::Primary).unwrap().incremental_deleted, 1);
        Ok(())
    }
}
