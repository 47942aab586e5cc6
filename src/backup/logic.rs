// dbvault/src/backup/logic.rs
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::archive::{ArchivePackager, PackageRequest};
use super::encryption::Encryptor;
use super::integrity;
use super::replicate::StorageReplicator;
use super::retention::{self, RetentionReport};
use super::window::{BackupWindow, RunState};
use crate::catalog::BackupArtifact;
use crate::catalog::naming::BackupClass;
use crate::catalog::report::human_size;
use crate::config::AppConfig;
use crate::engine::DatabaseEngine;
use crate::errors::{AppError, Result};
use crate::utils::lock::RunLock;
use crate::utils::tools::{ToolError, ToolRunner};

pub(crate) const OPENSSL: &str = "openssl";

/// Outcome of a successful backup run.
#[derive(Debug)]
pub struct BackupReport {
    pub artifact: BackupArtifact,
    pub window: BackupWindow,
    pub replica: Option<BackupArtifact>,
    pub replication_warning: Option<String>,
    pub retention: RetentionReport,
}

/// Lock key shared by every run of one class.
pub fn lock_key(class: BackupClass) -> String {
    format!("backup-{class}")
}

/// Maps a missing tool onto the precondition taxonomy.
pub(crate) fn require_tool(tools: &ToolRunner, tool: &str) -> Result<()> {
    match tools.locate(tool) {
        Ok(path) => {
            log::debug!(target: "backup", "Found {tool} at {}", path.display());
            Ok(())
        }
        Err(ToolError::NotFound { tool }) => Err(AppError::PreconditionFailed(format!(
            "{tool} executable not found in PATH"
        ))),
        Err(other) => Err(other.into()),
    }
}

/// Runs export → package → verify → replicate → retention for one class.
pub struct BackupCoordinator<'a, E: DatabaseEngine> {
    config: &'a AppConfig,
    engine: &'a E,
    tools: ToolRunner,
    replicator: StorageReplicator,
}

impl<'a, E: DatabaseEngine> BackupCoordinator<'a, E> {
    pub fn new(config: &'a AppConfig, engine: &'a E, tools: ToolRunner) -> Self {
        Self {
            config,
            engine,
            tools,
            replicator: StorageReplicator::default(),
        }
    }

    #[cfg(test)]
    pub fn with_replicator(mut self, replicator: StorageReplicator) -> Self {
        self.replicator = replicator;
        self
    }

    pub async fn run_backup(&self, class: BackupClass) -> Result<BackupReport> {
        self.run_backup_at(class, Utc::now()).await
    }

    pub async fn run_backup_at(&self, class: BackupClass, now: DateTime<Utc>) -> Result<BackupReport> {
        let config = self.config;
        let run_id = Uuid::new_v4().to_string();
        log::info!(target: "backup", "🚀 Starting {class} backup of {} (run {run_id})", self.engine.endpoint());

        // 1. preconditions
        require_tool(&self.tools, self.engine.export_tool())?;
        if config.encryption_key.is_some() {
            require_tool(&self.tools, OPENSSL)?;
        }
        for location in config.locations() {
            location.ensure_exists()?;
        }
        std::fs::create_dir_all(&config.temp_root)?;
        let _lock = RunLock::acquire(
            &config.state_dir.join("locks"),
            &lock_key(class),
            &run_id,
            config.lock_stale_after,
        )?;

        // 2. connectivity
        self.engine.probe().await?;
        log::info!(target: "backup", "✅ Connected to {}", self.engine.endpoint());

        // 3. window
        let mut state = RunState::load(&config.state_dir);
        let previous_end = match class {
            BackupClass::Incremental => state.incremental_start(),
            BackupClass::Full => state.last_window_end(BackupClass::Full),
        };
        let window = BackupWindow::compute(class, now, previous_end, config.incremental_lookback);
        log::info!(target: "backup", "Backup window: {} .. {}", window.start, window.end);

        // 4. export into a run-scoped directory
        let stamp = now.format(crate::catalog::naming::TIMESTAMP_FORMAT);
        let export_dir = tempfile::Builder::new()
            .prefix(&format!("backup_{class}_{stamp}_"))
            .tempdir_in(&config.temp_root)?;
        if let Err(e) = self.engine.export(&window, export_dir.path()).await {
            keep_for_inspection(export_dir);
            return Err(e);
        }

        let tool_version = match self.engine.tool_version().await {
            Ok(version) => version,
            Err(e) => {
                log::warn!(target: "backup", "Cannot determine {} version: {e}", self.engine.export_tool());
                "unknown".to_string()
            }
        };

        // 5. package
        let encryptor = config
            .encryption_key
            .clone()
            .map(|key| Encryptor::new(key, self.tools.clone()));
        let packager = ArchivePackager::new(&config.system_name, config.primary.clone(), encryptor);
        let target = self.engine.target();
        let request = PackageRequest {
            class,
            created: now,
            window: &window,
            tool_version: &tool_version,
            target: &target,
        };
        let artifact = match packager.package(export_dir.path(), &request).await {
            Ok(artifact) => artifact,
            Err(e) => {
                keep_for_inspection(export_dir);
                return Err(e);
            }
        };

        // 6. verify
        if let Err(e) = integrity::verify(&artifact.path) {
            log::error!(target: "backup", "Discarding unverified artifact {}", artifact.path.display());
            let _ = std::fs::remove_file(&artifact.path);
            return Err(e);
        }
        log::info!(
            target: "backup",
            "✓ Verified {} ({})",
            artifact.file_name(),
            human_size(artifact.size)
        );
        if artifact.size > config.size_warning_bytes {
            log::warn!(
                target: "backup",
                "Artifact {} is larger than {}",
                artifact.file_name(),
                human_size(config.size_warning_bytes)
            );
        }

        // 7. replicate
        let (replica, replication_warning) = match self.replicator.replicate(&artifact, &config.secondary) {
            Ok(replica) => (Some(replica), None),
            Err(e) => {
                log::warn!(target: "backup", "⚠️ {e}; the primary copy remains the backup of record");
                (None, Some(e.to_string()))
            }
        };

        // 8. retention
        let retention = retention::cleanup(&config.locations(), &config.retention, SystemTime::now());

        state.record(class, window.end);
        if let Err(e) = state.save(&config.state_dir) {
            log::warn!(target: "backup", "Cannot persist last run state: {e}");
        }

        log::info!(target: "backup", "✅ {class} backup completed: {}", artifact.path.display());
        Ok(BackupReport {
            artifact,
            window,
            replica,
            replication_warning,
            retention,
        })
    }
}

fn keep_for_inspection(export_dir: tempfile::TempDir) {
    let kept = export_dir.keep();
    log::error!(target: "backup", "Export directory kept for inspection: {}", kept.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::replicate::tests::TruncatingCopier;
    use crate::config::Secret;
    use crate::config::tests::test_config;
    use crate::engine::fake::FakeEngine;
    use chrono::TimeZone;
    use std::fs;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn full_backup_produces_verified_replicated_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine::default();

        let report = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Full, at(1, 2))
            .await?;

        assert_eq!(report.artifact.file_name(), "system_full_20240101_020000.tar.gz");
        assert!(report.artifact.size > 0);
        assert!(config.primary.root.join("system_full_20240101_020000.tar.gz").is_file());
        assert!(config.secondary.root.join("system_full_20240101_020000.tar.gz").is_file());
        assert!(report.replication_warning.is_none());
        assert_eq!(engine.calls(), vec!["probe", "export"]);
        assert_eq!(fs::read_dir(&config.temp_root)?.count(), 0);

        let state = RunState::load(&config.state_dir);
        assert_eq!(state.last_window_end(BackupClass::Full), Some(at(1, 2)));
        Ok(())
    }

    #[tokio::test]
    async fn keyed_backup_stores_only_the_encrypted_artifact() -> anyhow::Result<()> {
        if ToolRunner::default().locate(OPENSSL).is_err() {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path());
        config.encryption_key = Some(Secret::from("k3y".to_string()));
        let engine = FakeEngine::default();

        let report = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Full, at(1, 2))
            .await?;

        let sealed = "system_full_20240101_020000.tar.gz.enc";
        assert_eq!(report.artifact.file_name(), sealed);
        for root in [&config.primary.root, &config.secondary.root] {
            let names: Vec<String> = fs::read_dir(root)?
                .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<std::io::Result<_>>()?;
            assert_eq!(names, vec![sealed.to_string()]);
        }
        integrity::verify(&report.artifact.path)?;
        assert_eq!(fs::read_dir(&config.temp_root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn incremental_window_starts_at_previous_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine::default();
        let coordinator = BackupCoordinator::new(&config, &engine, ToolRunner::default());

        let first = coordinator.run_backup_at(BackupClass::Incremental, at(1, 2)).await?;
        assert_eq!(first.window.start, at(1, 2) - chrono::Duration::hours(24));

        let second = coordinator.run_backup_at(BackupClass::Incremental, at(1, 8)).await?;
        assert_eq!(second.window.start, at(1, 2));
        assert_eq!(second.window.end, at(1, 8));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_database_aborts_before_export() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine {
            unreachable: true,
            ..Default::default()
        };

        let result = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Full, at(1, 2))
            .await;
        assert!(matches!(result, Err(AppError::ConnectivityFailed { .. })));
        assert_eq!(engine.calls(), vec!["probe"]);
        assert_eq!(fs::read_dir(&config.primary.root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_export_keeps_directory_and_produces_no_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine {
            fail_export: true,
            ..Default::default()
        };

        let result = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Incremental, at(1, 2))
            .await;
        assert!(matches!(result, Err(AppError::ExportFailed(_))));
        assert_eq!(fs::read_dir(&config.primary.root)?.count(), 0);

        let kept: Vec<_> = fs::read_dir(&config.temp_root)?.collect::<std::io::Result<_>>()?;
        assert_eq!(kept.len(), 1);
        assert!(kept[0].file_name().to_string_lossy().starts_with("backup_incremental_20240101_020000_"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_export_is_a_packaging_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine {
            export_nothing: true,
            ..Default::default()
        };

        let result = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Full, at(1, 2))
            .await;
        assert!(matches!(result, Err(AppError::PackagingFailed(_))));
        assert_eq!(fs::read_dir(&config.primary.root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn replication_mismatch_only_warns() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine::default();

        let report = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .with_replicator(StorageReplicator::new(Box::new(TruncatingCopier)))
            .run_backup_at(BackupClass::Full, at(1, 2))
            .await?;

        assert!(report.replica.is_none());
        assert!(report.replication_warning.is_some());
        assert!(report.artifact.path.is_file());
        assert_eq!(fs::read_dir(&config.secondary.root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_storage_is_a_precondition_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        fs::remove_dir(&config.secondary.root)?;
        let engine = FakeEngine::default();

        let result = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Full, at(1, 2))
            .await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
        assert!(engine.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_run_of_same_class_is_refused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let engine = FakeEngine::default();
        let _held = RunLock::acquire(
            &config.state_dir.join("locks"),
            &lock_key(BackupClass::Full),
            "other-run",
            config.lock_stale_after,
        )?;

        let coordinator = BackupCoordinator::new(&config, &engine, ToolRunner::default());
        let result = coordinator.run_backup_at(BackupClass::Full, at(1, 2)).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));

        coordinator.run_backup_at(BackupClass::Incremental, at(1, 2)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn retention_runs_after_backup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let expired = config.secondary.root.join("system_incremental_20200101_000000.tar.gz");
        fs::write(&expired, b"old")?;
        fs::File::options()
            .write(true)
            .open(&expired)?
            .set_modified(SystemTime::now() - std::time::Duration::from_secs(30 * 86_400))?;

        let engine = FakeEngine::default();
        let report = BackupCoordinator::new(&config, &engine, ToolRunner::default())
            .run_backup_at(BackupClass::Incremental, Utc::now())
            .await?;
        assert_eq!(report.retention.total_deleted(), 1);
        assert!(!expired.exists());
        Ok(())
    }
}
