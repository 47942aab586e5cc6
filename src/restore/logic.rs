// dbvault/src/restore/logic.rs
use std::io::{Write, stdin, stdout};

use chrono::Utc;
use uuid::Uuid;

use super::resolve::resolve;
use crate::backup::archive::unpack;
use crate::backup::encryption::Encryptor;
use crate::backup::logic::{OPENSSL, require_tool};
use crate::backup::metadata::BackupMetadata;
use crate::catalog::naming::TIMESTAMP_FORMAT;
use crate::catalog::{BackupArtifact, BackupCatalog, report};
use crate::config::{AppConfig, ENV_ENCRYPTION_KEY, StorageRole};
use crate::engine::DatabaseEngine;
use crate::errors::{AppError, Result};
use crate::utils::lock::RunLock;
use crate::utils::tools::ToolRunner;

pub const RESTORE_LOCK: &str = "restore";

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Search secondary storage first.
    pub use_secondary: bool,
    /// Skip the confirmation before the destructive step.
    pub force: bool,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    /// No identifier was given; the catalog was printed instead.
    Inventory,
    Restored {
        artifact: BackupArtifact,
        verified_records: Option<u64>,
    },
}

/// Asks the operator before the point of no return.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Reads the answer from stdin; only a literal `yes` proceeds.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        print!("{prompt} Type 'yes' to continue: ");
        stdout().flush()?;
        let mut input = String::new();
        stdin().read_line(&mut input)?;
        Ok(input.trim().eq_ignore_ascii_case("yes"))
    }
}

pub struct RestoreCoordinator<'a, E: DatabaseEngine> {
    config: &'a AppConfig,
    engine: &'a E,
    tools: ToolRunner,
    confirm: Box<dyn Confirm + 'a>,
}

impl<'a, E: DatabaseEngine> RestoreCoordinator<'a, E> {
    pub fn new(config: &'a AppConfig, engine: &'a E, tools: ToolRunner) -> Self {
        Self {
            config,
            engine,
            tools,
            confirm: Box::new(StdinConfirm),
        }
    }

    #[cfg(test)]
    pub fn with_confirm(mut self, confirm: Box<dyn Confirm + 'a>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Resolve → connect → prepare → confirm → apply → verify.
    ///
    /// The scratch directory is removed on every exit path.
    pub async fn run_restore(&self, identifier: Option<&str>, options: RestoreOptions) -> Result<RestoreOutcome> {
        let config = self.config;
        let catalog = BackupCatalog::from_config(config);

        let identifier = match identifier.map(str::trim).filter(|id| !id.is_empty()) {
            Some(identifier) => identifier,
            None => {
                log::info!(target: "restore", "No backup identifier given, listing available backups");
                report::print_listing(&catalog)?;
                return Ok(RestoreOutcome::Inventory);
            }
        };

        require_tool(&self.tools, self.engine.import_tool())?;
        for location in config.locations() {
            location.ensure_exists()?;
        }
        std::fs::create_dir_all(&config.temp_root)?;
        let run_id = Uuid::new_v4().to_string();
        let _lock = RunLock::acquire(
            &config.state_dir.join("locks"),
            RESTORE_LOCK,
            &run_id,
            config.lock_stale_after,
        )?;

        // resolve
        let preferred = if options.use_secondary {
            StorageRole::Secondary
        } else {
            StorageRole::Primary
        };
        let artifact = resolve(&catalog, identifier, preferred)?;
        log::info!(
            target: "restore",
            "🔄 Restoring {} from {} storage",
            artifact.file_name(),
            artifact.location
        );
        let encryptor = if artifact.name.encrypted {
            let key = config.encryption_key.clone().ok_or_else(|| {
                AppError::PreconditionFailed(format!(
                    "{} is encrypted but {ENV_ENCRYPTION_KEY} is not set",
                    artifact.file_name()
                ))
            })?;
            require_tool(&self.tools, OPENSSL)?;
            Some(Encryptor::new(key, self.tools.clone()))
        } else {
            None
        };

        // connect
        self.engine.probe().await?;
        log::info!(target: "restore", "✅ Connected to {}", self.engine.endpoint());

        // prepare
        let scratch = tempfile::Builder::new()
            .prefix(&format!("restore_{}_", Utc::now().format(TIMESTAMP_FORMAT)))
            .tempdir_in(&config.temp_root)?;
        let archive_path = match &encryptor {
            Some(encryptor) => {
                let plain = scratch.path().join(artifact.name.plain_file_name());
                encryptor.decrypt(&artifact.path, &plain).await.map_err(|e| {
                    AppError::ImportFailed(format!(
                        "cannot decrypt {} (wrong or missing key?): {e}",
                        artifact.file_name()
                    ))
                })?;
                plain
            }
            None => artifact.path.clone(),
        };
        let data_dir = scratch.path().join("data");
        unpack(&archive_path, artifact.name.format, &data_dir).map_err(|e| {
            AppError::ImportFailed(format!("cannot unpack {}: {e}", artifact.file_name()))
        })?;

        match BackupMetadata::read_from(&data_dir) {
            Ok(meta) => log::info!(
                target: "restore",
                "Backup metadata: {} from {} covering {} .. {} (tool {})",
                meta.backup_type,
                meta.backup_date,
                meta.start_time,
                meta.end_time,
                meta.tool_version
            ),
            Err(e) => log::warn!(target: "restore", "No readable metadata in archive: {e}"),
        }

        // confirm
        if !options.force {
            let prompt = format!(
                "⚠️ This drops all current data at {} and replaces it with {}.",
                self.engine.endpoint(),
                artifact.file_name()
            );
            if !self.confirm.confirm(&prompt)? {
                return Err(AppError::UserCancelled("restore not confirmed".to_string()));
            }
        }

        // apply
        log::warn!(target: "restore", "Resetting {}", self.engine.endpoint());
        self.engine.reset().await?;
        self.engine.import(&data_dir).await?;
        log::info!(target: "restore", "✓ Import of {} finished", artifact.file_name());

        // verify
        let verified_records = match self.engine.sanity_count().await {
            Ok(0) => {
                log::warn!(target: "restore", "⚠️ Restored target contains no records");
                Some(0)
            }
            Ok(count) => {
                log::info!(target: "restore", "✓ Restored target contains {count} records");
                Some(count)
            }
            Err(e) => {
                log::warn!(target: "restore", "⚠️ Post-import check failed: {e}");
                None
            }
        };

        Ok(RestoreOutcome::Restored {
            artifact,
            verified_records,
        })
    }
}
