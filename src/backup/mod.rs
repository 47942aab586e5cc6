pub(crate) mod archive;
pub(crate) mod encryption;
pub(crate) mod integrity;
pub(crate) mod logic;
pub(crate) mod metadata;
pub(crate) mod replicate;
pub(crate) mod retention;
pub(crate) mod window;

use crate::catalog::naming::BackupClass;
use crate::config::{AppConfig, StorageRole};
use crate::engine::AnyEngine;
use crate::errors::Result;
use crate::utils::tools::ToolRunner;
use logic::{BackupCoordinator, BackupReport};

/// Public entry point for the backup process.
pub async fn run_backup_flow(app_config: &AppConfig, class: BackupClass) -> Result<BackupReport> {
    let tools = ToolRunner::new(app_config.tool_timeout);
    let engine = AnyEngine::from_config(app_config, tools.clone())?;
    let report = BackupCoordinator::new(app_config, &engine, tools)
        .run_backup(class)
        .await?;

    println!("📦 {}", report.artifact.path.display());
    match (&report.replica, &report.replication_warning) {
        (Some(replica), _) => println!("🌐 {}", replica.path.display()),
        (None, Some(warning)) => println!("⚠️ Not replicated: {warning}"),
        (None, None) => {}
    }
    for role in [StorageRole::Primary, StorageRole::Secondary] {
        if let Some(cleanup) = report.retention.for_location(role) {
            println!(
                "🗑 {role}: {} incremental, {} full removed",
                cleanup.deleted(BackupClass::Incremental),
                cleanup.deleted(BackupClass::Full)
            );
        }
    }
    if report.retention.total_deleted() > 0 {
        log::info!(target: "backup::retention", "Removed {} expired artifacts", report.retention.total_deleted());
    }
    Ok(report)
}
