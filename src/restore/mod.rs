pub(crate) mod logic;
pub(crate) mod resolve;

use crate::config::AppConfig;
use crate::engine::AnyEngine;
use crate::errors::Result;
use crate::utils::tools::ToolRunner;
use logic::{RestoreCoordinator, RestoreOptions, RestoreOutcome};

/// Public entry point for the restore process.
///
/// Inventory mode only reads the filesystem, so the engine is built lazily.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    identifier: Option<&str>,
    options: RestoreOptions,
) -> Result<RestoreOutcome> {
    let tools = ToolRunner::new(app_config.tool_timeout);
    if identifier.is_none_or(|id| id.trim().is_empty()) {
        crate::catalog::report::print_listing(&crate::catalog::BackupCatalog::from_config(app_config))?;
        return Ok(RestoreOutcome::Inventory);
    }
    let engine = AnyEngine::from_config(app_config, tools.clone())?;
    RestoreCoordinator::new(app_config, &engine, tools)
        .run_restore(identifier, options)
        .await
}
