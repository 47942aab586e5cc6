//! Database backup lifecycle tool
//!
//! Backs up, restores and catalogs PostgreSQL or InfluxDB exports across a
//! primary and a secondary storage location.

// dbvault/src/main.rs
mod backup;
mod catalog;
mod cli;
mod config;
mod engine;
mod errors;
mod restore;
mod status;
mod utils;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;

use catalog::BackupCatalog;
use catalog::naming::BackupClass;
use cli::{Action, Cli, ListMode};
use config::AppConfig;
use engine::AnyEngine;
use errors::AppError;
use restore::logic::{RestoreOptions, RestoreOutcome};
use utils::tools::ToolRunner;

/// Main entry point for the backup/restore tool
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.verbose {
        logger.filter_level(level);
    }
    if let Err(e) = logger.try_init() {
        eprintln!("Logger initialisation failed: {e}");
    }

    tokio::select! {
        result = run_app(cli) => match result {
            Ok(()) => {
                println!("✅ Operation completed successfully.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                if let Some(AppError::UserCancelled(reason)) = e.downcast_ref::<AppError>() {
                    log::info!("Cancelled: {reason}");
                } else {
                    log::error!("❌ {e:#}");
                }
                ExitCode::FAILURE
            }
        },
        signal = shutdown_signal() => {
            // dropping the run future releases locks and removes temporary directories
            log::error!("Received {signal}, run aborted");
            ExitCode::from(130)
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load(cli.config.as_deref()).context("Failed to load application configuration")?;

    let action = match cli.action {
        Some(action) => action,
        None => prompt_choice()?,
    };

    match action {
        Action::Backup { class } => {
            log::info!("🚀 Starting {class} backup...");
            backup::run_backup_flow(&app_config, class)
                .await
                .context("Backup process failed")?;
        }
        Action::Restore {
            identifier,
            remote,
            force,
            list,
        } => {
            let identifier = if list { None } else { identifier };
            let options = RestoreOptions {
                use_secondary: remote,
                force,
            };
            let outcome = restore::run_restore_flow(&app_config, identifier.as_deref(), options)
                .await
                .context("Restore process failed")?;
            if let RestoreOutcome::Restored {
                artifact,
                verified_records,
            } = outcome
            {
                println!("🔄 Restored {} from {} storage", artifact.file_name(), artifact.location);
                if let Some(records) = verified_records {
                    println!("📊 {records} records present after import");
                }
            }
        }
        Action::ListBackups { mode } => {
            let catalog = BackupCatalog::from_config(&app_config);
            let printed = match mode {
                Some(ListMode::Detailed) => {
                    catalog::report::print_detailed(&catalog, Utc::now(), app_config.size_warning_bytes)
                }
                None => catalog::report::print_listing(&catalog),
            };
            // listing never fails the process
            if let Err(e) = printed {
                log::error!("Listing incomplete: {e}");
            }
        }
        Action::Status => {
            let tools = ToolRunner::new(app_config.tool_timeout);
            let engine_status = match AnyEngine::from_config(&app_config, tools) {
                Ok(engine) => status::probe_engine(&engine).await,
                Err(e) => status::EngineStatus::Misconfigured { error: e.to_string() },
            };
            let report = status::collect(&app_config, engine_status, Utc::now())?;
            if !report.engine.is_healthy() {
                log::warn!("Database is not reachable, see the engine section of the report");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Prompts user to select an operation
fn prompt_choice() -> Result<Action> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Incremental Backup (or type 'backup')");
    println!("2. Full Backup (or type 'full')");
    println!("3. Restore Backup (or type 'restore')");
    println!("4. List Backups (or type 'list')");
    println!("5. Status (or type 'status')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;

    match input.trim() {
        "1" | "backup" => Ok(Action::Backup {
            class: BackupClass::Incremental,
        }),
        "2" | "full" => Ok(Action::Backup {
            class: BackupClass::Full,
        }),
        "3" | "restore" => {
            print!("Backup to restore (empty to list): ");
            stdout().flush().context("Failed to flush stdout")?;
            let mut identifier = String::new();
            stdin().read_line(&mut identifier).context("Failed to read user input")?;
            let identifier = identifier.trim();
            Ok(Action::Restore {
                identifier: (!identifier.is_empty()).then(|| identifier.to_string()),
                remote: false,
                force: false,
                list: false,
            })
        }
        "4" | "list" => Ok(Action::ListBackups { mode: None }),
        "5" | "status" => Ok(Action::Status),
        other => anyhow::bail!("Invalid operation choice '{other}'"),
    }
}
