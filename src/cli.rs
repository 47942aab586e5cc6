// dbvault/src/cli.rs
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use crate::catalog::naming::BackupClass;

#[derive(Parser, Debug)]
#[command(version, about = "Backup lifecycle coordinator for PostgreSQL and InfluxDB", long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, global = true)]
    pub verbose: Option<LevelFilter>,

    /// Optional JSON configuration file; environment variables take precedence.
    #[arg(long, short = 'c', global = true, env = "DBVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Without an action an interactive menu is shown.
    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Export, package, verify, replicate and apply retention.
    Backup {
        #[arg(value_enum, default_value_t = BackupClass::Incremental)]
        class: BackupClass,
    },
    /// Restore a backup into the configured database. Lists backups when no identifier is given.
    Restore {
        /// Exact file name or any unique part of it, e.g. a timestamp.
        identifier: Option<String>,

        /// Search secondary storage first.
        #[arg(long)]
        remote: bool,

        /// Do not ask for confirmation before dropping the target.
        #[arg(long)]
        force: bool,

        /// Only print the catalog.
        #[arg(long)]
        list: bool,
    },
    /// List backups in both storage locations.
    ListBackups {
        #[arg(value_enum)]
        mode: Option<ListMode>,
    },
    /// Print a JSON health report.
    Status,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    Detailed,
}
