// dbvault/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::naming::BackupClass;
use crate::errors::AppError;

pub const ENV_ENGINE: &str = "BACKUP_ENGINE";
pub const ENV_SYSTEM_NAME: &str = "BACKUP_SYSTEM_NAME";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DATABASE_TOKEN: &str = "DATABASE_TOKEN";
pub const ENV_DATABASE_ORG: &str = "DATABASE_ORG";
pub const ENV_DATABASE_BUCKET: &str = "DATABASE_BUCKET";
pub const ENV_DATABASE_NAME: &str = "DATABASE_NAME";
pub const ENV_ENCRYPTION_KEY: &str = "BACKUP_ENCRYPTION_KEY";
pub const ENV_INCREMENTAL_RETENTION_DAYS: &str = "INCREMENTAL_RETENTION_DAYS";
pub const ENV_FULL_RETENTION_DAYS: &str = "FULL_RETENTION_DAYS";
pub const ENV_PRIMARY_DIR: &str = "BACKUP_PRIMARY_DIR";
pub const ENV_SECONDARY_DIR: &str = "BACKUP_SECONDARY_DIR";
pub const ENV_TEMP_DIR: &str = "BACKUP_TEMP_DIR";
pub const ENV_STATE_DIR: &str = "BACKUP_STATE_DIR";
pub const ENV_INCREMENTAL_LOOKBACK_HOURS: &str = "INCREMENTAL_LOOKBACK_HOURS";
pub const ENV_TOOL_TIMEOUT_SECS: &str = "BACKUP_TOOL_TIMEOUT_SECS";
pub const ENV_SIZE_WARNING_MB: &str = "BACKUP_SIZE_WARNING_MB";
pub const ENV_LOCK_STALE_HOURS: &str = "BACKUP_LOCK_STALE_HOURS";

const DEFAULT_PRIMARY_DIR: &str = "/backups/local";
const DEFAULT_SECONDARY_DIR: &str = "/backups/remote";
const DEFAULT_INCREMENTAL_RETENTION_DAYS: u64 = 7;
const DEFAULT_FULL_RETENTION_DAYS: u64 = 30;
const DEFAULT_INCREMENTAL_LOOKBACK_HOURS: u64 = 24;
const DEFAULT_SIZE_WARNING_MB: u64 = 1024;
const DEFAULT_LOCK_STALE_HOURS: u64 = 24;

/// Optional `config.json`; every field can be overridden by the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawJsonConfig {
    pub engine: Option<String>,
    pub system_name: Option<String>,
    pub database_url: Option<String>,
    pub database_token: Option<String>,
    pub database_org: Option<String>,
    pub database_bucket: Option<String>,
    pub database_name: Option<String>,
    pub encryption_key: Option<String>,
    pub incremental_retention_days: Option<u64>,
    pub full_retention_days: Option<u64>,
    pub primary_dir: Option<PathBuf>,
    pub secondary_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub incremental_lookback_hours: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub size_warning_mb: Option<u64>,
    pub lock_stale_hours: Option<u64>,
}

impl RawJsonConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })
    }
}

/// A string that is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Postgres,
    InfluxDb,
}

impl EngineKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "influx" | "influxdb" => Ok(EngineKind::InfluxDb),
            other => anyhow::bail!("Unknown {ENV_ENGINE} '{other}', expected 'postgres' or 'influxdb'"),
        }
    }

    pub fn default_system_name(self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::InfluxDb => "influxdb",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageRole {
    Primary,
    Secondary,
}

impl fmt::Display for StorageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageRole::Primary => f.write_str("primary"),
            StorageRole::Secondary => f.write_str("secondary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub root: PathBuf,
    pub role: StorageRole,
}

impl StorageLocation {
    pub fn new(root: impl Into<PathBuf>, role: StorageRole) -> Self {
        Self {
            root: root.into(),
            role,
        }
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Absence of a storage root is a fatal precondition for backup and restore.
    pub fn ensure_exists(&self) -> crate::errors::Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(AppError::PreconditionFailed(format!(
                "{} storage directory does not exist: {}",
                self.role,
                self.root.display()
            )))
        }
    }
}

/// Maximum artifact age per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub incremental_days: u64,
    pub full_days: u64,
}

impl RetentionPolicy {
    pub fn max_age_days(&self, class: BackupClass) -> u64 {
        match class {
            BackupClass::Incremental => self.incremental_days,
            BackupClass::Full => self.full_days,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            incremental_days: DEFAULT_INCREMENTAL_RETENTION_DAYS,
            full_days: DEFAULT_FULL_RETENTION_DAYS,
        }
    }
}

/// Connection settings for the database endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub token: Option<Secret>,
    pub org: Option<String>,
    pub bucket: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineKind,
    pub system_name: String,
    pub connection: ConnectionConfig,
    pub encryption_key: Option<Secret>,
    pub retention: RetentionPolicy,
    pub primary: StorageLocation,
    pub secondary: StorageLocation,
    pub temp_root: PathBuf,
    pub state_dir: PathBuf,
    pub incremental_lookback: Duration,
    pub tool_timeout: Option<Duration>,
    pub size_warning_bytes: u64,
    pub lock_stale_after: Duration,
}

impl AppConfig {
    /// Loads `.env`, the optional JSON file and the process environment, once.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let raw = match config_path {
            Some(path) => RawJsonConfig::load_from_json(path)?,
            None => RawJsonConfig::default(),
        };
        Self::from_sources(raw, |key| std::env::var(key).ok())
    }

    /// Merges the JSON config with an environment lookup; the environment wins.
    pub fn from_sources(raw: RawJsonConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, fallback: Option<String>| -> Option<String> {
            env(key).or(fallback).filter(|s| !s.trim().is_empty())
        };
        let number = |key: &str, fallback: Option<u64>| -> Result<Option<u64>> {
            match env(key).filter(|s| !s.trim().is_empty()) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .with_context(|| format!("{key} must be a non-negative integer, got '{value}'")),
                None => Ok(fallback),
            }
        };
        let path = |key: &str, fallback: Option<PathBuf>| -> Option<PathBuf> {
            env(key)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .or(fallback)
        };

        let engine = match text(ENV_ENGINE, raw.engine.clone()) {
            Some(value) => EngineKind::parse(&value)?,
            None => EngineKind::Postgres,
        };
        let system_name = text(ENV_SYSTEM_NAME, raw.system_name.clone())
            .unwrap_or_else(|| engine.default_system_name().to_string());
        if system_name.contains(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-') {
            anyhow::bail!("{ENV_SYSTEM_NAME} may only contain letters, digits, '_' and '-': {system_name}");
        }

        let connection = ConnectionConfig {
            url: text(ENV_DATABASE_URL, raw.database_url.clone()).unwrap_or_default(),
            token: text(ENV_DATABASE_TOKEN, raw.database_token.clone()).map(Secret),
            org: text(ENV_DATABASE_ORG, raw.database_org.clone()),
            bucket: text(ENV_DATABASE_BUCKET, raw.database_bucket.clone()),
            database: text(ENV_DATABASE_NAME, raw.database_name.clone()),
        };

        let retention = RetentionPolicy {
            incremental_days: number(ENV_INCREMENTAL_RETENTION_DAYS, raw.incremental_retention_days)?
                .unwrap_or(DEFAULT_INCREMENTAL_RETENTION_DAYS),
            full_days: number(ENV_FULL_RETENTION_DAYS, raw.full_retention_days)?
                .unwrap_or(DEFAULT_FULL_RETENTION_DAYS),
        };

        let primary_root = path(ENV_PRIMARY_DIR, raw.primary_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIMARY_DIR));
        let secondary_root = path(ENV_SECONDARY_DIR, raw.secondary_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SECONDARY_DIR));
        let temp_root = path(ENV_TEMP_DIR, raw.temp_dir.clone()).unwrap_or_else(std::env::temp_dir);
        let state_dir =
            path(ENV_STATE_DIR, raw.state_dir.clone()).unwrap_or_else(|| primary_root.join(".state"));

        let lookback_hours = number(ENV_INCREMENTAL_LOOKBACK_HOURS, raw.incremental_lookback_hours)?
            .unwrap_or(DEFAULT_INCREMENTAL_LOOKBACK_HOURS);
        let tool_timeout = number(ENV_TOOL_TIMEOUT_SECS, raw.tool_timeout_secs)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let size_warning_mb =
            number(ENV_SIZE_WARNING_MB, raw.size_warning_mb)?.unwrap_or(DEFAULT_SIZE_WARNING_MB);
        let lock_stale_hours =
            number(ENV_LOCK_STALE_HOURS, raw.lock_stale_hours)?.unwrap_or(DEFAULT_LOCK_STALE_HOURS);

        Ok(AppConfig {
            engine,
            system_name,
            connection,
            encryption_key: text(ENV_ENCRYPTION_KEY, raw.encryption_key).map(Secret),
            retention,
            primary: StorageLocation::new(primary_root, StorageRole::Primary),
            secondary: StorageLocation::new(secondary_root, StorageRole::Secondary),
            temp_root,
            state_dir,
            incremental_lookback: Duration::from_secs(scaled(ENV_INCREMENTAL_LOOKBACK_HOURS, lookback_hours, 3600)?),
            tool_timeout,
            size_warning_bytes: scaled(ENV_SIZE_WARNING_MB, size_warning_mb, 1024 * 1024)?,
            lock_stale_after: Duration::from_secs(scaled(ENV_LOCK_STALE_HOURS, lock_stale_hours, 3600)?),
        })
    }

    /// Checks that every connection setting the selected engine needs is present.
    ///
    /// Only backup and restore call this; listing reads the filesystem alone.
    pub fn require_connection(&self) -> crate::errors::Result<&ConnectionConfig> {
        let conn = &self.connection;
        let mut missing = Vec::new();
        if conn.url.is_empty() {
            missing.push(ENV_DATABASE_URL);
        }
        if self.engine == EngineKind::InfluxDb {
            if conn.token.is_none() {
                missing.push(ENV_DATABASE_TOKEN);
            }
            if conn.org.is_none() {
                missing.push(ENV_DATABASE_ORG);
            }
            if conn.bucket.is_none() {
                missing.push(ENV_DATABASE_BUCKET);
            }
        }
        if missing.is_empty() {
            Ok(conn)
        } else {
            Err(AppError::PreconditionFailed(format!(
                "missing required connection settings: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn locations(&self) -> [&StorageLocation; 2] {
        [&self.primary, &self.secondary]
    }

}

/// Converts a configured count into base units, rejecting values that do not fit.
fn scaled(key: &str, value: u64, unit: u64) -> Result<u64> {
    value
        .checked_mul(unit)
        .with_context(|| format!("{key} is out of range: {value}"))
}
