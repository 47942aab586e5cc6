// dbvault/src/catalog/mod.rs
//! Read-only view over the artifacts held in both storage locations.

pub mod naming;
pub mod report;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AppConfig, StorageLocation, StorageRole};
use crate::errors::{AppError, Result};
use naming::{ArtifactName, BackupClass};

const STALE_AFTER_DAYS: i64 = 365;
const FRESH_WITHIN_HOURS: i64 = 24;

/// A packaged backup file in one storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub name: ArtifactName,
    pub path: PathBuf,
    pub location: StorageRole,
    pub size: u64,
    pub modified: SystemTime,
}

impl BackupArtifact {
    /// Describes an existing file; fails if the name is outside the grammar.
    pub fn from_path(path: &Path, location: StorageRole) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::InvalidArtifactName(path.display().to_string()))?;
        let name = ArtifactName::parse(file_name)?;
        let meta = fs::metadata(path)?;
        Ok(Self {
            name,
            path: path.to_path_buf(),
            location,
            size: meta.len(),
            modified: meta.modified()?,
        })
    }

    pub fn file_name(&self) -> String {
        self.name.to_string()
    }

    pub fn class(&self) -> BackupClass {
        self.name.class
    }
}

/// Lists the artifacts directly under `location`, sorted by name.
///
/// Files whose names fall outside the naming grammar are skipped.
pub fn scan_location(location: &StorageLocation) -> Result<Vec<BackupArtifact>> {
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(&location.root)? {
        let entry = entry?;
        match entry.file_type() {
            Ok(kind) if kind.is_file() => {}
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
        if let Some(artifact) = artifact_at(&entry.path(), location.role)? {
            artifacts.push(artifact);
        }
    }
    artifacts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(artifacts)
}

/// Describes one listed file, or `None` for foreign names and files removed
/// by a concurrent retention pass since the directory was read.
fn artifact_at(path: &Path, role: StorageRole) -> Result<Option<BackupArtifact>> {
    match BackupArtifact::from_path(path, role) {
        Ok(artifact) => Ok(Some(artifact)),
        Err(AppError::InvalidArtifactName(name)) => {
            log::trace!(target: "catalog", "Ignoring {name}");
            Ok(None)
        }
        Err(AppError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            log::debug!(target: "catalog", "{} vanished while listing", path.display());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationStats {
    pub location: StorageRole,
    pub root: PathBuf,
    pub present: bool,
    pub count: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeBreakdown {
    pub incremental: usize,
    pub full: usize,
    pub encrypted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthWarning {
    /// Older than one year.
    Stale { file: String, location: StorageRole, age_days: i64 },
    /// Informational only.
    Oversized { file: String, location: StorageRole, size: u64 },
    NoRecentBackup { latest: Option<DateTime<Utc>> },
}

impl std::fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthWarning::Stale { file, location, age_days } => {
                write!(f, "{file} in {location} storage is {age_days} days old")
            }
            HealthWarning::Oversized { file, location, size } => {
                write!(f, "{file} in {location} storage is large ({})", report::human_size(*size))
            }
            HealthWarning::NoRecentBackup { latest: Some(latest) } => {
                write!(f, "no backup newer than {FRESH_WITHIN_HOURS}h, latest is from {latest}")
            }
            HealthWarning::NoRecentBackup { latest: None } => f.write_str("no backups found"),
        }
    }
}

/// Catalog over the primary and secondary storage locations.
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    locations: Vec<StorageLocation>,
}

impl BackupCatalog {
    pub fn new(locations: Vec<StorageLocation>) -> Self {
        Self { locations }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.locations().into_iter().cloned().collect())
    }

    pub fn locations(&self) -> &[StorageLocation] {
        &self.locations
    }

    /// Artifacts of one location; an absent location has none.
    pub fn list_location(&self, role: StorageRole) -> Result<Vec<BackupArtifact>> {
        match self.locations.iter().find(|l| l.role == role) {
            Some(location) if location.exists() => scan_location(location),
            _ => Ok(Vec::new()),
        }
    }

    /// All artifacts of both locations, sorted by name (primary first on ties).
    pub fn list(&self) -> Result<Vec<BackupArtifact>> {
        let mut all = Vec::new();
        for location in &self.locations {
            all.extend(self.list_location(location.role)?);
        }
        all.sort_by(|a, b| {
            a.file_name()
                .cmp(&b.file_name())
                .then_with(|| (a.location == StorageRole::Secondary).cmp(&(b.location == StorageRole::Secondary)))
        });
        Ok(all)
    }

    pub fn stats(&self) -> Result<Vec<LocationStats>> {
        self.locations
            .iter()
            .map(|location| {
                let artifacts = self.list_location(location.role)?;
                Ok(LocationStats {
                    location: location.role,
                    root: location.root.clone(),
                    present: location.exists(),
                    count: artifacts.len(),
                    total_size: artifacts.iter().map(|a| a.size).sum(),
                })
            })
            .collect()
    }

    pub fn type_breakdown(&self) -> Result<TypeBreakdown> {
        let mut breakdown = TypeBreakdown::default();
        for artifact in self.list()? {
            match artifact.class() {
                BackupClass::Incremental => breakdown.incremental += 1,
                BackupClass::Full => breakdown.full += 1,
            }
            if artifact.name.encrypted {
                breakdown.encrypted += 1;
            }
        }
        Ok(breakdown)
    }

    /// Health warnings; ages come from the timestamp in the artifact name.
    pub fn health_check(&self, now: DateTime<Utc>, size_threshold: u64) -> Result<Vec<HealthWarning>> {
        let artifacts = self.list()?;
        let mut warnings = Vec::new();

        for artifact in &artifacts {
            let age_days = (now - artifact.name.created).num_days();
            if age_days > STALE_AFTER_DAYS {
                warnings.push(HealthWarning::Stale {
                    file: artifact.file_name(),
                    location: artifact.location,
                    age_days,
                });
            }
            if artifact.size > size_threshold {
                warnings.push(HealthWarning::Oversized {
                    file: artifact.file_name(),
                    location: artifact.location,
                    size: artifact.size,
                });
            }
        }

        let latest = artifacts.iter().map(|a| a.name.created).max();
        let fresh = latest.is_some_and(|latest| now - latest < chrono::Duration::hours(FRESH_WITHIN_HOURS));
        if !fresh {
            warnings.push(HealthWarning::NoRecentBackup { latest });
        }
        Ok(warnings)
    }
}
