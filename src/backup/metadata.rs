// dbvault/src/backup/metadata.rs
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::catalog::naming::BackupClass;
use crate::errors::{AppError, Result};

pub const METADATA_FILE: &str = "metadata.json";

/// Descriptive record embedded in every archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_type: BackupClass,
    pub backup_date: DateTime<Utc>,
    pub tool_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub compression: String,
    pub encryption: bool,
}

impl BackupMetadata {
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn read_from(dir: &Path) -> Result<Self> {
        let body = fs::read(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Reads the metadata straight out of an unencrypted tar.gz archive.
    ///
    /// Returns `Ok(None)` when the archive carries no metadata record.
    pub fn read_from_archive(archive_path: &Path) -> Result<Option<Self>> {
        let file = File::open(archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let unreadable = |e: std::io::Error| AppError::VerificationFailed {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        };
        for entry in archive.entries().map_err(unreadable)? {
            let mut entry = entry.map_err(unreadable)?;
            let is_metadata = entry
                .path()
                .map_err(unreadable)?
                .file_name()
                .is_some_and(|name| name == METADATA_FILE);
            if is_metadata {
                let mut body = Vec::new();
                entry.read_to_end(&mut body).map_err(unreadable)?;
                return Ok(Some(serde_json::from_slice(&body)?));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> BackupMetadata {
        BackupMetadata {
            backup_type: BackupClass::Incremental,
            backup_date: Utc.with_ymd_and_hms(2024, 1, 10, 2, 0, 0).unwrap(),
            tool_version: "influx 2.7.5".to_string(),
            database: None,
            bucket: Some("metrics".to_string()),
            org: Some("acme".to_string()),
            start_time: Utc.with_ymd_and_hms(2024, 1, 9, 2, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 1, 10, 2, 0, 0).unwrap(),
            compression: "tar.gz".to_string(),
            encryption: false,
        }
    }

    #[test]
    fn serialized_form_uses_lowercase_class_and_skips_absent_targets() -> anyhow::Result<()> {
        let json = serde_json::to_value(sample())?;
        assert_eq!(json["backup_type"], "incremental");
        assert_eq!(json["bucket"], "metrics");
        assert!(json.get("database").is_none());
        assert_eq!(json["end_time"], "2024-01-10T02:00:00Z");
        Ok(())
    }

    #[test]
    fn reads_metadata_from_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        sample().write_to(dir.path())?;
        assert_eq!(BackupMetadata::read_from(dir.path())?, sample());
        Ok(())
    }
}
