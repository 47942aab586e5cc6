// dbvault/src/catalog/naming.rs
//! Artifact naming grammar: `{system}_{class}_{YYYYMMDD_HHMMSS}.{ext}[.enc]`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Backup granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupClass {
    Incremental,
    Full,
}

impl BackupClass {
    pub const ALL: [BackupClass; 2] = [BackupClass::Incremental, BackupClass::Full];

    pub fn as_str(self) -> &'static str {
        match self {
            BackupClass::Incremental => "incremental",
            BackupClass::Full => "full",
        }
    }
}

impl fmt::Display for BackupClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupClass {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(BackupClass::Incremental),
            "full" => Ok(BackupClass::Full),
            other => Err(AppError::Config(format!(
                "unknown backup class '{other}', expected 'incremental' or 'full'"
            ))),
        }
    }
}

/// Container format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Gzip,
}

impl ArchiveFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "tar.gz" | "tgz" => Some(ArchiveFormat::TarGz),
            "sql.gz" | "gz" => Some(ArchiveFormat::Gzip),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Gzip => "gz",
        }
    }

    /// Format as recorded in the embedded metadata.
    pub fn compression(self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Gzip => "gzip",
        }
    }
}

/// Parsed and validated artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub system: String,
    pub class: BackupClass,
    pub created: DateTime<Utc>,
    pub extension: String,
    pub format: ArchiveFormat,
    pub encrypted: bool,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<system>[A-Za-z0-9][A-Za-z0-9_-]*?)_(?P<class>incremental|full)_(?P<ts>\d{8}_\d{6})\.(?P<ext>tar\.gz|tgz|sql\.gz|gz)$",
        )
        .expect("artifact name pattern is valid")
    })
}

impl ArtifactName {
    /// Builds the canonical name of a freshly packaged, unencrypted archive.
    pub fn new(system: &str, class: BackupClass, created: DateTime<Utc>) -> Self {
        Self {
            system: system.to_string(),
            class,
            created,
            extension: ArchiveFormat::TarGz.extension().to_string(),
            format: ArchiveFormat::TarGz,
            encrypted: false,
        }
    }

    pub fn parse(file_name: &str) -> Result<Self, AppError> {
        let invalid = || AppError::InvalidArtifactName(file_name.to_string());

        let (plain, encrypted) = match file_name.strip_suffix(ENCRYPTED_SUFFIX) {
            Some(plain) => (plain, true),
            None => (file_name, false),
        };

        let caps = name_pattern().captures(plain).ok_or_else(invalid)?;
        let class = caps["class"].parse().map_err(|_| invalid())?;
        let created = NaiveDateTime::parse_from_str(&caps["ts"], TIMESTAMP_FORMAT)
            .map_err(|_| invalid())?
            .and_utc();
        let extension = caps["ext"].to_string();
        let format = ArchiveFormat::from_extension(&extension).ok_or_else(invalid)?;

        Ok(Self {
            system: caps["system"].to_string(),
            class,
            created,
            extension,
            format,
            encrypted,
        })
    }

    pub fn timestamp(&self) -> String {
        self.created.format(TIMESTAMP_FORMAT).to_string()
    }

    /// The same artifact with the encrypted-file suffix.
    pub fn encrypted(&self) -> Self {
        Self {
            encrypted: true,
            ..self.clone()
        }
    }

    /// File name of the archive once decrypted.
    pub fn plain_file_name(&self) -> String {
        format!("{}_{}_{}.{}", self.system, self.class, self.timestamp(), self.extension)
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plain_file_name())?;
        if self.encrypted {
            f.write_str(ENCRYPTED_SUFFIX)?;
        }
        Ok(())
    }
}

impl FromStr for ArtifactName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn canonical_name_is_formatted_bit_for_bit() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let name = ArtifactName::new("system", BackupClass::Full, created);
        assert_eq!(name.to_string(), "system_full_20240101_020000.tar.gz");
        assert_eq!(name.encrypted().to_string(), "system_full_20240101_020000.tar.gz.enc");
    }

    #[test]
    fn parses_encrypted_names_with_underscored_system() -> anyhow::Result<()> {
        let name = ArtifactName::parse("influx_prod_incremental_20240315_120501.tar.gz.enc")?;
        assert_eq!(name.system, "influx_prod");
        assert_eq!(name.class, BackupClass::Incremental);
        assert!(name.encrypted);
        assert_eq!(name.format, ArchiveFormat::TarGz);
        assert_eq!(name.timestamp(), "20240315_120501");
        assert_eq!(name.plain_file_name(), "influx_prod_incremental_20240315_120501.tar.gz");
        Ok(())
    }

    #[test]
    fn parse_round_trips_display() -> anyhow::Result<()> {
        for raw in [
            "postgres_full_20231231_235959.tar.gz",
            "postgres_full_20231231_235959.sql.gz",
            "db-1_incremental_20240229_000000.tgz.enc",
        ] {
            assert_eq!(ArtifactName::parse(raw)?.to_string(), raw);
        }
        Ok(())
    }

    #[test]
    fn rejects_names_outside_the_grammar() {
        for raw in [
            "",
            "notes.txt",
            "postgres_weekly_20240101_020000.tar.gz",
            "postgres_full_20240101.tar.gz",
            "postgres_full_20241301_020000.tar.gz",
            "_full_20240101_020000.tar.gz",
            "postgres_full_20240101_020000.zip",
            "postgres_full_20240101_020000.tar.gz.enc.enc",
            ".postgres_full_20240101_020000.tar.gz.part",
        ] {
            assert!(
                matches!(ArtifactName::parse(raw), Err(AppError::InvalidArtifactName(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_class_is_a_config_error() {
        assert!(matches!("hourly".parse::<BackupClass>(), Err(AppError::Config(_))));
        assert_eq!("full".parse::<BackupClass>().ok(), Some(BackupClass::Full));
    }
}
