// dbvault/src/backup/archive.rs
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::Builder;
use walkdir::WalkDir;

use super::encryption::Encryptor;
use super::metadata::BackupMetadata;
use super::window::BackupWindow;
use crate::catalog::BackupArtifact;
use crate::catalog::naming::{ArchiveFormat, ArtifactName, BackupClass};
use crate::config::StorageLocation;
use crate::engine::EngineTarget;
use crate::errors::{AppError, Result};

/// Creates a GZipped TAR archive from a source directory.
///
/// Paths inside the archive are relative to `source_dir`. Entries are added
/// in file-name order so the same input produces the same layout.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(AppError::PackagingFailed(format!(
            "source for archival is not a directory: {}",
            source_dir.display()
        )));
    }

    log::debug!(
        target: "backup::archive",
        "Creating tar.gz archive from {} to {}",
        source_dir.display(),
        archive_dest_path.display()
    );

    let archive_file = File::create_new(archive_dest_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| AppError::PackagingFailed(format!("cannot walk {}: {e}", source_dir.display())))?;
        let path = entry.path();
        let name = path
            .strip_prefix(source_dir)
            .map_err(|e| AppError::PackagingFailed(e.to_string()))?;

        // the root itself
        if name.as_os_str().is_empty() {
            continue;
        }

        if entry.file_type().is_dir() {
            tar_builder.append_dir(name, path)?;
        } else if entry.file_type().is_file() {
            tar_builder.append_path_with_name(path, name)?;
        }
    }

    tar_builder.into_inner()?.finish()?.sync_all()?;
    Ok(archive_dest_path.to_path_buf())
}

/// Extracts a GZipped TAR archive into `extract_to_dir`.
pub fn extract_tar_gz_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(extract_to_dir)?;
    log::debug!(
        target: "backup::archive",
        "Extracting {} to {}",
        archive_path.display(),
        extract_to_dir.display()
    );
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive_path)?));
    archive.unpack(extract_to_dir)?;
    Ok(extract_to_dir.to_path_buf())
}

/// Decompresses a single-file gzip artifact into `extract_to_dir`.
pub fn extract_gzip_file(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(extract_to_dir)?;
    let file_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_end_matches(".gz").to_string())
        .unwrap_or_else(|| "export".to_string());
    let target = extract_to_dir.join(file_name);
    let mut decoder = GzDecoder::new(File::open(archive_path)?);
    std::io::copy(&mut decoder, &mut File::create(&target)?)?;
    Ok(extract_to_dir.to_path_buf())
}

/// Unpacks `archive_path` according to its format.
pub fn unpack(archive_path: &Path, format: ArchiveFormat, extract_to_dir: &Path) -> Result<PathBuf> {
    match format {
        ArchiveFormat::TarGz => extract_tar_gz_archive(archive_path, extract_to_dir),
        ArchiveFormat::Gzip => extract_gzip_file(archive_path, extract_to_dir),
    }
}

/// What goes into the metadata record of one archive.
#[derive(Debug, Clone)]
pub struct PackageRequest<'a> {
    pub class: BackupClass,
    pub created: DateTime<Utc>,
    pub window: &'a BackupWindow,
    pub tool_version: &'a str,
    pub target: &'a EngineTarget,
}

/// Turns an export directory into a named, optionally encrypted archive.
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    system_name: String,
    destination: StorageLocation,
    encryptor: Option<Encryptor>,
}

impl ArchivePackager {
    pub fn new(system_name: &str, destination: StorageLocation, encryptor: Option<Encryptor>) -> Self {
        Self {
            system_name: system_name.to_string(),
            destination,
            encryptor,
        }
    }

    /// Packages `export_dir`; the directory is removed only on success.
    pub async fn package(&self, export_dir: &Path, request: &PackageRequest<'_>) -> Result<BackupArtifact> {
        let mut contents = fs::read_dir(export_dir)
            .map_err(|e| AppError::PackagingFailed(format!("cannot read {}: {e}", export_dir.display())))?;
        if contents.next().is_none() {
            return Err(AppError::PackagingFailed(format!(
                "export directory {} is empty",
                export_dir.display()
            )));
        }

        let name = ArtifactName::new(&self.system_name, request.class, request.created);
        let plain_path = self.destination.root.join(name.to_string());
        let sealed_path = self.destination.root.join(name.encrypted().to_string());
        for existing in [&plain_path, &sealed_path] {
            if existing.exists() {
                return Err(AppError::PackagingFailed(format!(
                    "artifact {} already exists",
                    existing.display()
                )));
            }
        }

        let metadata = BackupMetadata {
            backup_type: request.class,
            backup_date: request.created,
            tool_version: request.tool_version.to_string(),
            database: request.target.database.clone(),
            bucket: request.target.bucket.clone(),
            org: request.target.org.clone(),
            start_time: request.window.start,
            end_time: request.window.end,
            compression: name.format.compression().to_string(),
            encryption: self.encryptor.is_some(),
        };
        metadata.write_to(export_dir)?;

        if let Err(e) = create_tar_gz_archive(export_dir, &plain_path) {
            let created_by_us = !matches!(&e, AppError::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists);
            if created_by_us {
                let _ = fs::remove_file(&plain_path);
            }
            return Err(match e {
                AppError::PackagingFailed(_) => e,
                other => AppError::PackagingFailed(format!("compression of {} failed: {other}", plain_path.display())),
            });
        }
        log::info!(target: "backup::archive", "✓ Archive created at {}", plain_path.display());

        let final_path = match &self.encryptor {
            Some(encryptor) => {
                if let Err(e) = encryptor.encrypt(&plain_path, &sealed_path).await {
                    let _ = fs::remove_file(&sealed_path);
                    let _ = fs::remove_file(&plain_path);
                    return Err(AppError::PackagingFailed(format!("encryption failed: {e}")));
                }
                fs::remove_file(&plain_path)?;
                log::info!(target: "backup::archive", "🔒 Archive encrypted as {}", sealed_path.display());
                sealed_path
            }
            None => {
                log::warn!(target: "backup::archive", "No encryption key configured, archive is stored unencrypted");
                plain_path
            }
        };

        if let Err(e) = fs::remove_dir_all(export_dir) {
            log::warn!(target: "backup::archive", "Cannot remove export directory {}: {e}", export_dir.display());
        }

        BackupArtifact::from_path(&final_path, self.destination.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::integrity;
    use crate::config::{Secret, StorageRole};
    use crate::utils::tools::ToolRunner;
    use chrono::TimeZone;

    struct Fixture {
        _dir: tempfile::TempDir,
        export: PathBuf,
        storage: PathBuf,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let export = dir.path().join("export");
        let storage = dir.path().join("local");
        fs::create_dir_all(&export)?;
        fs::create_dir_all(&storage)?;
        Ok(Fixture {
            export,
            storage,
            _dir: dir,
        })
    }

    fn window() -> BackupWindow {
        BackupWindow {
            start: DateTime::<Utc>::UNIX_EPOCH,
            end: Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn packages_ten_kilobytes_into_a_smaller_verified_archive() -> anyhow::Result<()> {
        let fx = fixture()?;
        fs::write(fx.export.join("data.sql"), "INSERT INTO t VALUES (1);\n".repeat(400))?;
        assert!(fs::metadata(fx.export.join("data.sql"))?.len() >= 10_000);

        let packager = ArchivePackager::new(
            "system",
            StorageLocation::new(&fx.storage, StorageRole::Primary),
            None,
        );
        let window = window();
        let target = EngineTarget {
            database: Some("app".to_string()),
            ..Default::default()
        };
        let request = PackageRequest {
            class: BackupClass::Full,
            created: window.end,
            window: &window,
            tool_version: "pg_dump (PostgreSQL) 16.2",
            target: &target,
        };
        let artifact = packager.package(&fx.export, &request).await?;

        assert_eq!(artifact.file_name(), "system_full_20240101_020000.tar.gz");
        assert!(artifact.size > 0 && artifact.size < 10_000);
        assert!(!fx.export.exists());
        integrity::verify(&artifact.path)?;

        let meta = BackupMetadata::read_from_archive(&artifact.path)?.expect("metadata is embedded");
        assert_eq!(meta.backup_type, BackupClass::Full);
        assert_eq!(meta.database.as_deref(), Some("app"));
        assert!(!meta.encryption);
        Ok(())
    }

    #[tokio::test]
    async fn empty_export_is_rejected_and_kept() -> anyhow::Result<()> {
        let fx = fixture()?;
        let packager = ArchivePackager::new(
            "system",
            StorageLocation::new(&fx.storage, StorageRole::Primary),
            None,
        );
        let window = window();
        let target = EngineTarget::default();
        let request = PackageRequest {
            class: BackupClass::Incremental,
            created: window.end,
            window: &window,
            tool_version: "unknown",
            target: &target,
        };
        assert!(matches!(
            packager.package(&fx.export, &request).await,
            Err(AppError::PackagingFailed(_))
        ));
        assert!(fx.export.exists());
        assert_eq!(fs::read_dir(&fx.storage)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn existing_artifact_is_never_overwritten() -> anyhow::Result<()> {
        let fx = fixture()?;
        fs::write(fx.export.join("data.sql"), b"x")?;
        let taken = fx.storage.join("system_full_20240101_020000.tar.gz.enc");
        fs::write(&taken, b"earlier run")?;

        let packager = ArchivePackager::new(
            "system",
            StorageLocation::new(&fx.storage, StorageRole::Primary),
            None,
        );
        let window = window();
        let target = EngineTarget::default();
        let request = PackageRequest {
            class: BackupClass::Full,
            created: window.end,
            window: &window,
            tool_version: "unknown",
            target: &target,
        };
        assert!(packager.package(&fx.export, &request).await.is_err());
        assert_eq!(fs::read(&taken)?, b"earlier run");
        Ok(())
    }

    #[tokio::test]
    async fn failed_encryption_leaves_no_artifact_behind() -> anyhow::Result<()> {
        let fx = fixture()?;
        fs::write(fx.export.join("data.sql"), b"INSERT INTO t VALUES (1);")?;
        let encryptor = Encryptor::new(Secret::from("k3y".to_string()), ToolRunner::default())
            .with_program("dbvault-openssl-not-installed");
        let packager = ArchivePackager::new(
            "system",
            StorageLocation::new(&fx.storage, StorageRole::Primary),
            Some(encryptor),
        );
        let window = window();
        let target = EngineTarget::default();
        let request = PackageRequest {
            class: BackupClass::Full,
            created: window.end,
            window: &window,
            tool_version: "unknown",
            target: &target,
        };

        let result = packager.package(&fx.export, &request).await;
        assert!(matches!(result, Err(AppError::PackagingFailed(ref msg)) if msg.contains("encryption")));
        assert_eq!(fs::read_dir(&fx.storage)?.count(), 0);
        assert!(fx.export.join("data.sql").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn keyed_package_replaces_plaintext_with_enc_file() -> anyhow::Result<()> {
        let tools = ToolRunner::default();
        if tools.locate("openssl").is_err() {
            return Ok(());
        }
        let fx = fixture()?;
        fs::write(fx.export.join("data.sql"), "INSERT INTO t VALUES (1);\n".repeat(50))?;
        let packager = ArchivePackager::new(
            "system",
            StorageLocation::new(&fx.storage, StorageRole::Primary),
            Some(Encryptor::new(Secret::from("k3y".to_string()), tools)),
        );
        let window = window();
        let target = EngineTarget::default();
        let request = PackageRequest {
            class: BackupClass::Full,
            created: window.end,
            window: &window,
            tool_version: "unknown",
            target: &target,
        };

        let artifact = packager.package(&fx.export, &request).await?;
        assert_eq!(artifact.file_name(), "system_full_20240101_020000.tar.gz.enc");
        assert!(artifact.name.encrypted);
        let stored: Vec<_> = fs::read_dir(&fx.storage)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        assert_eq!(stored, vec!["system_full_20240101_020000.tar.gz.enc".to_string()]);
        integrity::verify(&artifact.path)?;
        Ok(())
    }

    #[test]
    fn extract_restores_nested_layout() -> anyhow::Result<()> {
        let fx = fixture()?;
        fs::create_dir_all(fx.export.join("nested"))?;
        fs::write(fx.export.join("nested/data.csv"), b"a,b\n1,2\n")?;
        let archive = fx.storage.join("a.tar.gz");
        create_tar_gz_archive(&fx.export, &archive)?;

        let out = fx.storage.join("out");
        extract_tar_gz_archive(&archive, &out)?;
        assert_eq!(fs::read(out.join("nested/data.csv"))?, b"a,b\n1,2\n");
        Ok(())
    }
}
