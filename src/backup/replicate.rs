// dbvault/src/backup/replicate.rs
use std::fs;
use std::io;
use std::path::Path;

use crate::catalog::BackupArtifact;
use crate::config::StorageLocation;
use crate::errors::{AppError, Result};

/// Copies one file to another path, returning the number of bytes written.
pub trait FileCopier: Send + Sync {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsCopier;

impl FileCopier for FsCopier {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let written = fs::copy(from, to)?;
        fs::File::open(to)?.sync_all()?;
        Ok(written)
    }
}

/// Copies artifacts to the secondary location and checks the copy by size.
///
/// The copy goes to a hidden `.part` file first and is renamed only after the
/// size check, so readers never see a partial artifact under its real name.
pub struct StorageReplicator {
    copier: Box<dyn FileCopier>,
}

impl Default for StorageReplicator {
    fn default() -> Self {
        Self::new(Box::new(FsCopier))
    }
}

impl StorageReplicator {
    pub fn new(copier: Box<dyn FileCopier>) -> Self {
        Self { copier }
    }

    pub fn replicate(&self, artifact: &BackupArtifact, destination: &StorageLocation) -> Result<BackupArtifact> {
        let file_name = artifact.file_name();
        let final_path = destination.root.join(&file_name);
        let part_path = destination.root.join(format!(".{file_name}.part"));

        let io_failed = |source: io::Error| AppError::ReplicationIo {
            path: final_path.clone(),
            source,
        };

        if final_path.exists() {
            return Err(io_failed(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "destination already holds an artifact with this name",
            )));
        }

        if let Err(e) = self.copier.copy(&artifact.path, &part_path) {
            let _ = fs::remove_file(&part_path);
            return Err(io_failed(e));
        }

        let expected = artifact.size;
        let actual = match fs::metadata(&part_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                let _ = fs::remove_file(&part_path);
                return Err(io_failed(e));
            }
        };
        if actual != expected {
            let _ = fs::remove_file(&part_path);
            return Err(AppError::ReplicationVerification {
                path: final_path,
                expected,
                actual,
            });
        }

        if let Err(e) = fs::rename(&part_path, &final_path) {
            let _ = fs::remove_file(&part_path);
            return Err(io_failed(e));
        }
        log::info!(target: "backup::replicate", "✓ Replicated {file_name} to {}", destination.root.display());
        BackupArtifact::from_path(&final_path, destination.role)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StorageRole;

    /// Writes a copy one byte short of the source.
    pub(crate) struct TruncatingCopier;

    impl FileCopier for TruncatingCopier {
        fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            let body = fs::read(from)?;
            let short = &body[..body.len().saturating_sub(1)];
            fs::write(to, short)?;
            Ok(short.len() as u64)
        }
    }

    pub(crate) struct FailingCopier;

    impl FileCopier for FailingCopier {
        fn copy(&self, _from: &Path, _to: &Path) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only mount"))
        }
    }

    fn setup() -> anyhow::Result<(tempfile::TempDir, BackupArtifact, StorageLocation)> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("local");
        let remote = dir.path().join("remote");
        fs::create_dir_all(&local)?;
        fs::create_dir_all(&remote)?;
        let path = local.join("system_full_20240101_020000.tar.gz");
        fs::write(&path, vec![7u8; 4096])?;
        let artifact = BackupArtifact::from_path(&path, StorageRole::Primary)?;
        Ok((dir, artifact, StorageLocation::new(remote, StorageRole::Secondary)))
    }

    #[test]
    fn copies_under_the_same_name() -> anyhow::Result<()> {
        let (_dir, artifact, remote) = setup()?;
        let replica = StorageReplicator::default().replicate(&artifact, &remote)?;
        assert_eq!(replica.file_name(), artifact.file_name());
        assert_eq!(replica.location, StorageRole::Secondary);
        assert_eq!(replica.size, 4096);
        assert_eq!(fs::read_dir(&remote.root)?.count(), 1);
        Ok(())
    }

    #[test]
    fn size_mismatch_is_a_verification_error_and_leaves_nothing_behind() -> anyhow::Result<()> {
        let (_dir, artifact, remote) = setup()?;
        let result = StorageReplicator::new(Box::new(TruncatingCopier)).replicate(&artifact, &remote);
        match result {
            Err(AppError::ReplicationVerification { expected, actual, .. }) => {
                assert_eq!((expected, actual), (4096, 4095));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(fs::read_dir(&remote.root)?.count(), 0);
        Ok(())
    }

    #[test]
    fn failed_copy_is_an_io_error() -> anyhow::Result<()> {
        let (_dir, artifact, remote) = setup()?;
        let result = StorageReplicator::new(Box::new(FailingCopier)).replicate(&artifact, &remote);
        assert!(matches!(result, Err(AppError::ReplicationIo { .. })));
        assert!(result.is_err_and(|e| e.is_replication()));
        Ok(())
    }
}
