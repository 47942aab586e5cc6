// dbvault/src/restore/resolve.rs
use crate::catalog::{BackupArtifact, BackupCatalog};
use crate::config::StorageRole;
use crate::errors::{AppError, Result};

fn other(role: StorageRole) -> StorageRole {
    match role {
        StorageRole::Primary => StorageRole::Secondary,
        StorageRole::Secondary => StorageRole::Primary,
    }
}

/// Exact file name first, then the latest (by name) artifact whose name
/// contains `identifier`.
fn find_in(artifacts: Vec<BackupArtifact>, identifier: &str) -> Option<BackupArtifact> {
    if let Some(exact) = artifacts.iter().find(|a| a.file_name() == identifier) {
        return Some(exact.clone());
    }
    artifacts
        .into_iter()
        .filter(|a| a.file_name().contains(identifier))
        .max_by(|a, b| a.file_name().cmp(&b.file_name()))
}

/// Looks the identifier up in `preferred`, then in the other location.
pub fn resolve(catalog: &BackupCatalog, identifier: &str, preferred: StorageRole) -> Result<BackupArtifact> {
    for role in [preferred, other(preferred)] {
        if let Some(found) = find_in(catalog.list_location(role)?, identifier) {
            if role != preferred {
                log::info!(target: "restore", "'{identifier}' not found in {preferred} storage, using {role} copy");
            }
            return Ok(found);
        }
    }
    Err(AppError::ArtifactNotFound(identifier.to_string()))
}
