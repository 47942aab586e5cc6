use std::path::PathBuf;

use thiserror::Error;

use crate::utils::tools::ToolError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Cannot reach database endpoint {endpoint}: {reason}")]
    ConnectivityFailed { endpoint: String, reason: String },

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Import failed: {0}")]
    ImportFailed(String),

    #[error("Packaging failed: {0}")]
    PackagingFailed(String),

    #[error("Verification failed for {}: {reason}", .path.display())]
    VerificationFailed { path: PathBuf, reason: String },

    #[error("Replication of {} failed: {source}", .path.display())]
    ReplicationIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Replication of {} could not be verified: source has {expected} bytes, copy has {actual}", .path.display())]
    ReplicationVerification {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("No backup matching '{0}' in primary or secondary storage")]
    ArtifactNotFound(String),

    #[error("Invalid backup name '{0}'")]
    InvalidArtifactName(String),

    #[error("Operation cancelled: {0}")]
    UserCancelled(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl AppError {
    /// Replication problems are reported to the caller but never fail a backup.
    #[cfg(test)]
    pub fn is_replication(&self) -> bool {
        matches!(
            self,
            AppError::ReplicationIo { .. } | AppError::ReplicationVerification { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
