// dbvault/src/engine/mod.rs
//! Database engines. Every engine drives its vendor CLI as an opaque external tool.

pub(crate) mod influx;
pub(crate) mod postgres;

use std::path::Path;

use crate::backup::window::BackupWindow;
use crate::config::{AppConfig, EngineKind};
use crate::errors::Result;
use crate::utils::tools::ToolRunner;

pub use influx::InfluxEngine;
pub use postgres::PostgresEngine;

/// Identifiers of the exported data, recorded in the artifact metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineTarget {
    pub database: Option<String>,
    pub bucket: Option<String>,
    pub org: Option<String>,
}

/// Operations the coordinators need from a database engine.
///
/// `probe` maps failures to `ConnectivityFailed`, `export` to `ExportFailed`,
/// `reset` and `import` to `ImportFailed`.
#[allow(async_fn_in_trait)]
pub trait DatabaseEngine {
    /// Tool that must be on `PATH` before an export is attempted.
    fn export_tool(&self) -> &'static str;

    /// Tool that must be on `PATH` before a restore is attempted.
    fn import_tool(&self) -> &'static str;

    /// Endpoint description without credentials.
    fn endpoint(&self) -> String;

    fn target(&self) -> EngineTarget;

    /// Single connectivity probe, never retried.
    async fn probe(&self) -> Result<()>;

    async fn tool_version(&self) -> Result<String>;

    /// Exports the data of `window` into the (empty) directory `dest`.
    async fn export(&self, window: &BackupWindow, dest: &Path) -> Result<()>;

    /// Drops and recreates the target. Prior state is lost.
    async fn reset(&self) -> Result<()>;

    /// Applies an unpacked export found in `source`.
    async fn import(&self, source: &Path) -> Result<()>;

    /// Lightweight post-import count of rows or points.
    async fn sanity_count(&self) -> Result<u64>;
}

/// The engine selected by the configuration.
#[derive(Debug)]
pub enum AnyEngine {
    Postgres(PostgresEngine),
    Influx(InfluxEngine),
}

impl AnyEngine {
    /// Builds the configured engine; fails if connection settings are missing.
    pub fn from_config(config: &AppConfig, tools: ToolRunner) -> Result<Self> {
        let connection = config.require_connection()?;
        match config.engine {
            EngineKind::Postgres => Ok(AnyEngine::Postgres(PostgresEngine::new(connection, tools)?)),
            EngineKind::InfluxDb => Ok(AnyEngine::Influx(InfluxEngine::new(connection, tools)?)),
        }
    }
}

impl DatabaseEngine for AnyEngine {
    fn export_tool(&self) -> &'static str {
        match self {
            AnyEngine::Postgres(engine) => engine.export_tool(),
            AnyEngine::Influx(engine) => engine.export_tool(),
        }
    }

    fn import_tool(&self) -> &'static str {
        match self {
            AnyEngine::Postgres(engine) => engine.import_tool(),
            AnyEngine::Influx(engine) => engine.import_tool(),
        }
    }

    fn endpoint(&self) -> String {
        match self {
            AnyEngine::Postgres(engine) => engine.endpoint(),
            AnyEngine::Influx(engine) => engine.endpoint(),
        }
    }

    fn target(&self) -> EngineTarget {
        match self {
            AnyEngine::Postgres(engine) => engine.target(),
            AnyEngine::Influx(engine) => engine.target(),
        }
    }

    async fn probe(&self) -> Result<()> {
        match self {
            AnyEngine::Postgres(engine) => engine.probe().await,
            AnyEngine::Influx(engine) => engine.probe().await,
        }
    }

    async fn tool_version(&self) -> Result<String> {
        match self {
            AnyEngine::Postgres(engine) => engine.tool_version().await,
            AnyEngine::Influx(engine) => engine.tool_version().await,
        }
    }

    async fn export(&self, window: &BackupWindow, dest: &Path) -> Result<()> {
        match self {
            AnyEngine::Postgres(engine) => engine.export(window, dest).await,
            AnyEngine::Influx(engine) => engine.export(window, dest).await,
        }
    }

    async fn reset(&self) -> Result<()> {
        match self {
            AnyEngine::Postgres(engine) => engine.reset().await,
            AnyEngine::Influx(engine) => engine.reset().await,
        }
    }

    async fn import(&self, source: &Path) -> Result<()> {
        match self {
            AnyEngine::Postgres(engine) => engine.import(source).await,
            AnyEngine::Influx(engine) => engine.import(source).await,
        }
    }

    async fn sanity_count(&self) -> Result<u64> {
        match self {
            AnyEngine::Postgres(engine) => engine.sanity_count().await,
            AnyEngine::Influx(engine) => engine.sanity_count().await,
        }
    }
}

/// Lists regular files in `dir` whose name ends with `suffix`, sorted by name.
pub(crate) fn files_with_suffix(dir: &Path, suffix: &str) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory engine for coordinator tests.

    use std::sync::Mutex;

    use super::*;
    use crate::errors::AppError;

    #[derive(Debug, Default)]
    pub(crate) struct FakeEngine {
        pub unreachable: bool,
        pub fail_export: bool,
        pub export_nothing: bool,
        pub fail_import: bool,
        pub records_after_import: u64,
        pub calls: Mutex<Vec<String>>,
        pub windows: Mutex<Vec<BackupWindow>>,
    }

    impl FakeEngine {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn record(&self, call: &str) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call.to_string());
            }
        }
    }

    impl DatabaseEngine for FakeEngine {
        fn export_tool(&self) -> &'static str {
            "sh"
        }

        fn import_tool(&self) -> &'static str {
            "sh"
        }

        fn endpoint(&self) -> String {
            "fake://db".to_string()
        }

        fn target(&self) -> EngineTarget {
            EngineTarget {
                database: Some("app".to_string()),
                ..Default::default()
            }
        }

        async fn probe(&self) -> Result<()> {
            self.record("probe");
            if self.unreachable {
                return Err(AppError::ConnectivityFailed {
                    endpoint: self.endpoint(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }

        async fn tool_version(&self) -> Result<String> {
            Ok("fake 1.0".to_string())
        }

        async fn export(&self, window: &BackupWindow, dest: &Path) -> Result<()> {
            self.record("export");
            if let Ok(mut windows) = self.windows.lock() {
                windows.push(*window);
            }
            if self.fail_export {
                return Err(AppError::ExportFailed("fake export failed".to_string()));
            }
            if !self.export_nothing {
                let rows: String = (0..400).map(|i| format!("INSERT INTO t VALUES ({i});\n")).collect();
                std::fs::write(dest.join("app_data.sql"), rows)?;
            }
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            self.record("reset");
            Ok(())
        }

        async fn import(&self, source: &Path) -> Result<()> {
            self.record("import");
            if self.fail_import {
                return Err(AppError::ImportFailed("fake import failed".to_string()));
            }
            if files_with_suffix(source, ".sql")?.is_empty() {
                return Err(AppError::ImportFailed("dump missing from unpacked archive".to_string()));
            }
            Ok(())
        }

        async fn sanity_count(&self) -> Result<u64> {
            self.record("sanity");
            Ok(self.records_after_import)
        }
    }
}
