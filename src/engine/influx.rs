// dbvault/src/engine/influx.rs
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;

use super::{DatabaseEngine, EngineTarget, files_with_suffix};
use crate::backup::window::BackupWindow;
use crate::config::{ConnectionConfig, Secret};
use crate::errors::{AppError, Result};
use crate::utils::tools::{ToolCommand, ToolRunner};

const INFLUX: &str = "influx";
const TOKEN_ENV: &str = "INFLUX_TOKEN";
const EXPORT_SUFFIX: &str = ".csv";

/// InfluxDB 2.x driven through the `influx` CLI.
///
/// The token reaches the CLI through `INFLUX_TOKEN`, never through argv.
#[derive(Debug)]
pub struct InfluxEngine {
    host: String,
    token: Secret,
    org: String,
    bucket: String,
    tools: ToolRunner,
}

impl InfluxEngine {
    pub fn new(connection: &ConnectionConfig, tools: ToolRunner) -> Result<Self> {
        let missing = |what: &str| AppError::PreconditionFailed(format!("InfluxDB {what} is not configured"));
        let host = url::Url::parse(&connection.url)
            .map_err(|e| AppError::Config(format!("invalid DATABASE_URL: {e}")))?;
        Ok(Self {
            host: host.as_str().trim_end_matches('/').to_string(),
            token: connection.token.clone().ok_or_else(|| missing("token"))?,
            org: connection.org.clone().ok_or_else(|| missing("org"))?,
            bucket: connection.bucket.clone().ok_or_else(|| missing("bucket"))?,
            tools,
        })
    }

    fn command(&self, subcommand: &[&str]) -> ToolCommand {
        subcommand
            .iter()
            .fold(ToolCommand::new(INFLUX), |cmd, part| cmd.arg(*part))
            .arg("--host")
            .arg(&self.host)
            .env(TOKEN_ENV, self.token.expose())
    }

    fn range_query(&self, window: &BackupWindow) -> String {
        format!(
            r#"from(bucket: "{}") |> range(start: {}, stop: {})"#,
            self.bucket,
            window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

/// Sums the `_value` column of a raw annotated-CSV query result.
fn parse_count(raw_csv: &str) -> Option<u64> {
    let mut value_column = None;
    let mut total = None;
    for line in raw_csv.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        match value_column {
            None => value_column = fields.iter().position(|f| *f == "_value"),
            Some(idx) => {
                if let Some(value) = fields.get(idx).and_then(|v| v.parse::<u64>().ok()) {
                    total = Some(total.unwrap_or(0) + value);
                }
            }
        }
    }
    total
}

impl DatabaseEngine for InfluxEngine {
    fn export_tool(&self) -> &'static str {
        INFLUX
    }

    fn import_tool(&self) -> &'static str {
        INFLUX
    }

    fn endpoint(&self) -> String {
        format!("{} (org {}, bucket {})", self.host, self.org, self.bucket)
    }

    fn target(&self) -> EngineTarget {
        EngineTarget {
            database: None,
            bucket: Some(self.bucket.clone()),
            org: Some(self.org.clone()),
        }
    }

    async fn probe(&self) -> Result<()> {
        self.tools
            .run(&self.command(&["ping"]))
            .await
            .map_err(|e| AppError::ConnectivityFailed {
                endpoint: self.endpoint(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn tool_version(&self) -> Result<String> {
        let output = self.tools.run(&ToolCommand::new(INFLUX).arg("version")).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn export(&self, window: &BackupWindow, dest: &Path) -> Result<()> {
        let target = dest.join(format!("{}{EXPORT_SUFFIX}", self.bucket));
        let query = self
            .command(&["query"])
            .arg("--org")
            .arg(&self.org)
            .arg("--raw")
            .arg(self.range_query(window))
            .stdout_to(&target);
        self.tools
            .run(&query)
            .await
            .map_err(|e| AppError::ExportFailed(format!("bucket '{}': {e}", self.bucket)))?;
        log::info!(
            target: "engine::influx",
            "✓ Bucket {} exported for {} .. {}",
            self.bucket, window.start, window.end
        );
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        log::warn!(target: "engine::influx", "Deleting bucket '{}'", self.bucket);
        let delete = self
            .command(&["bucket", "delete"])
            .arg("--name")
            .arg(&self.bucket)
            .arg("--org")
            .arg(&self.org);
        if let Err(e) = self.tools.run(&delete).await {
            // absent bucket
            log::warn!(target: "engine::influx", "Bucket delete failed, continuing: {e}");
        }

        let create = self
            .command(&["bucket", "create"])
            .arg("--name")
            .arg(&self.bucket)
            .arg("--org")
            .arg(&self.org);
        self.tools
            .run(&create)
            .await
            .map_err(|e| AppError::ImportFailed(format!("cannot recreate bucket '{}': {e}", self.bucket)))?;
        Ok(())
    }

    async fn import(&self, source: &Path) -> Result<()> {
        for file in import_files(source)? {
            if std::fs::metadata(&file)?.len() == 0 {
                log::info!(target: "engine::influx", "Skipping empty export {}", file.display());
                continue;
            }
            let write = self
                .command(&["write"])
                .arg("--bucket")
                .arg(&self.bucket)
                .arg("--org")
                .arg(&self.org)
                .arg("--format")
                .arg("csv")
                .arg("--file")
                .arg(&file);
            self.tools
                .run(&write)
                .await
                .map_err(|e| AppError::ImportFailed(format!("{}: {e}", file.display())))?;
        }
        Ok(())
    }

    async fn sanity_count(&self) -> Result<u64> {
        let flux = format!(
            r#"from(bucket: "{}") |> range(start: 0) |> count() |> group() |> sum()"#,
            self.bucket
        );
        let output = self
            .tools
            .run(&self.command(&["query"]).arg("--org").arg(&self.org).arg("--raw").arg(flux))
            .await?;
        Ok(parse_count(&output.stdout).unwrap_or(0))
    }
}

/// Annotated CSV exports to write back.
///
/// A single-file `.gz` artifact unpacks to one extension-less export, which
/// is used when the directory holds no `*.csv` files.
fn import_files(source: &Path) -> Result<Vec<PathBuf>> {
    let mut files = files_with_suffix(source, EXPORT_SUFFIX)?;
    if files.is_empty() {
        for entry in std::fs::read_dir(source)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_none() {
                files.push(path);
            }
        }
        files.sort();
    }
    if files.is_empty() {
        return Err(AppError::ImportFailed(format!(
            "no *{EXPORT_SUFFIX} export files in {}",
            source.display()
        )));
    }
    Ok(files)
}
