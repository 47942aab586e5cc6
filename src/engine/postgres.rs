// dbvault/src/engine/postgres.rs
use std::path::{Path, PathBuf};

use sqlx::{Connection, PgConnection};
use url::Url;

use super::{DatabaseEngine, EngineTarget, files_with_suffix};
use crate::backup::window::BackupWindow;
use crate::config::ConnectionConfig;
use crate::errors::{AppError, Result};
use crate::utils::tools::{ToolCommand, ToolRunner};

const PG_DUMP: &str = "pg_dump";
const PSQL: &str = "psql";
const ADMIN_DATABASE: &str = "postgres";
const SCHEMA_SUFFIX: &str = "_schema.sql";
const DATA_SUFFIX: &str = "_data.sql";
const PLAIN_SUFFIX: &str = ".sql";

/// PostgreSQL driven through `pg_dump` and `psql`, with sqlx for administrative queries.
#[derive(Debug)]
pub struct PostgresEngine {
    url: Url,
    database: String,
    tools: ToolRunner,
}

impl PostgresEngine {
    pub fn new(connection: &ConnectionConfig, tools: ToolRunner) -> Result<Self> {
        let mut url = Url::parse(&connection.url)
            .map_err(|e| AppError::Config(format!("invalid DATABASE_URL: {e}")))?;
        let database = match &connection.database {
            Some(name) => name.clone(),
            None => get_db_name_from_url(&url)?,
        };
        if database.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-') {
            return Err(AppError::Config(format!("invalid database name: {database}")));
        }
        url.set_path(&format!("/{database}"));
        Ok(Self {
            url,
            database,
            tools,
        })
    }

    fn admin_url(&self) -> Url {
        let mut admin_url = self.url.clone();
        admin_url.set_path(&format!("/{ADMIN_DATABASE}"));
        admin_url
    }

    async fn admin_connection(&self) -> Result<PgConnection> {
        PgConnection::connect(self.admin_url().as_str())
            .await
            .map_err(|e| AppError::ConnectivityFailed {
                endpoint: self.endpoint(),
                reason: e.to_string(),
            })
    }

    async fn run_psql(&self, sql_file: &Path, context: &str) -> Result<()> {
        log::info!(target: "engine::postgres", "Applying {context} file {}", sql_file.display());
        let command = ToolCommand::new(PSQL)
            .arg("-X")
            .arg("-q")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-d")
            .secret_arg(self.url.as_str())
            .arg("-f")
            .arg(sql_file);
        self.tools.run(&command).await.map_err(|e| {
            AppError::ImportFailed(format!("{context} file {}: {e}", sql_file.display()))
        })?;
        Ok(())
    }

    async fn create_database(&self, admin: &mut PgConnection) -> Result<()> {
        let mut create_sql = format!(r#"CREATE DATABASE "{}""#, quote_ident(&self.database));
        let owner = self.url.username();
        if !owner.is_empty() {
            create_sql.push_str(&format!(r#" OWNER "{}""#, quote_ident(owner)));
        }
        sqlx::query(&create_sql)
            .execute(&mut *admin)
            .await
            .map_err(|e| AppError::ImportFailed(format!("cannot create database '{}': {e}", self.database)))?;
        log::info!(target: "engine::postgres", "Database '{}' created", self.database);
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    name.replace('"', "\"\"")
}

/// Extracts the database name from the path of a connection URL.
fn get_db_name_from_url(url: &Url) -> Result<String> {
    let path = url.path().trim_start_matches('/');
    if path.is_empty() {
        Err(AppError::Config(
            "database name not found in DATABASE_URL path; set DATABASE_NAME".to_string(),
        ))
    } else {
        Ok(path.to_string())
    }
}

impl DatabaseEngine for PostgresEngine {
    fn export_tool(&self) -> &'static str {
        PG_DUMP
    }

    fn import_tool(&self) -> &'static str {
        PSQL
    }

    fn endpoint(&self) -> String {
        format!(
            "postgres://{}:{}/{}",
            self.url.host_str().unwrap_or("localhost"),
            self.url.port().unwrap_or(5432),
            self.database
        )
    }

    fn target(&self) -> EngineTarget {
        EngineTarget {
            database: Some(self.database.clone()),
            ..Default::default()
        }
    }

    async fn probe(&self) -> Result<()> {
        let mut conn = self.admin_connection().await?;
        sqlx::query("SELECT 1")
            .execute(&mut conn)
            .await
            .map_err(|e| AppError::ConnectivityFailed {
                endpoint: self.endpoint(),
                reason: e.to_string(),
            })?;
        conn.close().await.ok();
        Ok(())
    }

    async fn tool_version(&self) -> Result<String> {
        let output = self.tools.run(&ToolCommand::new(PG_DUMP).arg("--version")).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn export(&self, window: &BackupWindow, dest: &Path) -> Result<()> {
        log::debug!(
            target: "engine::postgres",
            "pg_dump has no time filter, dumping all of '{}' for window {} .. {}",
            self.database, window.start, window.end
        );

        let schema_file = dest.join(format!("{}{SCHEMA_SUFFIX}", self.database));
        let data_file = dest.join(format!("{}{DATA_SUFFIX}", self.database));

        let schema = ToolCommand::new(PG_DUMP)
            .arg("--schema-only")
            .arg("-f")
            .arg(&schema_file)
            .secret_arg(self.url.as_str());
        self.tools
            .run(&schema)
            .await
            .map_err(|e| AppError::ExportFailed(format!("schema of '{}': {e}", self.database)))?;
        log::info!(target: "engine::postgres", "✓ Schema for {} dumped", self.database);

        let data = ToolCommand::new(PG_DUMP)
            .arg("--data-only")
            .arg("--column-inserts")
            .arg("-f")
            .arg(&data_file)
            .secret_arg(self.url.as_str());
        self.tools
            .run(&data)
            .await
            .map_err(|e| AppError::ExportFailed(format!("data of '{}': {e}", self.database)))?;
        log::info!(target: "engine::postgres", "✓ Data for {} dumped", self.database);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        if self.database.eq_ignore_ascii_case(ADMIN_DATABASE) {
            return Err(AppError::ImportFailed(format!(
                "refusing to drop the system database '{}'",
                self.database
            )));
        }
        let mut admin = self.admin_connection().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(&self.database)
                .fetch_one(&mut admin)
                .await
                .map_err(|e| {
                    AppError::ImportFailed(format!("cannot check database '{}': {e}", self.database))
                })?;

        if exists {
            log::warn!(target: "engine::postgres", "Dropping database '{}'", self.database);
            sqlx::query(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
            )
            .bind(&self.database)
            .execute(&mut admin)
            .await
            .map_err(|e| {
                AppError::ImportFailed(format!(
                    "cannot terminate connections to '{}': {e}",
                    self.database
                ))
            })?;
            sqlx::query(&format!(r#"DROP DATABASE "{}" WITH (FORCE)"#, quote_ident(&self.database)))
                .execute(&mut admin)
                .await
                .map_err(|e| AppError::ImportFailed(format!("cannot drop '{}': {e}", self.database)))?;
        }

        self.create_database(&mut admin).await?;
        admin.close().await.ok();
        Ok(())
    }

    async fn import(&self, source: &Path) -> Result<()> {
        for (file, context) in import_plan(source)? {
            self.run_psql(&file, context).await?;
        }
        Ok(())
    }

    async fn sanity_count(&self) -> Result<u64> {
        let mut conn = PgConnection::connect(self.url.as_str()).await?;
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = 'public' ORDER BY tablename",
        )
        .fetch_all(&mut conn)
        .await?;

        let mut total: u64 = 0;
        for (table,) in &tables {
            let count: i64 =
                sqlx::query_scalar(&format!(r#"SELECT COUNT(*) FROM public."{}""#, quote_ident(table)))
                    .fetch_one(&mut conn)
                    .await?;
            log::debug!(target: "engine::postgres", "{table}: {count} rows");
            total += u64::try_from(count).unwrap_or(0);
        }
        conn.close().await.ok();
        log::info!(
            target: "engine::postgres",
            "Found {} tables in public schema with {total} rows",
            tables.len()
        );
        Ok(total)
    }
}

/// SQL files to apply in order: schema dumps, then data dumps.
///
/// A single-file `.sql.gz` artifact unpacks to one plain dump, which is
/// applied as is when no split dumps are present.
fn import_plan(source: &Path) -> Result<Vec<(PathBuf, &'static str)>> {
    let mut plan: Vec<(PathBuf, &'static str)> = files_with_suffix(source, SCHEMA_SUFFIX)?
        .into_iter()
        .map(|file| (file, "schema"))
        .collect();
    plan.extend(files_with_suffix(source, DATA_SUFFIX)?.into_iter().map(|file| (file, "data")));
    if plan.is_empty() {
        plan.extend(files_with_suffix(source, PLAIN_SUFFIX)?.into_iter().map(|file| (file, "dump")));
    }
    if plan.is_empty() {
        return Err(AppError::ImportFailed(format!(
            "no *{PLAIN_SUFFIX} dump files in {}",
            source.display()
        )));
    }
    Ok(plan)
}
