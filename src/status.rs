// dbvault/src/status.rs
//! One-shot health report of the backup system, printed as JSON.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backup::logic::lock_key;
use crate::backup::window::RunState;
use crate::catalog::naming::BackupClass;
use crate::catalog::{BackupCatalog, HealthWarning, LocationStats, TypeBreakdown};
use crate::config::AppConfig;
use crate::engine::DatabaseEngine;
use crate::errors::Result;
use crate::restore::logic::RESTORE_LOCK;
use crate::utils::lock::{LockInfo, current_holder};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineStatus {
    Healthy { endpoint: String, response_ms: u128 },
    Unreachable { endpoint: String, error: String },
    Misconfigured { error: String },
}

impl EngineStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, EngineStatus::Healthy { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub lock: String,
    #[serde(flatten)]
    pub holder: LockInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub system: String,
    pub engine: EngineStatus,
    pub storage: Vec<LocationStats>,
    pub backups: TypeBreakdown,
    pub active_runs: Vec<ActiveRun>,
    pub last_runs: BTreeMap<String, DateTime<Utc>>,
    pub warnings: Vec<HealthWarning>,
}

/// Probes the engine once and times the answer.
pub async fn probe_engine<E: DatabaseEngine>(engine: &E) -> EngineStatus {
    let started = Instant::now();
    match engine.probe().await {
        Ok(()) => EngineStatus::Healthy {
            endpoint: engine.endpoint(),
            response_ms: started.elapsed().as_millis(),
        },
        Err(e) => EngineStatus::Unreachable {
            endpoint: engine.endpoint(),
            error: e.to_string(),
        },
    }
}

pub fn collect(config: &AppConfig, engine: EngineStatus, now: DateTime<Utc>) -> Result<StatusReport> {
    let catalog = BackupCatalog::from_config(config);
    let lock_dir = config.state_dir.join("locks");
    let active_runs = BackupClass::ALL
        .iter()
        .map(|class| lock_key(*class))
        .chain(std::iter::once(RESTORE_LOCK.to_string()))
        .filter_map(|lock| current_holder(&lock_dir, &lock).map(|holder| ActiveRun { lock, holder }))
        .collect();

    Ok(StatusReport {
        timestamp: now,
        system: config.system_name.clone(),
        engine,
        storage: catalog.stats()?,
        backups: catalog.type_breakdown()?,
        active_runs,
        last_runs: RunState::load(&config.state_dir).entries().clone(),
        warnings: catalog.health_check(now, config.size_warning_bytes)?,
    })
}
