// dbvault/src/catalog/report.rs
//! Human-readable catalog listings printed to stdout.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use super::{BackupArtifact, BackupCatalog};
use crate::backup::metadata::BackupMetadata;
use crate::catalog::naming::ArchiveFormat;
use crate::config::StorageRole;
use crate::errors::Result;

/// Formats a byte count with binary units, e.g. `1.5 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn modified_at(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_artifact(artifact: &BackupArtifact) {
    println!(
        "  {:<52} {:>11}  {:<11}  {}{}",
        artifact.file_name(),
        human_size(artifact.size),
        artifact.class(),
        modified_at(artifact.modified),
        if artifact.name.encrypted { "  🔒" } else { "" }
    );
}

/// Prints every location with its artifacts. Absent locations get a notice.
pub fn print_listing(catalog: &BackupCatalog) -> Result<()> {
    for location in catalog.locations() {
        let title = match location.role {
            StorageRole::Primary => "📂 Primary storage",
            StorageRole::Secondary => "🌐 Secondary storage",
        };
        println!("{title}: {}", location.root.display());
        if !location.exists() {
            println!("  ⚠️ Directory not found: {}", location.root.display());
            continue;
        }
        let artifacts = catalog.list_location(location.role)?;
        if artifacts.is_empty() {
            println!("  (no backups)");
        }
        for artifact in &artifacts {
            print_artifact(artifact);
        }
        println!();
    }
    Ok(())
}

/// Listing plus embedded metadata, statistics, type breakdown and health warnings.
pub fn print_detailed(catalog: &BackupCatalog, now: DateTime<Utc>, size_threshold: u64) -> Result<()> {
    print_listing(catalog)?;

    println!("📝 Metadata");
    for artifact in catalog.list()? {
        if artifact.name.encrypted || artifact.name.format != ArchiveFormat::TarGz {
            continue;
        }
        match BackupMetadata::read_from_archive(&artifact.path) {
            Ok(Some(meta)) => println!(
                "  {} [{}]: {} window {} .. {}, tool {}, compression {}, encrypted {}",
                artifact.file_name(),
                artifact.location,
                meta.backup_type,
                meta.start_time,
                meta.end_time,
                meta.tool_version,
                meta.compression,
                meta.encryption
            ),
            Ok(None) => println!("  {} [{}]: no metadata", artifact.file_name(), artifact.location),
            Err(e) => println!("  {} [{}]: unreadable ({e})", artifact.file_name(), artifact.location),
        }
    }
    println!();

    println!("📊 Statistics");
    for stats in catalog.stats()? {
        println!(
            "  {:<10} {:>5} backups  {:>11}",
            stats.location.to_string(),
            stats.count,
            human_size(stats.total_size)
        );
    }
    let breakdown = catalog.type_breakdown()?;
    println!(
        "  incremental: {}  full: {}  encrypted: {}",
        breakdown.incremental, breakdown.full, breakdown.encrypted
    );
    println!();

    println!("🩺 Health");
    let warnings = catalog.health_check(now, size_threshold)?;
    if warnings.is_empty() {
        println!("  ✅ No issues found");
    }
    for warning in warnings {
        println!("  ⚠️ {warning}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
