// dbvault/src/backup/integrity.rs
use std::fs::{self, File};
use std::io;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::catalog::naming::{ArchiveFormat, ArtifactName};
use crate::errors::{AppError, Result};

/// Checks that an artifact exists, is non-empty and, when the format is
/// known, that its compressed stream reads through to the end.
///
/// Encrypted payloads are only checked for existence and size.
pub fn verify(path: &Path) -> Result<()> {
    let failed = |reason: String| AppError::VerificationFailed {
        path: path.to_path_buf(),
        reason,
    };

    let meta = fs::metadata(path).map_err(|e| failed(format!("cannot stat file: {e}")))?;
    if !meta.is_file() {
        return Err(failed("not a regular file".to_string()));
    }
    if meta.len() == 0 {
        return Err(failed("file is empty".to_string()));
    }

    let format = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| ArtifactName::parse(n).ok())
        .map(|name| (name.format, name.encrypted))
        .or_else(|| format_from_extension(path).map(|format| (format, false)));

    match format {
        Some((_, true)) | None => Ok(()),
        Some((ArchiveFormat::TarGz, false)) => list_tar_gz(path).map_err(|e| failed(format!("corrupt archive: {e}"))),
        Some((ArchiveFormat::Gzip, false)) => read_gzip(path).map_err(|e| failed(format!("corrupt gzip stream: {e}"))),
    }
}

fn format_from_extension(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".gz") {
        Some(ArchiveFormat::Gzip)
    } else {
        None
    }
}

/// Walks every entry without extracting; the trailing gzip data is drained too
/// so a truncated stream fails the CRC check.
fn list_tar_gz(path: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
    let mut entries = 0usize;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.display().to_string();
        let expected = entry.size();
        let read = io::copy(&mut entry, &mut io::sink())?;
        if read != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{name}: expected {expected} bytes, read {read}"),
            ));
        }
        entries += 1;
    }
    io::copy(&mut archive.into_inner(), &mut io::sink())?;
    if entries == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "archive has no entries"));
    }
    Ok(())
}

fn read_gzip(path: &Path) -> io::Result<()> {
    io::copy(&mut GzDecoder::new(File::open(path)?), &mut io::sink())?;
    Ok(())
}
