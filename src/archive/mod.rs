use std::path::{Path, PathBuf};
use std::{fmt, fs};

use error_stack::{IntoReport, ResultExt};

use crate::config::AppConfig;

#[derive(Debug)]
pub struct ArchiveError;

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Archive marker error")
    }
}

impl std::error::Error for ArchiveError {}

pub type ArchiveResult<T> = error_stack::Result<T, ArchiveError>;

/// How the next scdl invocation has to be built for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No usable archive: download the full playlist and build the archive.
    FirstSync,
    /// A valid archive exists: only fetch the delta against it.
    Incremental,
}

/// Path of the download archive scdl keeps inside a synced directory.
pub fn marker_path(directory: &Path) -> PathBuf {
    directory.join(AppConfig::ARCHIVE_FILE_NAME)
}

/// Decides the sync mode from the archive marker.
///
/// An empty marker is left alone (it gets overwritten by the first run), a
/// marker smaller than one record is deleted as corrupted. The asymmetry is
/// intentional and matched against observed scdl behavior; do not extend it
/// to other marker formats.
pub fn inspect(directory: &Path) -> ArchiveResult<SyncMode> {
    let marker = marker_path(directory);
    if !marker.is_file() {
        return Ok(SyncMode::FirstSync);
    }
    let size = fs::metadata(&marker)
        .into_report()
        .attach_printable_lazy(|| format!("Failed to stat {}", marker.display()))
        .change_context(ArchiveError)?
        .len();
    if size == 0 {
        return Ok(SyncMode::FirstSync);
    }
    if size < AppConfig::MIN_VALID_ARCHIVE_BYTES {
        fs::remove_file(&marker)
            .into_report()
            .attach_printable_lazy(|| {
                format!("Failed to delete corrupted archive {}", marker.display())
            })
            .change_context(ArchiveError)?;
        return Ok(SyncMode::FirstSync);
    }
    Ok(SyncMode::Incremental)
}

/// Deletes the archive marker so the next sync starts from scratch. Returns
/// whether a marker was actually removed.
pub fn clear_marker(directory: &Path) -> ArchiveResult<bool> {
    let marker = marker_path(directory);
    if !marker.is_file() {
        return Ok(false);
    }
    fs::remove_file(&marker)
        .into_report()
        .attach_printable_lazy(|| format!("Failed to delete archive {}", marker.display()))
        .change_context(ArchiveError)?;
    Ok(true)
}
