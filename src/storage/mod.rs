use std::path::Path;
use std::{fmt, fs};

use error_stack::{IntoReport, ResultExt};
use walkdir::WalkDir;

use crate::config::AppConfig;

#[derive(Debug)]
pub struct StorageError;

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Shared storage error")
    }
}

impl std::error::Error for StorageError {}

pub type StorageResult<T> = error_stack::Result<T, StorageError>;

/// Platform workaround seam: mirrors a private staging directory into a
/// user-visible one after a successful sync.
pub trait SharedStorage: Send + Sync {
    /// Returns the number of files placed into the shared root.
    fn reconcile(&self, private_root: &Path, shared_root: &Path) -> StorageResult<usize>;
}

/// Mirrors audio files by hard link, falling back to a copy when the two
/// roots are on different filesystems. Files already present in the shared
/// root are left alone.
pub struct LinkOrCopyStorage;

impl SharedStorage for LinkOrCopyStorage {
    fn reconcile(&self, private_root: &Path, shared_root: &Path) -> StorageResult<usize> {
        fs::create_dir_all(shared_root)
            .into_report()
            .attach_printable_lazy(|| {
                format!("Failed to create shared root {}", shared_root.display())
            })
            .change_context(StorageError)?;

        let mut placed = 0;
        for entry in WalkDir::new(private_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let is_audio = entry
                .path()
                .extension()
                .and_then(|extension| extension.to_str())
                .map(|extension| {
                    let extension = extension.to_lowercase();
                    AppConfig::AUDIO_EXTENSIONS
                        .iter()
                        .any(|allowed| *allowed == extension)
                })
                .unwrap_or(false);
            if !is_audio {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(private_root)
                .into_report()
                .change_context(StorageError)?;
            let destination = shared_root.join(relative);
            if destination.exists() {
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .into_report()
                    .attach_printable_lazy(|| {
                        format!("Failed to create {}", parent.display())
                    })
                    .change_context(StorageError)?;
            }

            if fs::hard_link(entry.path(), &destination).is_err() {
                fs::copy(entry.path(), &destination)
                    .into_report()
                    .attach_printable_lazy(|| {
                        format!(
                            "Failed to copy {} to {}",
                            entry.path().display(),
                            destination.display()
                        )
                    })
                    .change_context(StorageError)?;
            }
            placed += 1;
        }
        Ok(placed)
    }
}
