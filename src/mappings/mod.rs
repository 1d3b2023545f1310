use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fmt, fs};

use chrono::{DateTime, Utc};
use error_stack::{IntoReport, Report, ResultExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AppConfig;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    InvalidUrl,
    Directory,
    NotFound,
    Storage,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::InvalidUrl => f.write_str("Invalid playlist URL"),
            MappingError::Directory => f.write_str("Cannot create the playlist directory"),
            MappingError::NotFound => f.write_str("Playlist not found in mappings"),
            MappingError::Storage => f.write_str("Playlist mapping storage error"),
        }
    }
}

impl std::error::Error for MappingError {}

pub type MappingResult<T> = error_stack::Result<T, MappingError>;

/// One persisted playlist-to-directory association.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistMapping {
    pub url: String,
    pub directory: PathBuf,
    pub added_date: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StoredMapping {
    directory: String,
    added_date: DateTime<Utc>,
    last_sync: Option<DateTime<Utc>>,
}

/// Validates the accepted playlist-URL shape: an http(s) URL with a host
/// whose path carries the `/sets/` playlist marker segment.
pub fn validate_playlist_url(playlist_url: &str) -> bool {
    let parsed = match Url::parse(playlist_url) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return false;
    }
    parsed.path().contains("/sets/")
}

/// Persistent mapping between playlist URLs and local directories. Keyed by
/// URL, so the same playlist can never be tracked twice; every mutation is
/// written back to disk immediately.
#[derive(Debug)]
pub struct MappingStore {
    mappings: BTreeMap<String, StoredMapping>,
    store_path: PathBuf,
}

impl MappingStore {
    pub fn load() -> MappingResult<Self> {
        let config_dir = Settings::config_dir().change_context(MappingError::Storage)?;
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .into_report()
                .attach_printable_lazy(|| {
                    format!("Failed to create directory at {}", config_dir.display())
                })
                .change_context(MappingError::Storage)?;
        }
        Self::load_from(config_dir.join(AppConfig::MAPPINGS_FILE_NAME))
    }

    pub fn load_from(store_path: PathBuf) -> MappingResult<Self> {
        let mappings = if store_path.is_file() {
            let content = fs::read_to_string(&store_path)
                .into_report()
                .attach_printable_lazy(|| {
                    format!("Failed to read the mapping file at {}", store_path.display())
                })
                .change_context(MappingError::Storage)?;
            serde_json::from_str(&content)
                .into_report()
                .attach_printable("The mapping file is not valid JSON")
                .change_context(MappingError::Storage)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            mappings,
            store_path,
        })
    }

    fn save(&self) -> MappingResult<()> {
        let serialized = serde_json::to_string_pretty(&self.mappings)
            .into_report()
            .attach_printable("Failed to serialize the playlist mappings")
            .change_context(MappingError::Storage)?;
        fs::write(&self.store_path, serialized)
            .into_report()
            .attach_printable_lazy(|| {
                format!(
                    "Failed to write the mapping file at {}",
                    self.store_path.display()
                )
            })
            .change_context(MappingError::Storage)?;
        Ok(())
    }

    /// Adds (or replaces) a mapping. The directory is created and
    /// canonicalized to an absolute path before anything is persisted.
    pub fn add(&mut self, playlist_url: &str, directory: &Path) -> MappingResult<()> {
        if !validate_playlist_url(playlist_url) {
            return Err(Report::new(MappingError::InvalidUrl).attach_printable(format!(
                "URL must be an http(s) playlist link containing '/sets/': {}",
                playlist_url
            )));
        }

        fs::create_dir_all(directory)
            .into_report()
            .attach_printable_lazy(|| {
                format!("Cannot create directory: {}", directory.display())
            })
            .change_context(MappingError::Directory)?;
        let canonical = fs::canonicalize(directory)
            .into_report()
            .attach_printable_lazy(|| {
                format!("Cannot resolve directory: {}", directory.display())
            })
            .change_context(MappingError::Directory)?;

        self.mappings.insert(
            playlist_url.to_string(),
            StoredMapping {
                directory: canonical.to_string_lossy().to_string(),
                added_date: Utc::now(),
                last_sync: None,
            },
        );
        self.save()
    }

    pub fn remove(&mut self, playlist_url: &str) -> MappingResult<()> {
        if self.mappings.remove(playlist_url).is_none() {
            return Err(Report::new(MappingError::NotFound)
                .attach_printable(format!("No mapping for {}", playlist_url)));
        }
        self.save()
    }

    pub fn get(&self, playlist_url: &str) -> Option<PlaylistMapping> {
        self.mappings
            .get(playlist_url)
            .map(|stored| Self::to_mapping(playlist_url, stored))
    }

    /// All mappings in store order.
    pub fn list(&self) -> Vec<PlaylistMapping> {
        self.mappings
            .iter()
            .map(|(url, stored)| Self::to_mapping(url, stored))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn update_last_sync(
        &mut self,
        playlist_url: &str,
        timestamp: DateTime<Utc>,
    ) -> MappingResult<()> {
        let stored = self
            .mappings
            .get_mut(playlist_url)
            .ok_or(MappingError::NotFound)
            .into_report()
            .attach_printable_lazy(|| format!("No mapping for {}", playlist_url))?;
        stored.last_sync = Some(timestamp);
        self.save()
    }

    fn to_mapping(url: &str, stored: &StoredMapping) -> PlaylistMapping {
        PlaylistMapping {
            url: url.to_string(),
            directory: PathBuf::from(&stored.directory),
            added_date: stored.added_date,
            last_sync: stored.last_sync,
        }
    }
}
