use std::path::{Path, PathBuf};
use std::{env, fmt, fs};

use clap::ValueEnum;
use error_stack::{IntoReport, Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(Debug)]
pub struct SettingsError;

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Settings error")
    }
}

impl std::error::Error for SettingsError {}

pub type SettingsResult<T> = error_stack::Result<T, SettingsError>;

/// Audio format requested from scdl. `Default` keeps whatever the remote
/// transcoding offers, the other variants map 1:1 to scdl flags.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Opus,
    Default,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Mp3 => f.write_str("mp3"),
            AudioFormat::Flac => f.write_str("flac"),
            AudioFormat::Opus => f.write_str("opus"),
            AudioFormat::Default => f.write_str("default"),
        }
    }
}

fn default_format() -> AudioFormat {
    AudioFormat::Mp3
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    AppConfig::DEFAULT_TIMEOUT_SECS
}

/// User-facing configuration, persisted as JSON in the per-user config
/// directory. Missing fields fall back to defaults so older config files
/// keep loading after upgrades.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_format")]
    pub format: AudioFormat,
    #[serde(default = "default_true")]
    pub original_art: bool,
    #[serde(default = "default_true")]
    pub original_name: bool,
    /// When enabled, incremental syncs also delete local files that are no
    /// longer part of the remote playlist.
    #[serde(default)]
    pub remove_deleted: bool,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// User-visible directory that receives a copy (or hard link) of every
    /// new file after a successful sync. Meant for setups where scdl writes
    /// to a private staging directory.
    #[serde(default)]
    pub shared_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            original_art: true,
            original_name: true,
            remove_deleted: false,
            client_id: String::new(),
            debug: false,
            timeout_secs: AppConfig::DEFAULT_TIMEOUT_SECS,
            shared_dir: None,
        }
    }
}

impl Settings {
    pub fn config_dir() -> SettingsResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or(SettingsError)
            .into_report()
            .attach_printable("Could not determine the platform configuration directory")?;
        Ok(base.join(AppConfig::CONFIG_DIR_NAME))
    }

    pub fn config_file_path() -> SettingsResult<PathBuf> {
        Ok(Self::config_dir()?.join(AppConfig::CONFIG_FILE_NAME))
    }

    /// Loads the settings file, falling back to defaults when it is missing
    /// or unparsable, then applies `SCDL_SYNC_*` environment overrides.
    pub fn load() -> SettingsResult<Self> {
        let path = Self::config_file_path()?;
        let mut settings = Self::load_file(&path);
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn load_file(path: &Path) -> Self {
        if !path.is_file() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = Self::env_override("CLIENT_ID") {
            self.client_id = value;
        }
        if let Some(value) = Self::env_override("FORMAT") {
            if let Ok(format) = AudioFormat::from_str(&value, true) {
                self.format = format;
            }
        }
        if let Some(value) = Self::env_override("DEBUG") {
            self.debug = Self::parse_bool(&value).unwrap_or(self.debug);
        }
        if let Some(value) = Self::env_override("REMOVE_DELETED") {
            self.remove_deleted = Self::parse_bool(&value).unwrap_or(self.remove_deleted);
        }
        if let Some(value) = Self::env_override("ORIGINAL_ART") {
            self.original_art = Self::parse_bool(&value).unwrap_or(self.original_art);
        }
        if let Some(value) = Self::env_override("ORIGINAL_NAME") {
            self.original_name = Self::parse_bool(&value).unwrap_or(self.original_name);
        }
        if let Some(value) = Self::env_override("TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.timeout_secs = secs;
            }
        }
        if let Some(value) = Self::env_override("SHARED_DIR") {
            self.shared_dir = if value.is_empty() { None } else { Some(value) };
        }
    }

    fn env_override(key: &str) -> Option<String> {
        env::var(format!("{}{}", AppConfig::ENV_PREFIX, key)).ok()
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn save(&self) -> SettingsResult<()> {
        let config_dir = Self::config_dir()?;
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .into_report()
                .attach_printable_lazy(|| {
                    format!("Failed to create directory at {}", config_dir.display())
                })
                .change_context(SettingsError)?;
        }
        let serialized = serde_json::to_string_pretty(self)
            .into_report()
            .attach_printable("Failed to serialize the settings to JSON")
            .change_context(SettingsError)?;
        let path = Self::config_file_path()?;
        fs::write(&path, serialized)
            .into_report()
            .attach_printable_lazy(|| format!("Failed to write settings file at {}", path.display()))
            .change_context(SettingsError)?;
        Ok(())
    }

    /// Client id after overrides, or `None` when nothing is configured and
    /// scdl should self-negotiate.
    pub fn client_id(&self) -> Option<String> {
        if self.client_id.is_empty() {
            None
        } else {
            Some(self.client_id.clone())
        }
    }

    /// Client id with the middle elided, safe for terminal output. Works in
    /// characters, not bytes, so arbitrary configured values cannot split a
    /// UTF-8 sequence.
    pub fn masked_client_id(&self) -> String {
        match self.client_id() {
            Some(id) => {
                let chars: Vec<char> = id.chars().collect();
                if chars.len() > 12 {
                    let head: String = chars[..8].iter().collect();
                    let tail: String = chars[chars.len() - 4..].iter().collect();
                    format!("{}...{}", head, tail)
                } else {
                    "***".to_string()
                }
            }
            None => "auto-generate (not set)".to_string(),
        }
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if self.timeout_secs == 0 {
            return Err(Report::new(SettingsError)
                .attach_printable("timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}
