use std::path::Path;
use std::time::Duration;

use crate::archive::{marker_path, SyncMode};
use crate::config::AppConfig;
use crate::settings::{AudioFormat, Settings};

/// One fully-built scdl invocation: program, argument vector and the wall
/// clock budget it gets. Never persisted; rebuilt for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl SyncInvocation {
    /// Shell-free rendering, only used for log lines.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Builds the scdl argument vector for one playlist run.
///
/// First syncs pass `--download-archive` so the run populates the archive.
/// Incremental syncs pass `--sync`, which also mirrors remote deletions
/// locally; because that is destructive it is gated behind the
/// `remove_deleted` setting, and archive-only tracking is used otherwise.
/// Deterministic: the same inputs always produce the same vector.
pub fn build(
    mode: SyncMode,
    playlist_url: &str,
    directory: &Path,
    settings: &Settings,
) -> SyncInvocation {
    let marker = marker_path(directory);
    let mut args = vec![
        "-l".to_string(),
        playlist_url.to_string(),
        "--path".to_string(),
        directory.to_string_lossy().to_string(),
    ];

    if let Some(client_id) = settings.client_id() {
        args.push("--client-id".to_string());
        args.push(client_id);
    }

    let archive_flag = match mode {
        SyncMode::FirstSync => "--download-archive",
        SyncMode::Incremental if settings.remove_deleted => "--sync",
        SyncMode::Incremental => "--download-archive",
    };
    args.push(archive_flag.to_string());
    args.push(marker.to_string_lossy().to_string());

    // Debug output is always requested: the reconciler mines it for
    // per-track permalink URLs.
    args.push("--debug".to_string());

    if settings.original_art {
        args.push("--original-art".to_string());
    }
    if settings.original_name {
        args.push("--original-name".to_string());
    }
    args.push("--force-metadata".to_string());
    args.push("--addtofile".to_string());

    match settings.format {
        AudioFormat::Flac => args.push("--flac".to_string()),
        AudioFormat::Opus => args.push("--opus".to_string()),
        AudioFormat::Mp3 | AudioFormat::Default => {}
    }

    SyncInvocation {
        program: AppConfig::SCDL_PROGRAM.to_string(),
        args,
        timeout: Duration::from_secs(settings.timeout_secs),
    }
}
