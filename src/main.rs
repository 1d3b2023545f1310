use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use error_stack::fmt::{Charset, ColorMode};
use error_stack::{FutureExt, Report, ResultExt};

use crate::settings::AudioFormat;
use crate::sync::commands::{self, ConfigUpdate, SyncCommands};

mod archive;
mod client_id;
mod config;
mod dialoguer;
mod downloader;
mod mappings;
mod reconcile;
mod settings;
mod storage;
mod sync;
mod tagger;

#[derive(Debug)]
pub struct ScdlSyncError;
impl fmt::Display for ScdlSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scdl sync error")
    }
}
impl std::error::Error for ScdlSyncError {}

pub type ScdlSyncResult<T> = error_stack::Result<T, ScdlSyncError>;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Keeps local folders in sync with SoundCloud playlists")]
struct Cli {
    #[command(subcommand)]
    command: ScdlSyncCommands,
}

#[derive(Subcommand, Debug, PartialEq, Clone)]
enum ScdlSyncCommands {
    /// Map a playlist url to a download directory
    Add {
        /// Playlist url, must contain a /sets/ segment
        url: String,
        /// Directory that receives the downloads, created if missing
        directory: PathBuf,
    },
    /// Remove a playlist from the mapping store
    Remove {
        url: String,
    },
    /// Show every mapped playlist and its last sync time
    List,
    /// Sync one playlist, or all of them when no url is given
    Sync {
        /// Playlist url to sync, defaults to every mapping
        playlist: Option<String>,
        /// Inspect and report without invoking scdl
        #[clap(long, action)]
        dry_run: bool,
        /// Echo scdl output and the full command line
        #[clap(long, action)]
        debug: bool,
    },
    /// Show or update the configuration file
    Config {
        /// Audio format requested from scdl
        #[clap(long, value_enum)]
        format: Option<AudioFormat>,
        /// SoundCloud client id, cleared when set to an empty string
        #[clap(long)]
        client_id: Option<String>,
        /// Mirror remote deletions during incremental syncs
        #[clap(long)]
        remove_deleted: Option<bool>,
        /// Keep the original cover art
        #[clap(long)]
        original_art: Option<bool>,
        /// Keep the original file names
        #[clap(long)]
        original_name: Option<bool>,
        /// Kill scdl after this many seconds
        #[clap(long)]
        timeout_secs: Option<u64>,
        /// Shared directory mirrored after successful syncs, empty to unset
        #[clap(long)]
        shared_dir: Option<String>,
        /// Drop the cached client id so the next sync fetches a fresh one
        #[clap(long, action)]
        reset_client_id: bool,
    },
    /// Verify client-id resolution without syncing anything
    TestClientId,
    /// Remove archive markers so the next sync downloads from scratch
    Clean {
        /// Playlist url to clean, defaults to every mapping
        playlist: Option<String>,
    },
    /// Interactive playlist management menu
    Manage,
}

impl ScdlSyncCommands {
    pub async fn execute(&self) -> ScdlSyncResult<()> {
        return match self {
            ScdlSyncCommands::Add { url, directory } => {
                commands::add(url, directory).change_context(ScdlSyncError)
            }
            ScdlSyncCommands::Remove { url } => {
                commands::remove(url).change_context(ScdlSyncError)
            }
            ScdlSyncCommands::List => commands::list().change_context(ScdlSyncError),
            ScdlSyncCommands::Sync {
                playlist,
                dry_run,
                debug,
            } => {
                let all_ok = commands::sync(playlist.clone(), *dry_run, *debug)
                    .change_context(ScdlSyncError)
                    .await?;
                if all_ok {
                    Ok(())
                } else {
                    Err(Report::new(ScdlSyncError)
                        .attach_printable("One or more playlists failed to sync")
                        .attach(Suggestion(
                            "run again with --debug to see the scdl output".to_string(),
                        )))
                }
            }
            ScdlSyncCommands::Config {
                format,
                client_id,
                remove_deleted,
                original_art,
                original_name,
                timeout_secs,
                shared_dir,
                reset_client_id,
            } => {
                if *reset_client_id {
                    commands::reset_client_id().change_context(ScdlSyncError)?;
                }
                commands::configure(ConfigUpdate {
                    format: *format,
                    client_id: client_id.clone(),
                    remove_deleted: *remove_deleted,
                    original_art: *original_art,
                    original_name: *original_name,
                    timeout_secs: *timeout_secs,
                    shared_dir: shared_dir.clone(),
                })
                .change_context(ScdlSyncError)
            }
            ScdlSyncCommands::TestClientId => {
                commands::test_client_id()
                    .change_context(ScdlSyncError)
                    .await
            }
            ScdlSyncCommands::Clean { playlist } => {
                commands::clean(playlist.clone()).change_context(ScdlSyncError)
            }
            ScdlSyncCommands::Manage => {
                SyncCommands::execute().change_context(ScdlSyncError).await
            }
        };
    }
}

pub struct Suggestion(String);

impl Suggestion {
    pub fn set_report() {
        Report::set_charset(Charset::Utf8);
        Report::set_color_mode(ColorMode::Color);
        Report::install_debug_hook::<Self>(|Self(value), context| {
            context.push_body(format!("{}: {value}", "suggestion".yellow()))
        });
    }
}

async fn run() -> ScdlSyncResult<()> {
    let cli = Cli::parse();

    Suggestion::set_report();

    cli.command.execute().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ScdlSyncResult<()> {
    run().await
}
