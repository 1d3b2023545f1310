use std::path::Path;

use colored::Colorize;
use comfy_table::Table;
use error_stack::{IntoReport, ResultExt};
use indicatif::{ProgressBar, ProgressStyle};
use inflector::Inflector;
use strum::IntoEnumIterator;

use crate::client_id::ClientIdManager;
use crate::dialoguer::Dialoguer;
use crate::mappings::MappingStore;
use crate::settings::{AudioFormat, Settings};
use crate::{archive, downloader::runner::ScdlRunner};

use super::{SyncError, SyncOpResult, SyncOrchestrator, SyncResult};

#[derive(Debug, Clone, strum_macros::Display, strum_macros::EnumIter)]
pub enum SyncCommands {
    AddPlaylist,
    RemovePlaylist,
    ChangePlaylistDirectory,
    SyncPlaylist,
    SyncAllPlaylists,
    ListPlaylists,
    CleanArchives,
}

impl SyncCommands {
    pub async fn execute() -> SyncOpResult<()> {
        let options = Self::get_options();
        let selection = Dialoguer::select("What you want to do?".to_string(), options, None)
            .change_context(SyncError)?;
        return match Self::get_selection(selection) {
            SyncCommands::AddPlaylist => Self::add_playlist().await,
            SyncCommands::RemovePlaylist => Self::remove_playlist(),
            SyncCommands::ChangePlaylistDirectory => Self::change_playlist_directory(),
            SyncCommands::SyncPlaylist => Self::sync_playlist().await,
            SyncCommands::SyncAllPlaylists => {
                let all_ok = sync(None, false, false).await?;
                require_all_synced(all_ok)
            }
            SyncCommands::ListPlaylists => list(),
            SyncCommands::CleanArchives => Self::clean_archives(),
        };
    }

    fn get_options() -> Vec<String> {
        Self::iter()
            .map(|element| element.to_string().to_sentence_case())
            .collect::<Vec<_>>()
    }

    fn get_selection(selection: usize) -> Self {
        let options = Self::iter().collect::<Vec<_>>();
        options[selection].clone()
    }

    async fn add_playlist() -> SyncOpResult<()> {
        let url = Dialoguer::input("Playlist url:".to_string()).change_context(SyncError)?;
        let directory =
            Dialoguer::input("Download directory:".to_string()).change_context(SyncError)?;
        add(url.trim(), Path::new(directory.trim()))
    }

    fn remove_playlist() -> SyncOpResult<()> {
        let mut store = MappingStore::load().change_context(SyncError)?;
        let urls = Self::select_urls(&store)?;
        let selection = Dialoguer::select("Select the playlist to remove".to_string(), urls, None)
            .change_context(SyncError)?;
        let url = store.list()[selection].url.clone();
        let confirmed = Dialoguer::select_yes_or_no(format!("Remove {}?", url))
            .change_context(SyncError)?;
        if !confirmed {
            return Ok(());
        }
        store.remove(&url).change_context(SyncError)?;
        println!("{} removed from the mapping store", url.cyan());
        Ok(())
    }

    fn change_playlist_directory() -> SyncOpResult<()> {
        let mut store = MappingStore::load().change_context(SyncError)?;
        let urls = Self::select_urls(&store)?;
        let selection = Dialoguer::select("Select the playlist".to_string(), urls, None)
            .change_context(SyncError)?;
        let mapping = store.list()[selection].clone();
        let directory = Dialoguer::input_with_default(
            "New download directory:".to_string(),
            mapping.directory.display().to_string(),
        )
        .change_context(SyncError)?;
        // add overwrites the existing entry, keeping the original added date
        // out of scope: the mapping is effectively re-created.
        store
            .add(&mapping.url, Path::new(directory.trim()))
            .change_context(SyncError)?;
        println!(
            "{} now downloads to {}",
            mapping.url.cyan(),
            directory.trim().cyan()
        );
        Ok(())
    }

    async fn sync_playlist() -> SyncOpResult<()> {
        let store = MappingStore::load().change_context(SyncError)?;
        let urls = Self::select_urls(&store)?;
        let selection = Dialoguer::select("Select the playlist to sync".to_string(), urls, None)
            .change_context(SyncError)?;
        let url = store.list()[selection].url.clone();
        let all_ok = sync(Some(url), false, false).await?;
        require_all_synced(all_ok)
    }

    fn clean_archives() -> SyncOpResult<()> {
        clean(None)
    }

    fn select_urls(store: &MappingStore) -> SyncOpResult<Vec<String>> {
        if store.is_empty() {
            println!("{}", "No playlists mapped yet, add one first".yellow());
            return Err(error_stack::Report::new(SyncError)
                .attach_printable("The mapping store is empty"));
        }
        Ok(store
            .list()
            .into_iter()
            .map(|mapping| mapping.url)
            .collect())
    }
}

/// Field-by-field update applied by the `config` subcommand. All `None`
/// means "just show the current configuration".
#[derive(Debug, Default)]
pub struct ConfigUpdate {
    pub format: Option<AudioFormat>,
    pub client_id: Option<String>,
    pub remove_deleted: Option<bool>,
    pub original_art: Option<bool>,
    pub original_name: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub shared_dir: Option<String>,
}

impl ConfigUpdate {
    fn is_empty(&self) -> bool {
        self.format.is_none()
            && self.client_id.is_none()
            && self.remove_deleted.is_none()
            && self.original_art.is_none()
            && self.original_name.is_none()
            && self.timeout_secs.is_none()
            && self.shared_dir.is_none()
    }
}

pub fn add(url: &str, directory: &Path) -> SyncOpResult<()> {
    let mut store = MappingStore::load().change_context(SyncError)?;
    let overwriting = store.get(url).is_some();
    store.add(url, directory).change_context(SyncError)?;
    if overwriting {
        println!(
            "{} remapped to {}",
            url.cyan(),
            directory.display().to_string().cyan()
        );
    } else {
        println!(
            "{} mapped to {}",
            url.cyan(),
            directory.display().to_string().cyan()
        );
    }
    Ok(())
}

pub fn remove(url: &str) -> SyncOpResult<()> {
    let mut store = MappingStore::load().change_context(SyncError)?;
    store.remove(url).change_context(SyncError)?;
    println!("{} removed from the mapping store", url.cyan());
    Ok(())
}

pub fn list() -> SyncOpResult<()> {
    let store = MappingStore::load().change_context(SyncError)?;
    if store.is_empty() {
        println!("{}", "No playlists mapped yet".yellow());
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Playlist", "Directory", "Added", "Last sync"]);
    for mapping in store.list() {
        let last_sync = mapping
            .last_sync
            .map(|timestamp| timestamp.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        table.add_row(vec![
            mapping.url,
            mapping.directory.display().to_string(),
            mapping.added_date.format("%Y-%m-%d").to_string(),
            last_sync,
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Runs the sync pipeline for one playlist or, when `playlist` is `None`,
/// for every mapping. Returns `true` when every targeted playlist synced.
pub async fn sync(playlist: Option<String>, dry_run: bool, debug: bool) -> SyncOpResult<bool> {
    let mut settings = Settings::load().change_context(SyncError)?;
    if debug {
        settings.debug = true;
    }
    if settings.client_id().is_none() && !dry_run {
        if let Ok(manager) = ClientIdManager::new() {
            if let Some(client_id) = manager.obtain().await {
                settings.client_id = client_id;
            }
        }
    }

    let store = MappingStore::load().change_context(SyncError)?;
    if store.is_empty() {
        println!("{}", "No playlists mapped yet, add one first".yellow());
        return Ok(true);
    }

    let runner = ScdlRunner::new(settings.debug);
    let mut orchestrator = SyncOrchestrator::new(store, settings, runner);

    let results = match playlist {
        Some(url) => {
            println!("Syncing {}", url.cyan());
            let result = orchestrator.sync(&url, dry_run).await;
            vec![(url, result)]
        }
        None => {
            let total = orchestrator.store().list().len() as u64;
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg}\n[{wide_bar:.white/blue}] {pos}/{len}")
                    .into_report()
                    .change_context(SyncError)?
                    .progress_chars("█  "),
            );
            let mut results = Vec::new();
            for mapping in orchestrator.store().list() {
                pb.set_message(format!("Syncing {}", mapping.url.clone().cyan()));
                let result = orchestrator.sync(&mapping.url, dry_run).await;
                results.push((mapping.url, result));
                pb.inc(1);
            }
            pb.finish_and_clear();
            results
        }
    };

    let mut all_ok = true;
    for (url, result) in &results {
        print_result(url, result, dry_run);
        all_ok &= result.success;
    }
    Ok(all_ok)
}

/// Turns a partial batch failure into an error so every entry point exits
/// nonzero when any playlist failed.
fn require_all_synced(all_ok: bool) -> SyncOpResult<()> {
    if all_ok {
        Ok(())
    } else {
        Err(error_stack::Report::new(SyncError)
            .attach_printable("One or more playlists failed to sync"))
    }
}

fn print_result(url: &str, result: &SyncResult, dry_run: bool) {
    if result.success {
        if dry_run {
            println!("{} {}", "Would sync".green(), url.cyan());
        } else {
            println!(
                "{} {} ({} new files)",
                "Synced".green(),
                url.cyan(),
                result.files_count
            );
        }
    } else {
        let detail = result.error.as_deref().unwrap_or("Unknown error");
        println!("{} {}\n  {}", "Failed".red(), url.cyan(), detail);
    }
}

/// Deletes archive markers so the next sync starts from scratch.
pub fn clean(playlist: Option<String>) -> SyncOpResult<()> {
    let store = MappingStore::load().change_context(SyncError)?;
    let targets = match playlist {
        Some(url) => match store.get(&url) {
            Some(mapping) => vec![mapping],
            None => {
                return Err(error_stack::Report::new(SyncError)
                    .attach_printable(format!("No mapping for {}", url)))
            }
        },
        None => store.list(),
    };
    let mut removed = 0usize;
    for mapping in targets {
        if archive::clear_marker(&mapping.directory).change_context(SyncError)? {
            println!(
                "Removed archive marker for {}",
                mapping.url.clone().cyan()
            );
            removed += 1;
        }
    }
    if removed == 0 {
        println!("{}", "Nothing to clean".yellow());
    }
    Ok(())
}

pub fn configure(update: ConfigUpdate) -> SyncOpResult<()> {
    let mut settings = Settings::load().change_context(SyncError)?;
    if update.is_empty() {
        show_settings(&settings);
        return Ok(());
    }
    if let Some(format) = update.format {
        settings.format = format;
    }
    if let Some(client_id) = update.client_id {
        settings.client_id = client_id;
    }
    if let Some(remove_deleted) = update.remove_deleted {
        settings.remove_deleted = remove_deleted;
    }
    if let Some(original_art) = update.original_art {
        settings.original_art = original_art;
    }
    if let Some(original_name) = update.original_name {
        settings.original_name = original_name;
    }
    if let Some(timeout_secs) = update.timeout_secs {
        settings.timeout_secs = timeout_secs;
    }
    if let Some(shared_dir) = update.shared_dir {
        settings.shared_dir = if shared_dir.is_empty() {
            None
        } else {
            Some(shared_dir)
        };
    }
    settings.validate().change_context(SyncError)?;
    settings.save().change_context(SyncError)?;
    println!("{}", "Configuration updated".green());
    show_settings(&settings);
    Ok(())
}

fn show_settings(settings: &Settings) {
    let mut table = Table::new();
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec!["format".to_string(), settings.format.to_string()]);
    table.add_row(vec![
        "client_id".to_string(),
        settings.masked_client_id(),
    ]);
    table.add_row(vec![
        "remove_deleted".to_string(),
        settings.remove_deleted.to_string(),
    ]);
    table.add_row(vec![
        "original_art".to_string(),
        settings.original_art.to_string(),
    ]);
    table.add_row(vec![
        "original_name".to_string(),
        settings.original_name.to_string(),
    ]);
    table.add_row(vec![
        "timeout_secs".to_string(),
        settings.timeout_secs.to_string(),
    ]);
    table.add_row(vec![
        "shared_dir".to_string(),
        settings.shared_dir.clone().unwrap_or_else(|| "-".to_string()),
    ]);
    println!("{table}");
}

/// Drops the cached client id so the next sync fetches a fresh one.
pub fn reset_client_id() -> SyncOpResult<()> {
    let manager = ClientIdManager::new().change_context(SyncError)?;
    manager.clear_cache();
    println!("{}", "Cached client id removed".green());
    Ok(())
}

/// Verifies client-id resolution without running a sync: reports the
/// configured id when one is set, otherwise attempts auto-generation.
pub async fn test_client_id() -> SyncOpResult<()> {
    let settings = Settings::load().change_context(SyncError)?;
    if settings.client_id().is_some() {
        println!(
            "Configured client id: {}",
            settings.masked_client_id().cyan()
        );
        return Ok(());
    }
    let manager = ClientIdManager::new().change_context(SyncError)?;
    match manager.obtain().await {
        Some(client_id) => {
            let masked = Settings {
                client_id,
                ..Settings::default()
            }
            .masked_client_id();
            println!("{} {}", "Auto-generated client id:".green(), masked.cyan());
            Ok(())
        }
        None => Err(error_stack::Report::new(SyncError)
            .attach_printable("Could not auto-generate a client id")),
    }
}
