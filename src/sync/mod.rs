use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};

use crate::archive::{self, SyncMode};
use crate::downloader::command;
use crate::downloader::runner::{ProcessOutput, ProcessRunner, RunnerError};
use crate::mappings::{MappingStore, PlaylistMapping};
use crate::reconcile::{self, Diagnostic};
use crate::settings::Settings;
use crate::storage::{LinkOrCopyStorage, SharedStorage};
use crate::tagger::{tag_matched_tracks, LoftyTagger, SourceTagger};

pub mod commands;

#[derive(Debug)]
pub struct SyncError;

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist sync error")
    }
}

impl std::error::Error for SyncError {}

pub type SyncOpResult<T> = error_stack::Result<T, SyncError>;

/// Outcome of one playlist sync. Failures carry a human-readable message;
/// a failed sync always reports zero files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    pub files_count: usize,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn ok(files_count: usize) -> Self {
        Self {
            success: true,
            files_count,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            files_count: 0,
            error: Some(message.into()),
        }
    }
}

/// Per-sync state threaded through the pipeline instead of being stashed on
/// the orchestrator between steps.
#[derive(Debug)]
pub struct SyncContext {
    pub mode: SyncMode,
    pub directory: PathBuf,
    pub files_before: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Drives one playlist through inspect -> build -> run -> reconcile and
/// updates the mapping store on success. Generic over the runner so tests
/// can substitute a stub for the scdl subprocess.
pub struct SyncOrchestrator<R: ProcessRunner> {
    store: MappingStore,
    settings: Settings,
    runner: R,
    tagger: Box<dyn SourceTagger>,
    storage: Box<dyn SharedStorage>,
}

impl<R: ProcessRunner> SyncOrchestrator<R> {
    pub fn new(store: MappingStore, settings: Settings, runner: R) -> Self {
        Self {
            store,
            settings,
            runner,
            tagger: Box::new(LoftyTagger),
            storage: Box::new(LinkOrCopyStorage),
        }
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    /// Syncs a single playlist. Never panics and never lets a report
    /// escape: every failure is folded into the returned `SyncResult`.
    pub async fn sync(&mut self, playlist_url: &str, dry_run: bool) -> SyncResult {
        let mapping = match self.store.get(playlist_url) {
            Some(mapping) => mapping,
            None => return SyncResult::failed("Playlist not found in mappings"),
        };
        match self.sync_mapping(&mapping, dry_run).await {
            Ok(result) => result,
            Err(report) => SyncResult::failed(format!("{:?}", report)),
        }
    }

    /// Syncs every mapping in store order, never aborting the batch early.
    pub async fn sync_all(&mut self, dry_run: bool) -> Vec<(String, SyncResult)> {
        let urls: Vec<String> = self
            .store
            .list()
            .into_iter()
            .map(|mapping| mapping.url)
            .collect();
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let result = self.sync(&url, dry_run).await;
            results.push((url, result));
        }
        results
    }

    async fn sync_mapping(
        &mut self,
        mapping: &PlaylistMapping,
        dry_run: bool,
    ) -> SyncOpResult<SyncResult> {
        fs::create_dir_all(&mapping.directory)
            .into_report()
            .attach_printable_lazy(|| {
                format!("Cannot create directory: {}", mapping.directory.display())
            })
            .change_context(SyncError)?;

        let mode = archive::inspect(&mapping.directory).change_context(SyncError)?;
        if dry_run {
            return Ok(SyncResult::ok(0));
        }

        let mut context = SyncContext {
            mode,
            directory: mapping.directory.clone(),
            files_before: reconcile::count_audio_files(&mapping.directory),
            diagnostics: Vec::new(),
        };

        let invocation =
            command::build(context.mode, &mapping.url, &context.directory, &self.settings);
        if self.settings.debug {
            println!(
                "{:?} run over {} ({} files present)",
                context.mode,
                context.directory.display(),
                context.files_before
            );
            println!("Executing: {}", invocation.command_line().dimmed());
        }

        let output = match self.runner.run(&invocation).await {
            Ok(output) => output,
            Err(report) => return Ok(Self::runner_failure(&report)),
        };

        if output.success() {
            self.finish_success(mapping, &mut context, &output)
        } else {
            Ok(Self::process_failure(&output))
        }
    }

    fn finish_success(
        &mut self,
        mapping: &PlaylistMapping,
        context: &mut SyncContext,
        output: &ProcessOutput,
    ) -> SyncOpResult<SyncResult> {
        let reconciliation =
            reconcile::reconcile(&output.combined(), &context.directory, context.files_before);
        context.diagnostics = reconciliation.diagnostics.clone();
        if self.settings.debug {
            for diagnostic in &context.diagnostics {
                println!("{}", diagnostic.message().dimmed());
            }
        }

        if let Some(skipped) = reconciliation.lock_contention() {
            println!(
                "{}",
                Diagnostic::LockContention { skipped }.message().yellow()
            );
        }

        // Auxiliary side channels: tagging and shared-storage mirroring are
        // best effort and must never turn a successful sync into a failure.
        let sources: Vec<(String, String)> = reconciliation
            .track_sources()
            .into_iter()
            .map(|(title, url)| (title.to_string(), url.to_string()))
            .collect();
        let tagged = tag_matched_tracks(
            self.tagger.as_ref(),
            &context.directory,
            &sources,
            self.settings.debug,
        );
        if tagged > 0 && self.settings.debug {
            println!("Tagged {} files with their source URL", tagged);
        }

        if let Some(shared_dir) = self.settings.shared_dir.clone() {
            let shared_root = PathBuf::from(shared_dir);
            match self.storage.reconcile(&context.directory, &shared_root) {
                Ok(placed) if placed > 0 => {
                    println!(
                        "Placed {} files into {}",
                        placed,
                        shared_root.display().to_string().cyan()
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    println!(
                        "{} {:?}",
                        "Shared storage reconciliation failed:".yellow(),
                        err
                    );
                }
            }
        }

        self.store
            .update_last_sync(&mapping.url, Utc::now())
            .change_context(SyncError)?;
        Ok(SyncResult::ok(reconciliation.files_count))
    }

    fn runner_failure(report: &Report<RunnerError>) -> SyncResult {
        SyncResult::failed(report.current_context().to_string())
    }

    fn process_failure(output: &ProcessOutput) -> SyncResult {
        let combined = output.combined();
        let message = if let Some(skipped) = reconcile::detect_lock_contention(&combined) {
            format!(
                "File locking error detected: {} files skipped due to lock contention.\n\
                 Try: 1) run 'scdl-sync clean' to remove corrupted archives\n\
                 \x20    2) use a private storage path for the playlist directory\n\
                 \x20    3) or simply retry the sync",
                skipped
            )
        } else if combined.contains("Could not acquire lock") {
            "File locking error detected. Run 'scdl-sync clean' and retry the sync.".to_string()
        } else {
            match output.code {
                Some(code) => format!("scdl exited with code {}: {}", code, output.error_detail()),
                None => format!("scdl was terminated by a signal: {}", output.error_detail()),
            }
        };
        SyncResult::failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::downloader::command::SyncInvocation;
    use crate::downloader::runner::RunnerResult;

    const URL: &str = "https://soundcloud.com/artist/sets/mix";

    enum StubOutcome {
        /// Pretend scdl downloaded `files` new tracks, wrote its archive and
        /// finished with `output`.
        Download { files: usize, output: ProcessOutput },
        Error(RunnerError),
    }

    struct StubRunner {
        outcomes: Mutex<VecDeque<StubOutcome>>,
        invocations: Mutex<Vec<SyncInvocation>>,
        calls: AtomicUsize,
    }

    impl StubRunner {
        fn new(outcomes: Vec<StubOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                invocations: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn target_directory(invocation: &SyncInvocation) -> PathBuf {
            let position = invocation
                .args
                .iter()
                .position(|arg| arg == "--path")
                .expect("--path flag missing");
            PathBuf::from(&invocation.args[position + 1])
        }
    }

    #[async_trait]
    impl ProcessRunner for StubRunner {
        async fn run(&self, invocation: &SyncInvocation) -> RunnerResult<ProcessOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.invocations.lock().unwrap().push(invocation.clone());
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected runner invocation");
            match outcome {
                StubOutcome::Download { files, output } => {
                    let directory = Self::target_directory(invocation);
                    for index in 0..files {
                        fs::write(
                            directory.join(format!("track-{}-{}.mp3", call, index)),
                            b"audio",
                        )
                        .unwrap();
                    }
                    fs::write(
                        archive::marker_path(&directory),
                        "soundcloud_track_00000001\n",
                    )
                    .unwrap();
                    Ok(output)
                }
                StubOutcome::Error(error) => Err(Report::new(error)),
            }
        }
    }

    fn clean_exit() -> ProcessOutput {
        ProcessOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    fn orchestrator(
        config_dir: &Path,
        playlist_dir: &Path,
        outcomes: Vec<StubOutcome>,
    ) -> SyncOrchestrator<StubRunner> {
        let mut store = MappingStore::load_from(config_dir.join("playlists.json")).unwrap();
        store.add(URL, playlist_dir).unwrap();
        SyncOrchestrator::new(store, Settings::default(), StubRunner::new(outcomes))
    }

    #[tokio::test]
    async fn unknown_playlist_fails_without_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::load_from(dir.path().join("playlists.json")).unwrap();
        let mut orchestrator =
            SyncOrchestrator::new(store, Settings::default(), StubRunner::new(vec![]));

        let result = orchestrator.sync(URL, false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert_eq!(orchestrator.runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dry_run_never_invokes_the_runner_or_mutates_state() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let mut orchestrator = orchestrator(dir.path(), &playlist_dir, vec![]);

        let result = orchestrator.sync(URL, true).await;
        assert_eq!(result, SyncResult::ok(0));
        assert_eq!(orchestrator.runner.calls.load(Ordering::SeqCst), 0);
        assert!(orchestrator.store.get(URL).unwrap().last_sync.is_none());
    }

    #[tokio::test]
    async fn first_sync_then_incremental_reports_only_the_delta() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let mut orchestrator = orchestrator(
            dir.path(),
            &playlist_dir,
            vec![
                StubOutcome::Download {
                    files: 3,
                    output: clean_exit(),
                },
                StubOutcome::Download {
                    files: 1,
                    output: clean_exit(),
                },
            ],
        );

        let first = orchestrator.sync(URL, false).await;
        assert_eq!(first, SyncResult::ok(3));
        assert!(orchestrator.store.get(URL).unwrap().last_sync.is_some());

        let second = orchestrator.sync(URL, false).await;
        assert_eq!(second, SyncResult::ok(1));

        let invocations = orchestrator.runner.invocations.lock().unwrap();
        assert!(invocations[0]
            .args
            .contains(&"--download-archive".to_string()));
        // remove_deleted defaults to off, so the incremental run sticks to
        // archive-only tracking.
        assert!(invocations[1]
            .args
            .contains(&"--download-archive".to_string()));
        assert!(!invocations[1].args.contains(&"--sync".to_string()));
    }

    #[tokio::test]
    async fn opted_in_deletion_mirroring_switches_the_incremental_flag() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let mut store = MappingStore::load_from(dir.path().join("playlists.json")).unwrap();
        store.add(URL, &playlist_dir).unwrap();
        fs::write(archive::marker_path(&playlist_dir), "soundcloud_track_1\n").unwrap();

        let settings = Settings {
            remove_deleted: true,
            ..Settings::default()
        };
        let mut orchestrator = SyncOrchestrator::new(
            store,
            settings,
            StubRunner::new(vec![StubOutcome::Download {
                files: 0,
                output: clean_exit(),
            }]),
        );

        let result = orchestrator.sync(URL, false).await;
        assert!(result.success);
        let invocations = orchestrator.runner.invocations.lock().unwrap();
        assert!(invocations[0].args.contains(&"--sync".to_string()));
    }

    #[tokio::test]
    async fn lock_contention_failure_mentions_the_skip_count() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let output = ProcessOutput {
            code: Some(137),
            stdout: String::new(),
            stderr: "Could not acquire lock on archive\nSkipping track a\nSkipping track b\n"
                .to_string(),
        };
        let mut orchestrator = orchestrator(
            dir.path(),
            &playlist_dir,
            vec![StubOutcome::Download { files: 0, output }],
        );

        let result = orchestrator.sync(URL, false).await;
        assert!(!result.success);
        assert_eq!(result.files_count, 0);
        let message = result.error.unwrap();
        assert!(message.contains("lock contention"));
        assert!(message.contains('2'));
        // A failed sync must leave the mapping untouched.
        assert!(orchestrator.store.get(URL).unwrap().last_sync.is_none());
    }

    #[tokio::test]
    async fn missing_scdl_yields_the_fixed_install_message() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let mut orchestrator = orchestrator(
            dir.path(),
            &playlist_dir,
            vec![StubOutcome::Error(RunnerError::NotInstalled)],
        );

        let result = orchestrator.sync(URL, false).await;
        assert_eq!(
            result.error.unwrap(),
            "scdl not found. Please install scdl first."
        );
    }

    #[tokio::test]
    async fn timeout_is_reported_as_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let mut orchestrator = orchestrator(
            dir.path(),
            &playlist_dir,
            vec![StubOutcome::Error(RunnerError::Timeout { secs: 3600 })],
        );

        let result = orchestrator.sync(URL, false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_detail() {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("mixes");
        let output = ProcessOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "HTTP Error 404: playlist gone\n".to_string(),
        };
        let mut orchestrator = orchestrator(
            dir.path(),
            &playlist_dir,
            vec![StubOutcome::Download { files: 0, output }],
        );

        let result = orchestrator.sync(URL, false).await;
        let message = result.error.unwrap();
        assert!(message.contains("code 1"));
        assert!(message.contains("HTTP Error 404"));
    }

    #[tokio::test]
    async fn sync_all_continues_past_individual_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MappingStore::load_from(dir.path().join("playlists.json")).unwrap();
        let first_url = "https://soundcloud.com/a/sets/one";
        let second_url = "https://soundcloud.com/b/sets/two";
        store.add(first_url, &dir.path().join("one")).unwrap();
        store.add(second_url, &dir.path().join("two")).unwrap();

        let mut orchestrator = SyncOrchestrator::new(
            store,
            Settings::default(),
            StubRunner::new(vec![
                StubOutcome::Error(RunnerError::NotInstalled),
                StubOutcome::Download {
                    files: 2,
                    output: clean_exit(),
                },
            ]),
        );

        let results = orchestrator.sync_all(false).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, first_url);
        assert!(!results[0].1.success);
        assert_eq!(results[1].1, SyncResult::ok(2));
    }
}
