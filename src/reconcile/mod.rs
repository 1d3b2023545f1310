use std::path::Path;

use lazy_regex::regex;
use walkdir::WalkDir;

use crate::config::AppConfig;

const LOCK_SIGNATURE: &str = "Could not acquire lock";
const SKIP_SIGNATURE: &str = "Skipping";

/// Structured finding extracted from raw scdl output. Diagnostics are a
/// side channel: they never influence the downloaded-files count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// scdl could not lock its download archive and skipped files.
    LockContention { skipped: usize },
    /// A track permalink seen in the debug output, usable for tagging.
    TrackSource { title: String, url: String },
}

impl Diagnostic {
    pub fn message(&self) -> String {
        match self {
            Diagnostic::LockContention { skipped } => format!(
                "{} files were skipped due to file locking issues. \
                 Clear the download archive with 'scdl-sync clean' and retry.",
                skipped
            ),
            Diagnostic::TrackSource { title, url } => {
                format!("Found track: {} -> {}", title, url)
            }
        }
    }
}

/// Result of reconciling one finished run against the target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub files_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl Reconciliation {
    pub fn lock_contention(&self) -> Option<usize> {
        self.diagnostics.iter().find_map(|diagnostic| match diagnostic {
            Diagnostic::LockContention { skipped } => Some(*skipped),
            _ => None,
        })
    }

    pub fn track_sources(&self) -> Vec<(&str, &str)> {
        self.diagnostics
            .iter()
            .filter_map(|diagnostic| match diagnostic {
                Diagnostic::TrackSource { title, url } => {
                    Some((title.as_str(), url.as_str()))
                }
                _ => None,
            })
            .collect()
    }
}

/// Counts audio files under `directory`, recursively, by extension
/// allow-list. Unreadable entries are skipped rather than failing the scan.
pub fn count_audio_files(directory: &Path) -> usize {
    WalkDir::new(directory)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|extension| extension.to_str())
                .map(|extension| {
                    let extension = extension.to_lowercase();
                    AppConfig::AUDIO_EXTENSIONS
                        .iter()
                        .any(|allowed| *allowed == extension)
                })
                .unwrap_or(false)
        })
        .count()
}

/// Turns raw output plus a before/after file count into a structured result.
/// The on-disk delta is authoritative; the output text only contributes
/// diagnostics and never fails the reconciliation.
pub fn reconcile(raw_output: &str, directory: &Path, files_before: usize) -> Reconciliation {
    let files_after = count_audio_files(directory);
    let mut diagnostics = Vec::new();

    if let Some(skipped) = detect_lock_contention(raw_output) {
        diagnostics.push(Diagnostic::LockContention { skipped });
    }
    for (title, url) in extract_track_sources(raw_output) {
        diagnostics.push(Diagnostic::TrackSource { title, url });
    }

    Reconciliation {
        files_count: files_after.saturating_sub(files_before),
        diagnostics,
    }
}

/// Lock contention needs both signatures: the lock failure itself and at
/// least one skipped file. Returns the number of skip occurrences.
pub fn detect_lock_contention(raw_output: &str) -> Option<usize> {
    if !raw_output.contains(LOCK_SIGNATURE) {
        return None;
    }
    let skipped = raw_output.matches(SKIP_SIGNATURE).count();
    if skipped == 0 {
        return None;
    }
    Some(skipped)
}

/// Pairs `title='…'` and `permalink_url='…'` occurrences from scdl debug
/// output into a title-to-URL table. Best effort: unmatched or malformed
/// lines simply contribute nothing.
pub fn extract_track_sources(raw_output: &str) -> Vec<(String, String)> {
    let url_pattern = regex!(r"permalink_url='([^']*soundcloud\.com/[^']*)'");
    let title_pattern = regex!(r"title='([^']*?)'");

    let urls: Vec<&str> = url_pattern
        .captures_iter(raw_output)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
        .collect();
    let titles: Vec<&str> = title_pattern
        .captures_iter(raw_output)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
        .collect();

    urls.into_iter()
        .zip(titles)
        .map(|(url, title)| (title.to_string(), url.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn counts_audio_files_recursively_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("b.FLAC"));
        touch(&dir.path().join("nested/c.opus"));
        touch(&dir.path().join("nested/notes.txt"));
        touch(&dir.path().join("cover.jpg"));

        assert_eq!(count_audio_files(dir.path()), 3);
    }

    #[test]
    fn file_delta_is_authoritative_over_output_text() {
        let dir = tempfile::tempdir().unwrap();
        for index in 0..8 {
            touch(&dir.path().join(format!("track{}.mp3", index)));
        }

        let result = reconcile("Downloaded 100 tracks!!", dir.path(), 5);
        assert_eq!(result.files_count, 3);
    }

    #[test]
    fn delta_never_goes_negative() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        let result = reconcile("", dir.path(), 5);
        assert_eq!(result.files_count, 0);
    }

    #[test]
    fn lock_contention_needs_both_signatures() {
        let both = "Could not acquire lock on archive\nSkipping track one\nSkipping track two\n";
        assert_eq!(detect_lock_contention(both), Some(2));

        let lock_only = "Could not acquire lock on archive\n";
        assert_eq!(detect_lock_contention(lock_only), None);

        let skip_only = "Skipping track one\n";
        assert_eq!(detect_lock_contention(skip_only), None);
    }

    #[test]
    fn extracts_title_url_pairs_from_debug_output() {
        let output = "\
DEBUG: track {title='First Mix', permalink_url='https://soundcloud.com/artist/first-mix'}
DEBUG: track {title='Second Mix', permalink_url='https://soundcloud.com/artist/second-mix'}
";
        let sources = extract_track_sources(output);
        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0],
            (
                "First Mix".to_string(),
                "https://soundcloud.com/artist/first-mix".to_string()
            )
        );
    }

    #[test]
    fn ignores_permalinks_outside_soundcloud() {
        let output = "title='Elsewhere', permalink_url='https://example.com/track'";
        assert!(extract_track_sources(output).is_empty());
    }

    #[test]
    fn malformed_output_yields_no_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let result = reconcile("%%% total garbage \u{1F600} '''' ", dir.path(), 0);
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.files_count, 0);
    }

    #[test]
    fn reconciliation_exposes_lock_contention_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let output = "\
Could not acquire lock
Skipping one
title='A', permalink_url='https://soundcloud.com/artist/a'
";
        let result = reconcile(output, dir.path(), 0);
        assert_eq!(result.lock_contention(), Some(1));
        assert_eq!(result.track_sources().len(), 1);
    }
}
