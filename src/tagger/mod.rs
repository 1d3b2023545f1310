use std::fmt;
use std::path::{Path, PathBuf};

use colored::Colorize;
use error_stack::{IntoReport, ResultExt};
use lazy_regex::regex;
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag, TagType};
use walkdir::WalkDir;

use crate::config::AppConfig;

#[derive(Debug)]
pub struct TaggerError;

impl fmt::Display for TaggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Metadata tagging error")
    }
}

impl std::error::Error for TaggerError {}

pub type TaggerResult<T> = error_stack::Result<T, TaggerError>;

/// Writes a track's source URL into its file metadata. Best effort all the
/// way: a failing tagger must never fail a sync.
pub trait SourceTagger: Send + Sync {
    fn tag_file_with_source_url(&self, file_path: &Path, url: &str) -> TaggerResult<()>;
}

/// Tagger backed by lofty, storing the URL in the Composer field so music
/// players that surface composer metadata show where a file came from.
pub struct LoftyTagger;

impl SourceTagger for LoftyTagger {
    fn tag_file_with_source_url(&self, file_path: &Path, url: &str) -> TaggerResult<()> {
        let mut tagged_file = read_from_path(file_path)
            .into_report()
            .attach_printable_lazy(|| format!("Failed to read {}", file_path.display()))
            .change_context(TaggerError)?;

        let mut tag = match tagged_file.primary_tag_mut() {
            Some(existing) => existing.clone(),
            None => Tag::new(TagType::Id3v2),
        };

        tag.remove_key(&ItemKey::Composer);
        tag.insert_text(ItemKey::Composer, url.to_string());

        tag.save_to_path(file_path, WriteOptions::default())
            .into_report()
            .attach_printable_lazy(|| format!("Failed to save tags to {}", file_path.display()))
            .change_context(TaggerError)?;
        Ok(())
    }
}

/// Strips characters that download tools drop from filenames so a track
/// title can be matched against the file it produced.
pub fn clean_title(title: &str) -> String {
    let forbidden = regex!(r#"[<>:"/\\|?*]"#);
    let collapsed = regex!(r"\s+");
    let cleaned = forbidden.replace_all(title, "");
    collapsed.replace_all(cleaned.trim(), " ").to_string()
}

fn audio_files(directory: &Path) -> Vec<PathBuf> {
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
        .map(|entry| entry.into_path())
        .collect()
}

/// Matches reconciled title-to-URL pairs against the audio files in the
/// synced directory by cleaned-title substring, then tags each match.
/// Returns how many files were tagged; individual failures are only logged.
pub fn tag_matched_tracks(
    tagger: &dyn SourceTagger,
    directory: &Path,
    sources: &[(String, String)],
    debug: bool,
) -> usize {
    if sources.is_empty() {
        return 0;
    }

    let mut tagged = 0;
    for file_path in audio_files(directory) {
        let stem = match file_path.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) => stem.to_lowercase(),
            None => continue,
        };
        let matched = sources.iter().find(|(title, _)| {
            let cleaned = clean_title(title).to_lowercase();
            !cleaned.is_empty() && stem.contains(&cleaned)
        });
        if let Some((_, url)) = matched {
            match tagger.tag_file_with_source_url(&file_path, url) {
                Ok(()) => {
                    tagged += 1;
                    if debug {
                        println!(
                            "Tagged {} with {}",
                            file_path.display().to_string().cyan(),
                            url
                        );
                    }
                }
                Err(err) => {
                    if debug {
                        println!(
                            "{} {} ({:?})",
                            "Could not tag".yellow(),
                            file_path.display(),
                            err
                        );
                    }
                }
            }
        }
    }
    tagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    /// Records tag calls instead of touching file metadata.
    struct RecordingTagger {
        calls: Mutex<Vec<(PathBuf, String)>>,
    }

    impl RecordingTagger {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl SourceTagger for RecordingTagger {
        fn tag_file_with_source_url(&self, file_path: &Path, url: &str) -> TaggerResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((file_path.to_path_buf(), url.to_string()));
            Ok(())
        }
    }

    struct FailingTagger;

    impl SourceTagger for FailingTagger {
        fn tag_file_with_source_url(&self, _: &Path, _: &str) -> TaggerResult<()> {
            Err(error_stack::Report::new(TaggerError))
        }
    }

    #[test]
    fn clean_title_strips_filename_hostile_characters() {
        assert_eq!(clean_title("My Mix: Part 1/2?"), "My Mix Part 12");
        assert_eq!(clean_title("  spaced   out  "), "spaced out");
        assert_eq!(clean_title(r#"a<b>c|d"e"#), "abcde");
    }

    #[test]
    fn tags_files_whose_stem_contains_the_cleaned_title() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Artist - My Mix.mp3"), b"x").unwrap();
        fs::write(dir.path().join("Unrelated.mp3"), b"x").unwrap();

        let tagger = RecordingTagger::new();
        let sources = vec![(
            "My Mix".to_string(),
            "https://soundcloud.com/artist/my-mix".to_string(),
        )];
        let tagged = tag_matched_tracks(&tagger, dir.path(), &sources, false);

        assert_eq!(tagged, 1);
        let calls = tagger.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.ends_with("Artist - My Mix.mp3"));
        assert_eq!(calls[0].1, "https://soundcloud.com/artist/my-mix");
    }

    #[test]
    fn tagging_failures_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Artist - My Mix.mp3"), b"x").unwrap();

        let sources = vec![(
            "My Mix".to_string(),
            "https://soundcloud.com/artist/my-mix".to_string(),
        )];
        let tagged = tag_matched_tracks(&FailingTagger, dir.path(), &sources, false);
        assert_eq!(tagged, 0);
    }

    #[test]
    fn no_sources_means_no_work() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        let tagger = RecordingTagger::new();
        assert_eq!(tag_matched_tracks(&tagger, dir.path(), &[], false), 0);
        assert!(tagger.calls.lock().unwrap().is_empty());
    }
}
