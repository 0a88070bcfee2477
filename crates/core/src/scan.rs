use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{EngineError, Result};
use crate::events::{CancelToken, EventSink};
use crate::model::Record;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub include_subfolders: bool,
    pub include_hidden: bool,
    pub max_depth: Option<usize>,
    pub excludes: Vec<String>,
    /// Directory names directly under the root that are never entered,
    /// normally the engine's own output and recovery folders.
    pub reserved_dirs: Vec<String>,
    pub cancel: CancelToken,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include_subfolders: true,
            include_hidden: false,
            max_depth: None,
            excludes: Vec::new(),
            reserved_dirs: Vec::new(),
            cancel: CancelToken::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

/// Walks `options.root` and returns one record per regular file. An
/// unreadable root is fatal; problems below it become warnings.
pub fn scan(options: &ScanOptions, sink: &mut dyn EventSink) -> Result<ScanOutcome> {
    let root = options.root.as_path();
    check_root(root)?;

    let mut outcome = ScanOutcome::default();
    let excludes = ExcludeMatcher::new(&options.excludes, &mut outcome.warnings);

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    walker = match (options.include_subfolders, options.max_depth) {
        (false, _) => walker.max_depth(1),
        (true, Some(depth)) => walker.max_depth(depth.max(1)),
        (true, None) => walker,
    };
    let iter = walker
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || admits(entry, options, &excludes));

    for item in iter {
        if options.cancel.is_cancelled() {
            outcome.cancelled = true;
            outcome
                .warnings
                .push(format!("scan cancelled while walking {}", root.display()));
            sink.log("Scan cancelled");
            break;
        }

        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warn!("walk error under {}: {err}", root.display());
                outcome
                    .warnings
                    .push(format!("walk error under {}: {err}", root.display()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                outcome.warnings.push(format!(
                    "metadata read failed for {}: {err}",
                    entry.path().display()
                ));
                continue;
            }
        };

        let record = Record::from_metadata(entry.path().to_path_buf(), &metadata);
        debug!(path = %record.path.display(), size = record.size_bytes, "scanned");
        sink.log(&format!("Scanned: {}", record.path.display()));
        outcome.records.push(record);
    }

    info!(
        root = %root.display(),
        files = outcome.records.len(),
        warnings = outcome.warnings.len(),
        "scan finished"
    );
    Ok(outcome)
}

fn check_root(root: &Path) -> Result<()> {
    let inaccessible = |source: io::Error| EngineError::RootInaccessible {
        path: root.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(root).map_err(inaccessible)?;
    if !metadata.is_dir() {
        return Err(inaccessible(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a directory",
        )));
    }
    fs::read_dir(root).map_err(inaccessible)?;
    Ok(())
}

fn admits(entry: &DirEntry, options: &ScanOptions, excludes: &ExcludeMatcher) -> bool {
    let name = entry.file_name().to_string_lossy();
    if !options.include_hidden && name.starts_with('.') {
        return false;
    }
    if entry.depth() == 1
        && entry.file_type().is_dir()
        && options.reserved_dirs.iter().any(|reserved| *reserved == name)
    {
        return false;
    }
    let relative = entry
        .path()
        .strip_prefix(&options.root)
        .unwrap_or(entry.path());
    !excludes.is_excluded(entry.path(), relative)
}

struct ExcludeMatcher {
    globset: Option<GlobSet>,
    substrings: Vec<String>,
}

impl ExcludeMatcher {
    fn new(patterns: &[String], warnings: &mut Vec<String>) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut substrings = Vec::new();
        let mut globs = 0;
        for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if is_plain_substring_pattern(pattern) {
                substrings.push(pattern.to_lowercase());
                continue;
            }
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    globs += 1;
                }
                Err(err) => {
                    warnings.push(format!(
                        "invalid exclude glob '{pattern}': {err}; matching it as text"
                    ));
                    substrings.push(pattern.to_lowercase());
                }
            }
        }

        let globset = if globs == 0 {
            None
        } else {
            match builder.build() {
                Ok(set) => Some(set),
                Err(err) => {
                    warnings.push(format!("exclude globs disabled: {err}"));
                    None
                }
            }
        };

        Self {
            globset,
            substrings,
        }
    }

    /// Globs see both the full and the root-relative path; plain text only
    /// the relative one, so the root's own ancestors never match.
    fn is_excluded(&self, path: &Path, relative: &Path) -> bool {
        if self
            .globset
            .as_ref()
            .is_some_and(|globset| globset.is_match(path) || globset.is_match(relative))
        {
            return true;
        }
        if self.substrings.is_empty() {
            return false;
        }
        let lowered = relative.to_string_lossy().to_lowercase();
        self.substrings.iter().any(|pattern| lowered.contains(pattern))
    }
}

fn is_plain_substring_pattern(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|ch| matches!(ch, '*' | '?' | '[' | ']' | '{' | '}'))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::{scan, ExcludeMatcher, ScanOptions};
    use crate::error::EngineError;
    use crate::events::{CancelToken, EventRecorder, NullSink};

    fn tree() -> TempDir {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("a.txt"), "a").expect("write");
        fs::write(root.join(".hidden"), "h").expect("write");
        fs::create_dir_all(root.join("nested")).expect("mkdir");
        fs::write(root.join("nested").join("b.txt"), "bb").expect("write");
        fs::create_dir_all(root.join("Organized").join("Docs")).expect("mkdir");
        fs::write(root.join("Organized").join("Docs").join("c.txt"), "c").expect("write");
        fs::create_dir_all(root.join("build")).expect("mkdir");
        fs::write(root.join("build").join("out.tmp"), "t").expect("write");
        temp
    }

    fn names(options: &ScanOptions) -> Vec<String> {
        let mut names: Vec<String> = scan(options, &mut NullSink)
            .expect("scan")
            .records
            .into_iter()
            .map(|record| record.name)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn skips_hidden_and_reserved_directories() {
        let temp = tree();
        let options = ScanOptions {
            root: temp.path().to_path_buf(),
            reserved_dirs: vec!["Organized".to_string()],
            ..ScanOptions::default()
        };
        assert_eq!(names(&options), vec!["a.txt", "b.txt", "out.tmp"]);

        let with_hidden = ScanOptions {
            include_hidden: true,
            ..options
        };
        assert!(names(&with_hidden).contains(&".hidden".to_string()));
    }

    #[test]
    fn subfolder_toggle_limits_depth() {
        let temp = tree();
        let options = ScanOptions {
            root: temp.path().to_path_buf(),
            include_subfolders: false,
            ..ScanOptions::default()
        };
        assert_eq!(names(&options), vec!["a.txt"]);
    }

    #[test]
    fn exclude_globs_prune_matches() {
        let temp = tree();
        let options = ScanOptions {
            root: temp.path().to_path_buf(),
            excludes: vec!["**/*.tmp".to_string(), "organized".to_string()],
            ..ScanOptions::default()
        };
        assert_eq!(names(&options), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn every_scanned_file_is_logged() {
        let temp = tree();
        let options = ScanOptions {
            root: temp.path().to_path_buf(),
            include_subfolders: false,
            ..ScanOptions::default()
        };
        let mut sink = EventRecorder::new();
        scan(&options, &mut sink).expect("scan");
        let expected = format!("Scanned: {}", temp.path().join("a.txt").display());
        assert!(sink.messages().any(|message| message == expected));
    }

    #[test]
    fn missing_root_is_fatal() {
        let temp = TempDir::new().expect("tempdir");
        let options = ScanOptions {
            root: temp.path().join("missing"),
            ..ScanOptions::default()
        };
        assert!(matches!(
            scan(&options, &mut NullSink),
            Err(EngineError::RootInaccessible { .. })
        ));

        let file = temp.path().join("file.txt");
        fs::write(&file, "x").expect("write");
        let options = ScanOptions {
            root: file,
            ..ScanOptions::default()
        };
        assert!(matches!(
            scan(&options, &mut NullSink),
            Err(EngineError::RootInaccessible { .. })
        ));
    }

    #[test]
    fn cancelled_scan_returns_partial_outcome() {
        let temp = tree();
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = ScanOptions {
            root: temp.path().to_path_buf(),
            cancel,
            ..ScanOptions::default()
        };
        let outcome = scan(&options, &mut NullSink).expect("scan");
        assert!(outcome.cancelled);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn exclude_matcher_matches_glob_and_substring() {
        let mut warnings = Vec::new();
        let matcher = ExcludeMatcher::new(
            &[
                "**/*.tmp".to_string(),
                "[".to_string(),
                "node_modules".to_string(),
            ],
            &mut warnings,
        );

        assert!(matcher.is_excluded(Path::new("/repo/a.tmp"), Path::new("a.tmp")));
        assert!(matcher.is_excluded(
            Path::new("/repo/node_modules/pkg/index.js"),
            Path::new("node_modules/pkg/index.js"),
        ));
        assert!(!matcher.is_excluded(Path::new("/repo/src/main.rs"), Path::new("src/main.rs")));
        assert!(!matcher.is_excluded(
            Path::new("/node_modules/src/main.rs"),
            Path::new("src/main.rs"),
        ));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn text_excludes_ignore_the_root_path() {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path().join("tmp-work");
        fs::create_dir_all(root.join("tmp-cache")).expect("mkdir");
        fs::write(root.join("keep.txt"), "k").expect("write");
        fs::write(root.join("tmp-cache").join("drop.txt"), "d").expect("write");

        let options = ScanOptions {
            root,
            excludes: vec!["tmp".to_string()],
            ..ScanOptions::default()
        };
        let outcome = scan(&options, &mut NullSink).expect("scan");
        let names: Vec<&str> = outcome.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["keep.txt"]);
    }
}
