use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::events::{CancelToken, EventSink};
use crate::model::{FileFailure, MovedFile, OrganizeOutcome, Record, Stage};

/// Moves every record into `<output_root>/<category>`, creating the category
/// directories as needed. Existing files are never overwritten: a taken name
/// gets `_<n>` inserted before its extension.
///
/// Successfully moved records have their `path` updated in place.
pub fn organize(
    records: &mut [Record],
    output_root: &Path,
    sink: &mut dyn EventSink,
    cancel: &CancelToken,
) -> OrganizeOutcome {
    let mut outcome = OrganizeOutcome::default();

    for record in records.iter_mut() {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            sink.log("Organizing cancelled");
            break;
        }

        let Some(category) = record.category.clone() else {
            let failure =
                FileFailure::new(&record.path, Stage::Organize, "record has no category");
            warn!("{failure}");
            sink.log(&format!("Skipped {}: no category", record.name));
            outcome.failures.push(failure);
            continue;
        };
        let target_dir = match category_dir(output_root, &category) {
            Some(dir) => dir,
            None => {
                let failure = FileFailure::new(
                    &record.path,
                    Stage::Organize,
                    format!("category `{category}` is not a relative path"),
                );
                warn!("{failure}");
                outcome.failures.push(failure);
                continue;
            }
        };

        if let Err(err) = fs::create_dir_all(&target_dir) {
            let failure = FileFailure::new(&target_dir, Stage::Organize, err);
            warn!("{failure}");
            sink.log(&format!("Failed to create {}: {}", target_dir.display(), failure.reason));
            outcome.failures.push(failure);
            continue;
        }

        match move_to_unique(&record.path, &target_dir, &record.name, "_") {
            Ok(destination) => {
                debug!(from = %record.path.display(), to = %destination.display(), "moved");
                sink.log(&format!("Moved {} to {}", record.name, category));
                outcome.moved.push(MovedFile {
                    from: record.path.clone(),
                    to: destination.clone(),
                    category,
                });
                record.path = destination;
            }
            Err(err) => {
                let failure = FileFailure::new(&record.path, Stage::Organize, err);
                warn!("{failure}");
                sink.log(&format!("Failed to move {}: {}", record.name, failure.reason));
                outcome.failures.push(failure);
            }
        }
    }

    info!(
        moved = outcome.moved.len(),
        failed = outcome.failures.len(),
        "organize finished"
    );
    outcome
}

/// Maps a `group/name` category onto nested directories under `root`.
/// Categories that would escape `root` are refused.
fn category_dir(root: &Path, category: &str) -> Option<PathBuf> {
    let mut dir = root.to_path_buf();
    let mut depth = 0;
    for part in category.split('/') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => dir.push(part),
            _ => return None,
        }
        depth += 1;
    }
    (depth > 0).then_some(dir)
}

/// Splits a file name into stem and extension (with its dot). A leading dot
/// belongs to the stem.
pub(crate) fn split_file_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

/// `name` for the first attempt, `stem<marker><attempt>.ext` after that.
pub(crate) fn candidate_name(name: &str, marker: &str, attempt: u64) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let (stem, extension) = split_file_name(name);
    format!("{stem}{marker}{attempt}{extension}")
}

/// Moves `from` into `dir` under the first free [`candidate_name`]. Each name
/// is claimed atomically, so a file that appears concurrently is skipped
/// rather than replaced.
pub(crate) fn move_to_unique(
    from: &Path,
    dir: &Path,
    name: &str,
    marker: &str,
) -> io::Result<PathBuf> {
    let mut attempt: u64 = 0;
    loop {
        let candidate = dir.join(candidate_name(name, marker, attempt));
        match claim_move(from, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}

/// Links `from` at `to`, then unlinks `from`. Where a hard link is impossible
/// (another filesystem, no link support) the bytes are copied into a file
/// opened with `create_new`. Fails with `AlreadyExists` when `to` is taken.
fn claim_move(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Err(err),
        Err(_) => copy_into_new(from, to)?,
    }
    if let Err(err) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(err);
    }
    Ok(())
}

fn copy_into_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = File::open(from)?;
    let mut target = OpenOptions::new().write(true).create_new(true).open(to)?;
    if let Err(err) = io::copy(&mut source, &mut target).and_then(|_| target.sync_all()) {
        drop(target);
        let _ = fs::remove_file(to);
        return Err(err);
    }
    if let Ok(metadata) = source.metadata() {
        let _ = fs::set_permissions(to, metadata.permissions());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::{candidate_name, category_dir, move_to_unique, organize, split_file_name};
    use crate::events::{CancelToken, EventRecorder};
    use crate::model::{Record, Stage};

    fn record_in(dir: &Path, name: &str, body: &str, category: Option<&str>) -> Record {
        let path = dir.join(name);
        fs::write(&path, body).expect("write fixture");
        let mut record = Record::from_path(&path).expect("record");
        record.category = category.map(str::to_string);
        record
    }

    #[test]
    fn moves_into_nested_category_directories() {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("in");
        let output = temp.path().join("out");
        fs::create_dir_all(&source).expect("source dir");

        let mut records = vec![record_in(
            &source,
            "exam.pdf",
            "x",
            Some("Academic/Exams and Quizzes"),
        )];
        let mut sink = EventRecorder::new();
        let outcome = organize(&mut records, &output, &mut sink, &CancelToken::new());

        let expected = output.join("Academic").join("Exams and Quizzes").join("exam.pdf");
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.moved.len(), 1);
        assert!(expected.is_file());
        assert!(!source.join("exam.pdf").exists());
        assert_eq!(records[0].path, expected);
        assert!(sink.messages().any(|m| m == "Moved exam.pdf to Academic/Exams and Quizzes"));
    }

    #[test]
    fn never_overwrites_existing_files() {
        let temp = TempDir::new().expect("tempdir");
        let output = temp.path().join("out");
        let target = output.join("Docs");
        fs::create_dir_all(&target).expect("target dir");
        fs::write(target.join("notes.txt"), "old").expect("existing");
        fs::write(target.join("notes_1.txt"), "older").expect("existing");

        let source = temp.path().join("in");
        fs::create_dir_all(&source).expect("source dir");
        let mut records = vec![record_in(&source, "notes.txt", "new", Some("Docs"))];
        let outcome = organize(
            &mut records,
            &output,
            &mut EventRecorder::new(),
            &CancelToken::new(),
        );

        assert_eq!(outcome.moved[0].to, target.join("notes_2.txt"));
        assert_eq!(fs::read_to_string(target.join("notes.txt")).expect("read"), "old");
        assert_eq!(fs::read_to_string(target.join("notes_1.txt")).expect("read"), "older");
        assert_eq!(fs::read_to_string(target.join("notes_2.txt")).expect("read"), "new");
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let temp = TempDir::new().expect("tempdir");
        let output = temp.path().join("out");
        let mut records = vec![
            record_in(temp.path(), "loose.bin", "a", None),
            record_in(temp.path(), "kept.txt", "b", Some("Docs")),
        ];
        let mut gone = record_in(temp.path(), "gone.txt", "c", Some("Docs"));
        fs::remove_file(&gone.path).expect("remove");
        gone.name = "gone.txt".to_string();
        records.push(gone);

        let outcome = organize(
            &mut records,
            &output,
            &mut EventRecorder::new(),
            &CancelToken::new(),
        );

        assert_eq!(outcome.moved.len(), 1);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().all(|f| f.stage == Stage::Organize));
        assert!(output.join("Docs").join("kept.txt").is_file());
    }

    #[test]
    fn cancellation_stops_before_moving() {
        let temp = TempDir::new().expect("tempdir");
        let mut records = vec![record_in(temp.path(), "a.txt", "a", Some("Docs"))];
        let cancel = CancelToken::new();
        cancel.cancel();

        let output = temp.path().join("out");
        let outcome = organize(&mut records, &output, &mut EventRecorder::new(), &cancel);
        assert!(outcome.cancelled);
        assert!(outcome.moved.is_empty());
        assert!(temp.path().join("a.txt").is_file());
    }

    #[test]
    fn collision_names_keep_extension_last() {
        assert_eq!(split_file_name("report.final.pdf"), ("report.final", ".pdf"));
        assert_eq!(split_file_name(".env"), (".env", ""));
        assert_eq!(split_file_name("README"), ("README", ""));

        assert_eq!(candidate_name(".env", "_rec", 0), ".env");
        assert_eq!(candidate_name(".env", "_rec", 1), ".env_rec1");
        assert_eq!(candidate_name("a.tar.gz", "_", 3), "a.tar_3.gz");
    }

    #[test]
    fn claimed_names_are_skipped_without_touching_them() {
        let temp = TempDir::new().expect("tempdir");
        let target = temp.path().join("target");
        fs::create_dir_all(&target).expect("target dir");
        fs::write(target.join("photo.jpg"), "first").expect("existing");
        fs::write(target.join("photo_1.jpg"), "second").expect("existing");
        let source = temp.path().join("photo.jpg");
        fs::write(&source, "third").expect("source");

        let destination = move_to_unique(&source, &target, "photo.jpg", "_").expect("moved");

        assert_eq!(destination, target.join("photo_2.jpg"));
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(target.join("photo.jpg")).expect("read"), "first");
        assert_eq!(fs::read_to_string(target.join("photo_1.jpg")).expect("read"), "second");
        assert_eq!(fs::read_to_string(destination).expect("read"), "third");
    }

    #[test]
    fn missing_source_leaves_no_destination_behind() {
        let temp = TempDir::new().expect("tempdir");
        let err = move_to_unique(&temp.path().join("absent.txt"), temp.path(), "copy.txt", "_")
            .expect_err("missing source");
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(!temp.path().join("copy.txt").exists());
    }

    #[test]
    fn category_paths_cannot_escape_root() {
        let root = Path::new("/out");
        assert_eq!(
            category_dir(root, "Media/Images"),
            Some(root.join("Media").join("Images"))
        );
        assert_eq!(category_dir(root, "../etc"), None);
        assert_eq!(category_dir(root, ""), None);
    }
}
