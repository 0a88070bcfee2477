//! Reversible removal of duplicate candidates.
//!
//! Quarantined files are moved, never deleted, into a recovery directory
//! under the working root. Restoring moves them back and re-admits them as
//! new records. Original timestamps are not preserved: restored records carry
//! the time of the restore.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::events::{CancelToken, EventSink};
use crate::model::{Disposition, FileFailure, QuarantineOutcome, Record, RestoreOutcome, Stage};
use crate::organize::{move_to_unique, split_file_name};

const QUARANTINE_MARKER: &str = "_rec";
const RESTORE_MARKER: &str = "_restored";

/// Moves every `DeleteCandidate` record into `recovery_dir` and drops it from
/// `records`. Name collisions inside the recovery directory get `_rec<n>`.
pub fn quarantine(
    records: &mut Vec<Record>,
    recovery_dir: &Path,
    sink: &mut dyn EventSink,
    cancel: &CancelToken,
) -> QuarantineOutcome {
    let mut outcome = QuarantineOutcome {
        recovery_dir: recovery_dir.to_path_buf(),
        count: 0,
        bytes_freed: 0,
        failures: Vec::new(),
        cancelled: false,
    };

    let candidates = records
        .iter()
        .filter(|record| record.disposition == Some(Disposition::DeleteCandidate))
        .map(|record| (record.path.clone(), record.name.clone(), record.size_bytes))
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        sink.log("No duplicate candidates to quarantine");
        return outcome;
    }

    if let Err(err) = fs::create_dir_all(recovery_dir) {
        let failure = FileFailure::new(recovery_dir, Stage::Quarantine, err);
        warn!("{failure}");
        sink.log(&format!("Cannot create recovery folder: {}", failure.reason));
        outcome.failures.push(failure);
        return outcome;
    }

    let mut quarantined: HashSet<PathBuf> = HashSet::new();
    for (path, name, size) in candidates {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            sink.log("Quarantine cancelled");
            break;
        }
        match move_to_unique(&path, recovery_dir, &name, QUARANTINE_MARKER) {
            Ok(destination) => {
                sink.log(&format!("Quarantined {} to {}", name, destination.display()));
                outcome.count += 1;
                outcome.bytes_freed += size;
                quarantined.insert(path);
            }
            Err(err) => {
                let failure = FileFailure::new(&path, Stage::Quarantine, err);
                warn!("{failure}");
                sink.log(&format!("Failed to quarantine {}: {}", name, failure.reason));
                outcome.failures.push(failure);
            }
        }
    }

    records.retain(|record| !quarantined.contains(&record.path));
    info!(
        count = outcome.count,
        bytes_freed = outcome.bytes_freed,
        failed = outcome.failures.len(),
        "quarantine finished"
    );
    outcome
}

/// Moves every file in `recovery_dir` back into `working_root`, stripping a
/// `_rec<digits>` stem suffix. Collisions get `_restored<n>`. The recovery
/// directory is removed once it is empty.
pub fn restore(
    recovery_dir: &Path,
    working_root: &Path,
    sink: &mut dyn EventSink,
    cancel: &CancelToken,
) -> RestoreOutcome {
    let mut outcome = RestoreOutcome::default();

    let entries = match fs::read_dir(recovery_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            sink.log("Recovery folder does not exist; nothing to restore");
            return outcome;
        }
        Err(err) => {
            let failure = FileFailure::new(recovery_dir, Stage::Restore, err);
            warn!("{failure}");
            outcome.failures.push(failure);
            return outcome;
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) if entry.file_type().map(|t| t.is_file()).unwrap_or(false) => {
                files.push(entry.path())
            }
            Ok(_) => {}
            Err(err) => {
                let failure = FileFailure::new(recovery_dir, Stage::Restore, err);
                warn!("{failure}");
                outcome.failures.push(failure);
            }
        }
    }
    files.sort();

    for path in files {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            sink.log("Restore cancelled");
            break;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let size = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                let failure = FileFailure::new(&path, Stage::Restore, err);
                warn!("{failure}");
                outcome.failures.push(failure);
                continue;
            }
        };

        let original_name = strip_quarantine_suffix(&name);
        match move_to_unique(&path, working_root, &original_name, RESTORE_MARKER) {
            Ok(destination) => {
                sink.log(&format!("Restored {} to {}", name, destination.display()));
                let now = Utc::now();
                outcome.restored.push(Record::new(destination, size, now, now));
                outcome.count += 1;
            }
            Err(err) => {
                let failure = FileFailure::new(&path, Stage::Restore, err);
                warn!("{failure}");
                sink.log(&format!("Failed to restore {}: {}", name, failure.reason));
                outcome.failures.push(failure);
            }
        }
    }

    let is_empty = fs::read_dir(recovery_dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        match fs::remove_dir(recovery_dir) {
            Ok(()) => outcome.recovery_dir_removed = true,
            Err(err) => warn!(
                path = %recovery_dir.display(),
                "could not remove recovery folder: {err}"
            ),
        }
    }

    info!(
        count = outcome.count,
        failed = outcome.failures.len(),
        removed = outcome.recovery_dir_removed,
        "restore finished"
    );
    outcome
}

/// `photo_rec3.jpg` becomes `photo.jpg`; names without the suffix are
/// returned unchanged.
pub fn strip_quarantine_suffix(name: &str) -> String {
    let (stem, extension) = split_file_name(name);
    if let Some(index) = stem.rfind(QUARANTINE_MARKER) {
        let digits = &stem[index + QUARANTINE_MARKER.len()..];
        if index > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return format!("{}{}", &stem[..index], extension);
        }
    }
    name.to_string()
}
