use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::events::{CancelToken, EventSink};
use crate::model::{Disposition, DuplicateGroup, FileFailure, Record, Stage};

/// Duplicate groups keyed by content hash. Iteration follows hash order so
/// output is stable across runs over identical contents.
pub type DuplicateGroups = BTreeMap<String, DuplicateGroup>;

/// Whole-file content digest, hex encoded.
pub trait ContentHasher: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn hash_file(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn algorithm(&self) -> &'static str {
        "blake3"
    }

    fn hash_file(&self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0_u8; 64 * 1024];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Resolves a configured algorithm name. Only algorithms compiled into this
/// build are available.
pub fn hasher_for(algorithm: &str) -> Result<Arc<dyn ContentHasher>> {
    match algorithm.trim().to_ascii_lowercase().as_str() {
        "blake3" => Ok(Arc::new(Blake3Hasher)),
        other => Err(EngineError::HashAlgorithmUnavailable(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeOptions {
    /// Files smaller than this are never considered duplicates.
    pub min_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupeOutcome {
    pub groups: DuplicateGroups,
    pub hashed_files: u64,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

impl DedupeOutcome {
    pub fn duplicate_files(&self) -> u64 {
        self.groups
            .values()
            .map(|group| group.records.len().saturating_sub(1) as u64)
            .sum()
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.groups.values().map(|group| group.wasted_bytes).sum()
    }
}

/// Groups records by size, hashes only size collisions, then groups by hash.
/// Computed hashes are stored on the records; a record that already carries a
/// hash from this scan is not read again.
pub fn find_duplicates(
    records: &mut [Record],
    options: &DedupeOptions,
    hasher: &dyn ContentHasher,
    sink: &mut dyn EventSink,
    cancel: &CancelToken,
) -> DedupeOutcome {
    let mut outcome = DedupeOutcome::default();

    let mut by_size: HashMap<u64, Vec<usize>> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        if record.size_bytes < options.min_size_bytes {
            continue;
        }
        by_size.entry(record.size_bytes).or_default().push(index);
    }

    let mut size_keys: Vec<u64> = by_size
        .iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(size, _)| *size)
        .collect();
    size_keys.sort_unstable_by(|a, b| b.cmp(a));

    let mut by_hash: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    'sizes: for size in size_keys {
        let candidates = by_size.remove(&size).unwrap_or_default();
        for index in candidates {
            if cancel.is_cancelled() {
                sink.log("Duplicate detection cancelled; groups are partial");
                outcome.cancelled = true;
                break 'sizes;
            }

            let record = &mut records[index];
            let hash = if let Some(existing) = record.hash.clone() {
                existing
            } else {
                match hasher.hash_file(&record.path) {
                    Ok(hash) => {
                        outcome.hashed_files += 1;
                        sink.log(&format!("Hashed: {}", record.name));
                        record.hash = Some(hash.clone());
                        hash
                    }
                    Err(err) => {
                        let failure = FileFailure::new(&record.path, Stage::Dedupe, &err);
                        warn!("{failure}");
                        sink.log(&format!("Skipped {}: {}", record.path.display(), err));
                        outcome.failures.push(failure);
                        continue;
                    }
                }
            };
            by_hash.entry(hash).or_default().push(index);
        }
    }

    for (hash, mut members) in by_hash {
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| records[*a].path.cmp(&records[*b].path));
        let size_bytes = records[members[0]].size_bytes;
        let group_records = members
            .iter()
            .map(|index| records[*index].clone())
            .collect::<Vec<_>>();
        let wasted_bytes =
            size_bytes.saturating_mul((group_records.len() as u64).saturating_sub(1));

        outcome.groups.insert(
            hash.clone(),
            DuplicateGroup {
                hash,
                size_bytes,
                records: group_records,
                wasted_bytes,
            },
        );
    }

    info!(
        algorithm = hasher.algorithm(),
        hashed = outcome.hashed_files,
        groups = outcome.groups.len(),
        skipped = outcome.failures.len(),
        "duplicate detection finished"
    );
    outcome
}

/// Marks the first member of every group (by path) as the one to keep and the
/// rest as delete candidates, on both the group copies and the live records.
/// Returns the number of delete candidates.
pub fn resolve_dispositions(records: &mut [Record], groups: &mut DuplicateGroups) -> u64 {
    let positions = records
        .iter()
        .enumerate()
        .map(|(index, record)| (record.path.clone(), index))
        .collect::<HashMap<PathBuf, usize>>();

    let mut delete_candidates = 0_u64;
    for group in groups.values_mut() {
        for (rank, member) in group.records.iter_mut().enumerate() {
            let disposition = if rank == 0 {
                Disposition::Keep
            } else {
                delete_candidates += 1;
                Disposition::DeleteCandidate
            };
            member.disposition = Some(disposition);
            if let Some(index) = positions.get(&member.path) {
                records[*index].disposition = Some(disposition);
            }
        }
    }
    delete_candidates
}
