use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discovered file plus the state filled in by the processing stages.
///
/// `hash` is only set by the deduplicator, `category` only by the classifier
/// and `disposition` only when a duplicate group is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub extension: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub disposition: Option<Disposition>,
}

impl Record {
    pub fn new(
        path: PathBuf,
        size_bytes: u64,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = extension_of(&name);
        Self {
            path,
            name,
            size_bytes,
            extension,
            created,
            modified,
            hash: None,
            category: None,
            disposition: None,
        }
    }

    /// Builds a record from filesystem metadata. Platforms without a birth
    /// time report the modification time as creation time.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(path.to_path_buf(), &metadata))
    }

    pub(crate) fn from_metadata(path: PathBuf, metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let created = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);
        Self::new(path, metadata.len(), created, modified)
    }

    /// Lower-cased name of the immediate parent directory, if any.
    pub fn parent_name(&self) -> Option<String> {
        self.path
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().to_lowercase())
    }
}

/// Lower-cased text after the last dot. A leading dot does not start an
/// extension, so `.bashrc` has none.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(index) if index > 0 => name[index + 1..].to_lowercase(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Keep,
    DeleteCandidate,
}

impl Disposition {
    pub fn label(self) -> &'static str {
        match self {
            Disposition::Keep => "Keep (Original)",
            Disposition::DeleteCandidate => "Delete (Duplicate)",
        }
    }
}

/// Records sharing one content hash. Always holds at least two records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub hash: String,
    pub size_bytes: u64,
    pub records: Vec<Record>,
    pub wasted_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Created,
    Modified,
    Extension,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortAlgorithm {
    Bubble,
    Selection,
    Insertion,
    #[default]
    Merge,
    Quick,
    Heap,
    Counting,
    Radix,
    Bucket,
}

impl SortAlgorithm {
    pub const ALL: [SortAlgorithm; 9] = [
        SortAlgorithm::Bubble,
        SortAlgorithm::Selection,
        SortAlgorithm::Insertion,
        SortAlgorithm::Merge,
        SortAlgorithm::Quick,
        SortAlgorithm::Heap,
        SortAlgorithm::Counting,
        SortAlgorithm::Radix,
        SortAlgorithm::Bucket,
    ];

    pub fn is_stable(self) -> bool {
        matches!(self, SortAlgorithm::Merge | SortAlgorithm::Insertion)
    }

    pub fn label(self) -> &'static str {
        match self {
            SortAlgorithm::Bubble => "Bubble Sort",
            SortAlgorithm::Selection => "Selection Sort",
            SortAlgorithm::Insertion => "Insertion Sort",
            SortAlgorithm::Merge => "Merge Sort",
            SortAlgorithm::Quick => "Quick Sort",
            SortAlgorithm::Heap => "Heap Sort",
            SortAlgorithm::Counting => "Counting Sort",
            SortAlgorithm::Radix => "Radix Sort",
            SortAlgorithm::Bucket => "Bucket Sort",
        }
    }
}

/// Which classification stage produced a category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStage {
    Name,
    Context,
    Extension,
}

impl ClassificationStage {
    pub fn label(self) -> &'static str {
        match self {
            ClassificationStage::Name => "Name-based",
            ClassificationStage::Context => "Context-based",
            ClassificationStage::Extension => "Extension-based",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dedupe,
    Organize,
    Quarantine,
    Restore,
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Dedupe => "dedupe",
            Stage::Organize => "organize",
            Stage::Quarantine => "quarantine",
            Stage::Restore => "restore",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-file problem that was logged and skipped without aborting the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: Stage,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, stage: Stage, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {}: {}",
            self.stage,
            self.path.display(),
            self.reason
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OrganizeOutcome {
    pub moved: Vec<MovedFile>,
    pub failures: Vec<FileFailure>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarantineOutcome {
    pub recovery_dir: PathBuf,
    pub count: u64,
    pub bytes_freed: u64,
    pub failures: Vec<FileFailure>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RestoreOutcome {
    pub count: u64,
    pub restored: Vec<Record>,
    pub failures: Vec<FileFailure>,
    pub recovery_dir_removed: bool,
    #[serde(default)]
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::{extension_of, Record};

    #[test]
    fn extension_ignores_leading_dot_and_lowercases() {
        assert_eq!(extension_of("Report.PDF"), "pdf");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of(".bashrc"), "");
        assert_eq!(extension_of("Makefile"), "");
    }

    #[test]
    fn record_derives_name_and_parent() {
        let now = Utc::now();
        let record = Record::new(PathBuf::from("/home/me/Downloads/Notes.TXT"), 3, now, now);
        assert_eq!(record.name, "Notes.TXT");
        assert_eq!(record.extension, "txt");
        assert_eq!(record.parent_name().as_deref(), Some("downloads"));
        assert!(record.category.is_none());
    }
}
