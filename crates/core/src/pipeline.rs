use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classify::{Classifier, ClassifyOptions, ClassifySummary, Taxonomy};
use crate::config::EngineConfig;
use crate::dedupe::{
    find_duplicates, hasher_for, resolve_dispositions, ContentHasher, DedupeOptions,
    DedupeOutcome, DuplicateGroups,
};
use crate::error::{EngineError, Result};
use crate::events::{CancelToken, EventSink};
use crate::model::{
    FileFailure, OrganizeOutcome, QuarantineOutcome, Record, RestoreOutcome, SortAlgorithm,
    SortDirection, SortKey,
};
use crate::organize::organize;
use crate::quarantine::{quarantine, restore};
use crate::report::{write_summary_report, SummaryReport};
use crate::scan::{scan, ScanOptions, ScanOutcome};
use crate::sort::sort_records;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortRequest {
    pub key: SortKey,
    pub direction: SortDirection,
    #[serde(default)]
    pub algorithm: Option<SortAlgorithm>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub root: PathBuf,
    pub include_subfolders: bool,
    pub include_hidden: bool,
    pub max_depth: Option<usize>,
    pub excludes: Vec<String>,
    /// `None` skips duplicate detection.
    pub dedupe: Option<DedupeOptions>,
    /// `None` skips keyword and context classification; records still get
    /// their extension category.
    pub classify: Option<ClassifyOptions>,
    pub sort: Option<SortRequest>,
}

impl PipelineOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_subfolders: true,
            include_hidden: false,
            max_depth: None,
            excludes: Vec::new(),
            dedupe: Some(DedupeOptions::default()),
            classify: Some(ClassifyOptions::default()),
            sort: Some(SortRequest::default()),
        }
    }
}

/// Everything a preview needs: the classified, sorted records and the
/// resolved duplicate groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub root: PathBuf,
    pub records: Vec<Record>,
    pub duplicates: DuplicateGroups,
    pub delete_candidates: u64,
    pub classification: Option<ClassifySummary>,
    pub sort_algorithm: Option<SortAlgorithm>,
    pub warnings: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub elapsed: Duration,
}

impl PipelineOutput {
    pub fn summary(&self, space_recovered_bytes: u64) -> SummaryReport {
        SummaryReport {
            files_processed: self.records.len(),
            duplicates_found: self.delete_candidates as usize,
            space_recovered_bytes,
            elapsed: self.elapsed,
        }
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.duplicates.values().map(|group| group.wasted_bytes).sum()
    }
}

/// Owns the validated configuration, the content hasher and the compiled
/// taxonomy. Construction fails fast on an unknown hash algorithm or a bad
/// taxonomy file.
pub struct Engine {
    config: EngineConfig,
    hasher: Arc<dyn ContentHasher>,
    classifier: Classifier,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate(None)?;
        let hasher = hasher_for(&config.hash_algorithm)?;
        let classifier = match &config.taxonomy_path {
            Some(path) => Classifier::new(&Taxonomy::load(path)?)?,
            None => Classifier::builtin(),
        };
        info!(
            hash = hasher.algorithm(),
            taxonomy = classifier.taxonomy_version(),
            "engine ready"
        );
        Ok(Self {
            config,
            hasher,
            classifier,
        })
    }

    pub fn hash_algorithm(&self) -> &'static str {
        self.hasher.algorithm()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.config.output_dir_name)
    }

    pub fn recovery_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.config.recovery_dir_name)
    }

    /// Scan options for `root` with the engine's own folders reserved.
    pub fn scan_options(&self, root: &Path) -> ScanOptions {
        ScanOptions {
            root: root.to_path_buf(),
            reserved_dirs: self.config.reserved_dir_names(),
            ..ScanOptions::default()
        }
    }

    /// Classification defaults with the configured recent-files window.
    pub fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            recent_window_days: self.config.recent_window_days,
            ..ClassifyOptions::default()
        }
    }

    pub fn scan(&self, options: &ScanOptions, sink: &mut dyn EventSink) -> Result<ScanOutcome> {
        scan(options, sink)
    }

    /// Finds duplicate groups and resolves each into keep and
    /// delete-candidate records.
    pub fn detect_duplicates(
        &self,
        records: &mut [Record],
        options: &DedupeOptions,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> DedupeOutcome {
        let mut outcome = find_duplicates(records, options, self.hasher.as_ref(), sink, cancel);
        let candidates = resolve_dispositions(records, &mut outcome.groups);
        sink.log(&format!(
            "Found {} duplicate groups ({} files to review)",
            outcome.groups.len(),
            candidates
        ));
        outcome
    }

    pub fn classify(
        &self,
        records: &mut [Record],
        options: &ClassifyOptions,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> ClassifySummary {
        self.classifier
            .classify_records(records, options, sink, cancel)
    }

    /// Gives every still uncategorized record its extension category.
    pub fn assign_extension_categories(&self, records: &mut [Record]) -> usize {
        let extension_only = ClassifyOptions {
            enable_name_stage: false,
            enable_context_stage: false,
            ..self.classify_options()
        };
        let now = Utc::now();
        let mut assigned = 0;
        for record in records.iter_mut().filter(|record| record.category.is_none()) {
            record.category = Some(self.classifier.classify(record, &extension_only, now).category);
            assigned += 1;
        }
        assigned
    }

    pub fn sort(
        &self,
        records: &mut Vec<Record>,
        request: &SortRequest,
        sink: &mut dyn EventSink,
    ) -> SortAlgorithm {
        let used = sort_records(records, request.key, request.direction, request.algorithm);
        sink.log(&format!(
            "Sorted {} files by {:?} ({:?}) using {}",
            records.len(),
            request.key,
            request.direction,
            used.label()
        ));
        used
    }

    pub fn organize(
        &self,
        records: &mut [Record],
        output_root: &Path,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> OrganizeOutcome {
        organize(records, output_root, sink, cancel)
    }

    pub fn quarantine(
        &self,
        records: &mut Vec<Record>,
        root: &Path,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> QuarantineOutcome {
        quarantine(records, &self.recovery_dir(root), sink, cancel)
    }

    pub fn restore(
        &self,
        root: &Path,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> RestoreOutcome {
        restore(&self.recovery_dir(root), root, sink, cancel)
    }

    pub fn write_report(&self, report: &SummaryReport, root: &Path) -> Result<PathBuf> {
        write_summary_report(report, root, &self.config.report_file_name)
    }

    /// scan, then the enabled stages among dedupe, classify and sort.
    /// Cancellation between stages aborts with [`EngineError::Cancelled`].
    pub fn run_pipeline(
        &self,
        options: &PipelineOptions,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<PipelineOutput> {
        let started = Instant::now();

        sink.progress("Scanning directory...", 0.1);
        let scan_options = ScanOptions {
            include_subfolders: options.include_subfolders,
            include_hidden: options.include_hidden,
            max_depth: options.max_depth,
            excludes: options.excludes.clone(),
            cancel: cancel.clone(),
            ..self.scan_options(&options.root)
        };
        let scanned = self.scan(&scan_options, sink)?;
        ensure_not_cancelled(cancel)?;
        let mut records = scanned.records;
        let warnings = scanned.warnings;
        let mut failures = Vec::new();

        let mut duplicates = DuplicateGroups::new();
        let mut delete_candidates = 0;
        if let Some(dedupe) = &options.dedupe {
            sink.progress("Detecting duplicates...", 0.3);
            let outcome = self.detect_duplicates(&mut records, dedupe, sink, cancel);
            ensure_not_cancelled(cancel)?;
            delete_candidates = outcome.duplicate_files();
            failures.extend(outcome.failures);
            duplicates = outcome.groups;
        }

        let mut classification = None;
        if let Some(classify) = &options.classify {
            sink.progress("Classifying files...", 0.5);
            classification = Some(self.classify(&mut records, classify, sink, cancel));
            ensure_not_cancelled(cancel)?;
        }
        self.assign_extension_categories(&mut records);

        let mut sort_algorithm = None;
        if let Some(request) = &options.sort {
            sink.progress("Sorting files...", 0.7);
            sort_algorithm = Some(self.sort(&mut records, request, sink));
            ensure_not_cancelled(cancel)?;
        }

        sink.progress("Preview ready. Review and confirm.", 1.0);
        let elapsed = started.elapsed();
        info!(
            files = records.len(),
            duplicate_groups = duplicates.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            root: options.root.clone(),
            records,
            duplicates,
            delete_candidates,
            classification,
            sort_algorithm,
            warnings,
            failures,
            elapsed,
        })
    }
}

fn ensure_not_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}
