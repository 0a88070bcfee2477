pub mod classify;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod events;
pub mod filter;
pub mod model;
pub mod organize;
pub mod pipeline;
pub mod quarantine;
pub mod report;
pub mod scan;
pub mod sort;

pub use classify::{
    tokenize, Classification, Classifier, ClassifyOptions, ClassifySummary, Taxonomy,
    TAXONOMY_VERSION,
};
pub use config::EngineConfig;
pub use dedupe::{
    find_duplicates, hasher_for, resolve_dispositions, Blake3Hasher, ContentHasher,
    DedupeOptions, DedupeOutcome, DuplicateGroups,
};
pub use error::{EngineError, Result};
pub use events::{
    CallbackSink, CancelToken, ChannelSink, EngineEvent, EventKind, EventRecorder, EventSink,
    NullSink, TracingSink,
};
pub use filter::{category_counts, search, select_scope, RecordFilter, Scope, SizeRange};
pub use model::{
    ClassificationStage, Disposition, DuplicateGroup, FileFailure, MovedFile, OrganizeOutcome,
    QuarantineOutcome, Record, RestoreOutcome, SortAlgorithm, SortDirection, SortKey, Stage,
};
pub use organize::organize;
pub use pipeline::{Engine, PipelineOptions, PipelineOutput, SortRequest};
pub use quarantine::{quarantine, restore, strip_quarantine_suffix};
pub use report::{
    human_bytes, render_duplicate_listing, render_summary_text, write_summary_report,
    SummaryReport,
};
pub use scan::{scan, ScanOptions, ScanOutcome};
pub use sort::sort_records;
