use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use file_organizer_core::{
    category_counts, human_bytes, render_duplicate_listing, search, select_scope, CancelToken,
    ClassifyOptions, DedupeOptions, Engine, EngineConfig, PipelineOptions, PipelineOutput, Record,
    RecordFilter, Scope, SizeRange, SortAlgorithm, SortDirection, SortKey, SortRequest,
    TracingSink,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "file-organizer",
    version,
    about = "Classify, deduplicate and organize the files under a directory."
)]
struct Cli {
    /// Engine configuration file (JSON).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan, classify and sort without touching any file.
    Preview(PreviewArgs),
    /// Move every scanned file into its category folder.
    Organize(OrganizeArgs),
    /// List duplicate groups and optionally quarantine the extra copies.
    Duplicates(DuplicatesArgs),
    /// Move quarantined files back into the root.
    Restore(RestoreArgs),
    /// Explain how individual files would be classified.
    Classify(ClassifyArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliSortKey {
    Name,
    Size,
    Created,
    Modified,
    Extension,
}

impl From<CliSortKey> for SortKey {
    fn from(value: CliSortKey) -> Self {
        match value {
            CliSortKey::Name => SortKey::Name,
            CliSortKey::Size => SortKey::Size,
            CliSortKey::Created => SortKey::Created,
            CliSortKey::Modified => SortKey::Modified,
            CliSortKey::Extension => SortKey::Extension,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliDirection {
    #[value(alias = "asc")]
    Ascending,
    #[value(alias = "desc")]
    Descending,
}

impl From<CliDirection> for SortDirection {
    fn from(value: CliDirection) -> Self {
        match value {
            CliDirection::Ascending => SortDirection::Ascending,
            CliDirection::Descending => SortDirection::Descending,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliAlgorithm {
    Bubble,
    Selection,
    Insertion,
    Merge,
    Quick,
    Heap,
    Counting,
    Radix,
    Bucket,
}

impl From<CliAlgorithm> for SortAlgorithm {
    fn from(value: CliAlgorithm) -> Self {
        match value {
            CliAlgorithm::Bubble => SortAlgorithm::Bubble,
            CliAlgorithm::Selection => SortAlgorithm::Selection,
            CliAlgorithm::Insertion => SortAlgorithm::Insertion,
            CliAlgorithm::Merge => SortAlgorithm::Merge,
            CliAlgorithm::Quick => SortAlgorithm::Quick,
            CliAlgorithm::Heap => SortAlgorithm::Heap,
            CliAlgorithm::Counting => SortAlgorithm::Counting,
            CliAlgorithm::Radix => SortAlgorithm::Radix,
            CliAlgorithm::Bucket => SortAlgorithm::Bucket,
        }
    }
}

#[derive(Debug, Args)]
struct PipelineArgs {
    /// Directory to work on.
    #[arg(long, value_name = "DIR")]
    root: PathBuf,

    /// Only look at files directly inside the root.
    #[arg(long)]
    no_subfolders: bool,

    /// Include dot-files and dot-directories.
    #[arg(long)]
    include_hidden: bool,

    /// Maximum traversal depth (root is depth 0).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Exclude glob patterns (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1.., action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Skip duplicate detection.
    #[arg(long)]
    no_dedupe: bool,

    /// Ignore files smaller than this during duplicate detection.
    #[arg(long, default_value_t = 0, value_name = "BYTES")]
    dedupe_min_size: u64,

    /// Skip file-name keyword classification.
    #[arg(long)]
    no_name_stage: bool,

    /// Skip folder and recency classification.
    #[arg(long)]
    no_context_stage: bool,

    /// Minimum keyword score for a file-name match.
    #[arg(long, default_value_t = 3)]
    threshold: u32,

    #[arg(long, default_value = "name")]
    sort_key: CliSortKey,

    #[arg(long, default_value = "ascending")]
    direction: CliDirection,

    /// Sorting algorithm (merge sort when omitted).
    #[arg(long)]
    algorithm: Option<CliAlgorithm>,
}

impl PipelineArgs {
    fn to_options(&self, engine: &Engine) -> PipelineOptions {
        PipelineOptions {
            root: self.root.clone(),
            include_subfolders: !self.no_subfolders,
            include_hidden: self.include_hidden,
            max_depth: self.max_depth,
            excludes: self.exclude.clone(),
            dedupe: (!self.no_dedupe).then_some(DedupeOptions {
                min_size_bytes: self.dedupe_min_size,
            }),
            classify: Some(ClassifyOptions {
                enable_name_stage: !self.no_name_stage,
                enable_context_stage: !self.no_context_stage,
                confidence_threshold: self.threshold,
                ..engine.classify_options()
            }),
            sort: Some(SortRequest {
                key: self.sort_key.into(),
                direction: self.direction.into(),
                algorithm: self.algorithm.map(Into::into),
            }),
        }
    }
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Only show files with this extension (`All` shows everything).
    #[arg(long = "ext", value_name = "EXT")]
    extension: Option<String>,

    /// Minimum size in KB.
    #[arg(long, default_value = "")]
    min_kb: String,

    /// Maximum size in KB.
    #[arg(long, default_value = "")]
    max_kb: String,

    /// Case-insensitive search over name, extension and category.
    #[arg(long)]
    search: Option<String>,

    /// Write the full preview as JSON.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write the plain-text summary report into the root.
    #[arg(long)]
    report: bool,
}

#[derive(Debug, Args)]
struct OrganizeArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Quarantine duplicate copies before organizing.
    #[arg(long)]
    quarantine_duplicates: bool,

    /// Destination folder (defaults to `<root>/<output_dir_name>`).
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Write the plain-text summary report into the root.
    #[arg(long)]
    report: bool,
}

#[derive(Debug, Args)]
struct DuplicatesArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// `Entire Workspace` or a single category.
    #[arg(long, default_value = "Entire Workspace")]
    scope: String,

    /// Move every delete candidate into the recovery folder.
    #[arg(long)]
    quarantine: bool,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Directory that holds the recovery folder.
    #[arg(long, value_name = "DIR")]
    root: PathBuf,
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    /// Files to classify; they do not have to exist.
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,

    #[arg(long, default_value_t = 3)]
    threshold: u32,
}

#[derive(Debug, Serialize)]
struct PreviewPayload<'a> {
    root: &'a Path,
    files: Vec<&'a Record>,
    categories: BTreeMap<String, usize>,
    duplicate_groups: usize,
    reclaimable_bytes: u64,
    warnings: &'a [String],
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let engine = build_engine(cli.config.as_deref())?;

    match cli.command {
        Commands::Preview(args) => run_preview_command(&engine, args),
        Commands::Organize(args) => run_organize_command(&engine, args),
        Commands::Duplicates(args) => run_duplicates_command(&engine, args),
        Commands::Restore(args) => run_restore_command(&engine, args),
        Commands::Classify(args) => run_classify_command(&engine, args),
    }
}

fn build_engine(config_path: Option<&Path>) -> Result<Engine> {
    let config = match config_path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Engine::new(config).context("failed to initialise engine")
}

fn run_pipeline(engine: &Engine, args: &PipelineArgs) -> Result<PipelineOutput> {
    let mut sink = TracingSink;
    let output = engine
        .run_pipeline(&args.to_options(engine), &mut sink, &CancelToken::new())
        .with_context(|| format!("failed to process {}", args.root.display()))?;
    for warning in &output.warnings {
        println!("Warning: {warning}");
    }
    for failure in &output.failures {
        println!("Skipped: {failure}");
    }
    Ok(output)
}

fn run_preview_command(engine: &Engine, args: PreviewArgs) -> Result<()> {
    let filter = RecordFilter {
        extension: args.extension.clone(),
        size: SizeRange::parse_kb(&args.min_kb, &args.max_kb)?,
    };
    let output = run_pipeline(engine, &args.pipeline)?;

    let filtered = filter.apply(&output.records);
    let visible: Vec<&Record> = match args.search.as_deref() {
        Some(query) => {
            let matches = search(&output.records, query);
            filtered
                .into_iter()
                .filter(|record| matches.iter().any(|m| m.path == record.path))
                .collect()
        }
        None => filtered,
    };

    for record in &visible {
        println!(
            "{:<40} {:>10}  {}",
            record.name,
            human_bytes(record.size_bytes),
            record.category.as_deref().unwrap_or("-")
        );
    }
    println!(
        "{} of {} file(s) shown, {} duplicate group(s), {} reclaimable.",
        visible.len(),
        output.records.len(),
        output.duplicates.len(),
        human_bytes(output.reclaimable_bytes())
    );
    for (category, count) in category_counts(&output.records) {
        println!("  {category}: {count}");
    }

    if let Some(path) = &args.output {
        let payload = PreviewPayload {
            root: &output.root,
            files: visible,
            categories: category_counts(&output.records),
            duplicate_groups: output.duplicates.len(),
            reclaimable_bytes: output.reclaimable_bytes(),
            warnings: &output.warnings,
        };
        let json =
            serde_json::to_string_pretty(&payload).context("failed to serialize preview")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write preview to {}", path.display()))?;
        println!("Preview written to {}", path.display());
    }

    if args.report {
        let written = engine.write_report(&output.summary(0), &output.root)?;
        println!("Report written to {}", written.display());
    }
    Ok(())
}

fn run_organize_command(engine: &Engine, args: OrganizeArgs) -> Result<()> {
    let mut output = run_pipeline(engine, &args.pipeline)?;
    let cancel = CancelToken::new();
    let mut sink = TracingSink;

    let mut recovered = 0;
    if args.quarantine_duplicates {
        let outcome = engine.quarantine(&mut output.records, &output.root, &mut sink, &cancel);
        recovered = outcome.bytes_freed;
        println!(
            "Quarantined {} duplicate(s), {} recovered.",
            outcome.count,
            human_bytes(outcome.bytes_freed)
        );
    }

    let destination = args
        .output_dir
        .clone()
        .unwrap_or_else(|| engine.output_dir(&output.root));
    let outcome = engine.organize(&mut output.records, &destination, &mut sink, &cancel);
    for failure in &outcome.failures {
        println!("Skipped: {failure}");
    }
    println!(
        "Moved {} file(s) into {} ({} failed).",
        outcome.moved.len(),
        destination.display(),
        outcome.failures.len()
    );

    if args.report {
        let written = engine.write_report(&output.summary(recovered), &output.root)?;
        println!("Report written to {}", written.display());
    }
    Ok(())
}

fn run_duplicates_command(engine: &Engine, args: DuplicatesArgs) -> Result<()> {
    let scope: Scope = args.scope.parse()?;
    if args.pipeline.no_dedupe {
        bail!("--no-dedupe cannot be used with the duplicates command");
    }
    let dedupe = DedupeOptions {
        min_size_bytes: args.pipeline.dedupe_min_size,
    };
    let mut pipeline_args = args.pipeline;
    // Detection runs below, on the selected scope only.
    pipeline_args.no_dedupe = true;
    let output = run_pipeline(engine, &pipeline_args)?;

    let mut records = select_scope(&output.records, &scope)?;
    let cancel = CancelToken::new();
    let mut sink = TracingSink;
    let found = engine.detect_duplicates(&mut records, &dedupe, &mut sink, &cancel);
    print!("{}", render_duplicate_listing(&found.groups));
    println!(
        "{} group(s) by {} content hash, {} extra cop(ies), {} reclaimable.",
        found.groups.len(),
        engine.hash_algorithm(),
        found.duplicate_files(),
        human_bytes(found.wasted_bytes())
    );
    for failure in &found.failures {
        println!("Skipped: {failure}");
    }

    if args.quarantine {
        let outcome = engine.quarantine(&mut records, &output.root, &mut sink, &cancel);
        println!(
            "Moved {} file(s) to {} ({} recovered, {} failed).",
            outcome.count,
            outcome.recovery_dir.display(),
            human_bytes(outcome.bytes_freed),
            outcome.failures.len()
        );
    }
    Ok(())
}

fn run_restore_command(engine: &Engine, args: RestoreArgs) -> Result<()> {
    let outcome = engine.restore(&args.root, &mut TracingSink, &CancelToken::new());
    for failure in &outcome.failures {
        println!("Skipped: {failure}");
    }
    println!(
        "Restored {} file(s) into {}{}.",
        outcome.count,
        args.root.display(),
        if outcome.recovery_dir_removed {
            "; recovery folder removed"
        } else {
            ""
        }
    );
    Ok(())
}

fn run_classify_command(engine: &Engine, args: ClassifyArgs) -> Result<()> {
    let options = ClassifyOptions {
        confidence_threshold: args.threshold,
        ..engine.classify_options()
    };
    let now = Utc::now();
    for path in &args.paths {
        let record = match Record::from_path(path) {
            Ok(record) => record,
            Err(_) => Record::new(path.clone(), 0, now, now),
        };
        let decision = engine.classifier().classify(&record, &options, now);
        println!(
            "{} -> {} ({}{})",
            path.display(),
            decision.category,
            decision.stage.label(),
            decision
                .score
                .map(|score| format!(", score {score}"))
                .unwrap_or_default()
        );
        for evidence in &decision.evidence {
            println!("    {evidence}");
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
