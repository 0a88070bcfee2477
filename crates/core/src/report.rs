use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dedupe::DuplicateGroups;
use crate::error::{EngineError, Result};
use crate::model::Stage;

const REPORT_TITLE: &str = "File Organizer Report";

const ALGORITHM_NOTES: &[&str] = &[
    "Directory scanning walks the tree depth-first and skips hidden entries.",
    "Duplicate detection groups files by size first and only hashes size collisions.",
    "Classification tries file-name keywords, then folder context, then the extension.",
    "Sorting defaults to merge sort, which is stable and O(n log n).",
    "Quarantined duplicates are moved to a recovery folder and can be restored.",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub files_processed: usize,
    pub duplicates_found: usize,
    pub space_recovered_bytes: u64,
    pub elapsed: Duration,
}

/// Plain-text summary. Field order is fixed; the trailing notes never change.
pub fn render_summary_text(report: &SummaryReport) -> String {
    let mut out = String::new();
    out.push_str(REPORT_TITLE);
    out.push('\n');
    out.push_str(&format!("Files Processed: {}\n", report.files_processed));
    out.push_str(&format!("Duplicates Found: {}\n", report.duplicates_found));
    out.push_str(&format!(
        "Space Recovered: {}\n",
        human_bytes(report.space_recovered_bytes)
    ));
    out.push_str(&format!("Time Taken: {}\n", human_duration(report.elapsed)));
    out.push_str("Algorithmic Notes:\n");
    for note in ALGORITHM_NOTES {
        out.push_str(&format!("- {note}\n"));
    }
    out
}

/// Writes the summary to `dir/file_name` and returns the written path.
pub fn write_summary_report(
    report: &SummaryReport,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    let path = dir.join(file_name);
    fs::write(&path, render_summary_text(report))
        .map_err(|err| EngineError::io(Stage::Report, &path, err))?;
    Ok(path)
}

/// One block per duplicate group: digest, wasted space, then members with the
/// kept file first.
pub fn render_duplicate_listing(groups: &DuplicateGroups) -> String {
    if groups.is_empty() {
        return "No duplicate files found.\n".to_string();
    }
    let mut out = String::new();
    for (hash, group) in groups {
        let short = hash.get(..12).unwrap_or(hash.as_str());
        out.push_str(&format!(
            "{short} ({} files, {} each, {} reclaimable)\n",
            group.records.len(),
            human_bytes(group.size_bytes),
            human_bytes(group.wasted_bytes)
        ));
        for record in &group.records {
            let marker = record
                .disposition
                .map(|disposition| disposition.label())
                .unwrap_or("Undecided");
            out.push_str(&format!("  - {} [{marker}]\n", record.path.display()));
        }
    }
    out
}

pub fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value < 1024 {
        return format!("{value} B");
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

pub fn human_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_secs_f64() * 1000.0;
    if millis < 1000.0 {
        format!("{millis:.2} ms")
    } else {
        format!("{:.2} s", millis / 1000.0)
    }
}
