use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::Record;

pub const ALL_EXTENSIONS: &str = "All";
pub const ENTIRE_WORKSPACE: &str = "Entire Workspace";

/// Inclusive size bounds in bytes, parsed from kilobyte text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl Default for SizeRange {
    fn default() -> Self {
        Self {
            min_bytes: 0,
            max_bytes: u64::MAX,
        }
    }
}

impl SizeRange {
    /// Empty text leaves that bound open.
    pub fn parse_kb(min_kb: &str, max_kb: &str) -> Result<Self> {
        let min_bytes = parse_kb_bound(min_kb, "minimum")?.unwrap_or(0);
        let max_bytes = parse_kb_bound(max_kb, "maximum")?.unwrap_or(u64::MAX);
        if min_bytes > max_bytes {
            return Err(EngineError::invalid_input(format!(
                "minimum size {min_kb} KB is larger than maximum size {max_kb} KB"
            )));
        }
        Ok(Self {
            min_bytes,
            max_bytes,
        })
    }

    pub fn contains(&self, size_bytes: u64) -> bool {
        size_bytes >= self.min_bytes && size_bytes <= self.max_bytes
    }
}

fn parse_kb_bound(text: &str, which: &str) -> Result<Option<u64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let kb: u64 = text.parse().map_err(|_| {
        EngineError::invalid_input(format!("{which} size `{text}` is not a whole number of KB"))
    })?;
    kb.checked_mul(1024)
        .map(Some)
        .ok_or_else(|| EngineError::invalid_input(format!("{which} size `{text}` KB is too large")))
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    /// `None` or `"All"` matches every extension; otherwise compared
    /// case-insensitively.
    pub extension: Option<String>,
    pub size: SizeRange,
}

impl RecordFilter {
    pub fn matches(&self, record: &Record) -> bool {
        let extension_ok = match self.extension.as_deref() {
            None | Some(ALL_EXTENSIONS) => true,
            Some(wanted) => wanted.trim_start_matches('.').eq_ignore_ascii_case(&record.extension),
        };
        extension_ok && self.size.contains(record.size_bytes)
    }

    pub fn apply<'a>(&self, records: &'a [Record]) -> Vec<&'a Record> {
        records.iter().filter(|record| self.matches(record)).collect()
    }
}

/// Case-insensitive substring search over name, extension and category. An
/// empty query matches everything.
pub fn search<'a>(records: &'a [Record], query: &str) -> Vec<&'a Record> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return records.iter().collect();
    }
    records
        .iter()
        .filter(|record| {
            record.name.to_lowercase().contains(&query)
                || record.extension.contains(&query)
                || record
                    .category
                    .as_deref()
                    .is_some_and(|category| category.to_lowercase().contains(&query))
        })
        .collect()
}

/// Which records a duplicate scan looks at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    EntireWorkspace,
    Category(String),
}

impl FromStr for Scope {
    type Err = EngineError;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::invalid_input("no scan scope selected"));
        }
        if text.eq_ignore_ascii_case(ENTIRE_WORKSPACE) {
            return Ok(Scope::EntireWorkspace);
        }
        Ok(Scope::Category(text.to_string()))
    }
}

/// Clones the records in `scope`. Naming a category no record carries is an
/// input error rather than an empty selection.
pub fn select_scope(records: &[Record], scope: &Scope) -> Result<Vec<Record>> {
    match scope {
        Scope::EntireWorkspace => Ok(records.to_vec()),
        Scope::Category(category) => {
            let selected = records
                .iter()
                .filter(|record| record.category.as_deref() == Some(category.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            if selected.is_empty() {
                return Err(EngineError::invalid_input(format!(
                    "unknown category `{category}`"
                )));
            }
            Ok(selected)
        }
    }
}

/// Record count per category, uncategorized records excluded.
pub fn category_counts(records: &[Record]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for category in records.iter().filter_map(|record| record.category.as_deref()) {
        *counts.entry(category.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::{category_counts, search, select_scope, RecordFilter, Scope, SizeRange};
    use crate::error::EngineError;
    use crate::model::Record;

    fn record(name: &str, size: u64, category: Option<&str>) -> Record {
        let now = Utc::now();
        let mut record = Record::new(PathBuf::from("/w").join(name), size, now, now);
        record.category = category.map(str::to_string);
        record
    }

    fn sample() -> Vec<Record> {
        vec![
            record("notes.txt", 500, Some("Documents")),
            record("photo.JPG", 4096, Some("Media/Images")),
            record("lecture_3.pdf", 20_480, Some("Academic/Lectures")),
            record("raw.bin", 10, None),
        ]
    }

    #[test]
    fn size_range_parses_kilobytes() {
        let range = SizeRange::parse_kb(" 1 ", "").expect("valid");
        assert_eq!(range.min_bytes, 1024);
        assert_eq!(range.max_bytes, u64::MAX);
        assert_eq!(SizeRange::parse_kb("", "").expect("valid"), SizeRange::default());
    }

    #[test]
    fn size_range_rejects_bad_text() {
        for (min, max) in [("abc", ""), ("", "-3"), ("10", "2"), ("1.5", "")] {
            assert!(
                matches!(SizeRange::parse_kb(min, max), Err(EngineError::InvalidInput(_))),
                "{min:?} {max:?}"
            );
        }
    }

    #[test]
    fn filter_combines_extension_and_size() {
        let records = sample();
        let filter = RecordFilter {
            extension: Some("jpg".to_string()),
            size: SizeRange::parse_kb("1", "8").expect("valid"),
        };
        let names: Vec<_> = filter.apply(&records).iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["photo.JPG"]);

        let all = RecordFilter {
            extension: Some("All".to_string()),
            ..RecordFilter::default()
        };
        assert_eq!(all.apply(&records).len(), 4);
    }

    #[test]
    fn search_covers_name_extension_and_category() {
        let records = sample();
        assert_eq!(search(&records, "LECT").len(), 1);
        assert_eq!(search(&records, "media").len(), 1);
        assert_eq!(search(&records, "bin").len(), 1);
        assert_eq!(search(&records, "").len(), 4);
    }

    #[test]
    fn scope_selection() {
        let records = sample();
        assert_eq!("Entire Workspace".parse::<Scope>().expect("scope"), Scope::EntireWorkspace);
        let scope: Scope = "Documents".parse().expect("scope");
        assert_eq!(select_scope(&records, &scope).expect("selected").len(), 1);

        let unknown = Scope::Category("Nope".to_string());
        assert!(matches!(select_scope(&records, &unknown), Err(EngineError::InvalidInput(_))));
        assert!(matches!("  ".parse::<Scope>(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn counts_skip_uncategorized() {
        let counts = category_counts(&sample());
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.get("Documents"), Some(&1));
    }
}
