use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::events::{CancelToken, EventSink};
use crate::model::{ClassificationStage, Record};

pub const TAXONOMY_VERSION: &str = "1.0.0";

/// Category tables. Rule order is significant: on equal name scores the rule
/// declared first wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Taxonomy {
    pub version: String,
    pub name_rules: Vec<NameRule>,
    pub context_rules: Vec<ContextRule>,
    #[serde(default = "default_recent_category")]
    pub recent_category: String,
    pub extension_rules: Vec<ExtensionRule>,
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NameRule {
    pub group: String,
    pub name: String,
    pub keywords: Vec<Keyword>,
}

impl NameRule {
    pub fn category(&self) -> String {
        format!("{}/{}", self.group, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub keyword: String,
    pub weight: u32,
}

/// Matches when the lower-cased parent directory name contains any pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextRule {
    pub patterns: Vec<String>,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionRule {
    pub category: String,
    pub extensions: Vec<String>,
}

fn default_recent_category() -> String {
    "Recent Files".to_string()
}

fn default_fallback_category() -> String {
    "Uncategorized".to_string()
}

fn name_rule(group: &str, name: &str, keywords: &[(&str, u32)]) -> NameRule {
    NameRule {
        group: group.to_string(),
        name: name.to_string(),
        keywords: keywords
            .iter()
            .map(|(keyword, weight)| Keyword {
                keyword: keyword.to_string(),
                weight: *weight,
            })
            .collect(),
    }
}

fn extension_rule(category: &str, extensions: &[&str]) -> ExtensionRule {
    ExtensionRule {
        category: category.to_string(),
        extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
    }
}

impl Taxonomy {
    pub fn builtin() -> Self {
        Self {
            version: TAXONOMY_VERSION.to_string(),
            name_rules: vec![
                name_rule(
                    "Academic",
                    "Assignments",
                    &[
                        ("assignment", 5),
                        ("assn", 5),
                        ("hw", 4),
                        ("homework", 4),
                        ("task", 3),
                        ("exercise", 3),
                    ],
                ),
                name_rule(
                    "Academic",
                    "Labs",
                    &[
                        ("lab", 5),
                        ("practical", 4),
                        ("experiment", 4),
                        ("workshop", 3),
                    ],
                ),
                name_rule(
                    "Academic",
                    "Exams and Quizzes",
                    &[
                        ("exam", 5),
                        ("quiz", 5),
                        ("test", 4),
                        ("mid", 4),
                        ("mids", 4),
                        ("final", 4),
                        ("paper", 3),
                    ],
                ),
                name_rule(
                    "Academic",
                    "Lectures",
                    &[
                        ("lecture", 5),
                        ("slides", 4),
                        ("chapter", 3),
                        ("presentation", 3),
                        ("ppt", 3),
                        ("notes", 3),
                    ],
                ),
                name_rule(
                    "Finance",
                    "Fees",
                    &[("fee", 5), ("challan", 5), ("tuition", 4), ("payment", 3)],
                ),
                name_rule(
                    "Finance",
                    "Invoices",
                    &[
                        ("invoice", 5),
                        ("bill", 4),
                        ("receipt", 4),
                        ("statement", 3),
                    ],
                ),
                name_rule(
                    "Personal",
                    "CV",
                    &[("cv", 5), ("resume", 5), ("biodata", 4)],
                ),
                name_rule(
                    "Personal",
                    "Certificates",
                    &[
                        ("certificate", 5),
                        ("marksheet", 4),
                        ("diploma", 4),
                        ("transcript", 4),
                    ],
                ),
                name_rule(
                    "Development",
                    "Projects",
                    &[("project", 5), ("src", 4), ("source", 4), ("code", 3)],
                ),
                name_rule(
                    "Development",
                    "Documentation",
                    &[
                        ("readme", 4),
                        ("documentation", 4),
                        ("report", 3),
                        ("guide", 3),
                    ],
                ),
                name_rule(
                    "Media",
                    "Screenshots",
                    &[
                        ("screenshot", 5),
                        ("snip", 4),
                        ("capture", 4),
                        ("screen", 3),
                    ],
                ),
                name_rule(
                    "Media",
                    "Photos",
                    &[("photo", 4), ("img", 3), ("camera", 3), ("pic", 3)],
                ),
            ],
            context_rules: vec![
                ContextRule {
                    patterns: vec!["download".to_string()],
                    category: "Recent Documents".to_string(),
                },
                ContextRule {
                    patterns: vec!["whatsapp".to_string(), "media".to_string()],
                    category: "Media/WhatsApp".to_string(),
                },
                ContextRule {
                    patterns: vec!["desktop".to_string()],
                    category: "Quick Access".to_string(),
                },
            ],
            recent_category: default_recent_category(),
            extension_rules: vec![
                extension_rule(
                    "General/Documents",
                    &["pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "rtf"],
                ),
                extension_rule(
                    "General/Images",
                    &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "svg", "webp"],
                ),
                extension_rule(
                    "General/Videos",
                    &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"],
                ),
                extension_rule(
                    "General/Audio",
                    &["mp3", "wav", "flac", "aac", "ogg", "wma"],
                ),
                extension_rule(
                    "General/Archives",
                    &["zip", "rar", "7z", "tar", "gz", "bz2"],
                ),
                extension_rule(
                    "General/Code",
                    &[
                        "java", "py", "cpp", "c", "cs", "js", "html", "css", "php", "sql", "xml",
                        "json",
                    ],
                ),
                extension_rule(
                    "General/Executables",
                    &["exe", "msi", "dmg", "pkg", "deb", "rpm"],
                ),
            ],
            fallback_category: default_fallback_category(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| EngineError::Config {
            path: Some(path.to_path_buf()),
            reason: format!("failed to read taxonomy: {err}"),
        })?;
        let taxonomy: Taxonomy =
            serde_json::from_str(&text).map_err(|err| EngineError::Config {
                path: Some(path.to_path_buf()),
                reason: format!("failed to parse taxonomy: {err}"),
            })?;
        taxonomy.validate(Some(path))?;
        Ok(taxonomy)
    }

    pub fn validate(&self, origin: Option<&Path>) -> Result<()> {
        let invalid = |reason: String| EngineError::Config {
            path: origin.map(Path::to_path_buf),
            reason,
        };

        if self.fallback_category.trim().is_empty() {
            return Err(invalid("fallback_category must not be empty".to_string()));
        }
        if self.recent_category.trim().is_empty() {
            return Err(invalid("recent_category must not be empty".to_string()));
        }
        for rule in &self.name_rules {
            if rule.group.trim().is_empty() || rule.name.trim().is_empty() {
                return Err(invalid("name rule with empty group or name".to_string()));
            }
            if rule.keywords.iter().any(|kw| kw.keyword.is_empty()) {
                return Err(invalid(format!(
                    "empty keyword in name rule {}",
                    rule.category()
                )));
            }
        }
        for rule in &self.context_rules {
            if rule.category.trim().is_empty() || rule.patterns.is_empty() {
                return Err(invalid(
                    "context rule needs a category and at least one pattern".to_string(),
                ));
            }
        }
        if self
            .extension_rules
            .iter()
            .any(|rule| rule.category.trim().is_empty())
        {
            return Err(invalid("extension rule with empty category".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifyOptions {
    pub enable_name_stage: bool,
    pub enable_context_stage: bool,
    pub confidence_threshold: u32,
    pub recent_window_days: i64,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            enable_name_stage: true,
            enable_context_stage: true,
            confidence_threshold: 3,
            recent_window_days: crate::config::DEFAULT_RECENT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub stage: ClassificationStage,
    pub score: Option<u32>,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifySummary {
    pub classified: u64,
    pub by_name: u64,
    pub by_context: u64,
    pub by_extension: u64,
    pub cancelled: bool,
}

#[derive(Debug)]
struct CompiledRule {
    category: String,
    keywords: Vec<(String, u32)>,
}

#[derive(Debug)]
struct CompiledTaxonomy {
    version: String,
    name_rules: Vec<CompiledRule>,
    context_rules: Vec<ContextRule>,
    recent_category: String,
    extensions: HashMap<String, String>,
    fallback_category: String,
}

impl CompiledTaxonomy {
    fn compile(taxonomy: &Taxonomy) -> Self {
        let mut extensions = HashMap::new();
        for rule in &taxonomy.extension_rules {
            for ext in &rule.extensions {
                extensions
                    .entry(ext.trim_start_matches('.').to_lowercase())
                    .or_insert_with(|| rule.category.clone());
            }
        }

        Self {
            version: taxonomy.version.clone(),
            name_rules: taxonomy
                .name_rules
                .iter()
                .map(|rule| CompiledRule {
                    category: rule.category(),
                    keywords: rule
                        .keywords
                        .iter()
                        .map(|kw| (kw.keyword.to_lowercase(), kw.weight))
                        .collect(),
                })
                .collect(),
            context_rules: taxonomy
                .context_rules
                .iter()
                .map(|rule| ContextRule {
                    patterns: rule.patterns.iter().map(|p| p.to_lowercase()).collect(),
                    category: rule.category.clone(),
                })
                .collect(),
            recent_category: taxonomy.recent_category.clone(),
            extensions,
            fallback_category: taxonomy.fallback_category.clone(),
        }
    }
}

static BUILTIN: Lazy<Arc<CompiledTaxonomy>> =
    Lazy::new(|| Arc::new(CompiledTaxonomy::compile(&Taxonomy::builtin())));

/// Three-stage classifier: file name keywords, then folder context, then
/// extension. Cloning is cheap; the compiled tables are shared.
#[derive(Debug, Clone)]
pub struct Classifier {
    tables: Arc<CompiledTaxonomy>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Classifier {
    pub fn builtin() -> Self {
        Self {
            tables: Arc::clone(&BUILTIN),
        }
    }

    pub fn new(taxonomy: &Taxonomy) -> Result<Self> {
        taxonomy.validate(None)?;
        Ok(Self {
            tables: Arc::new(CompiledTaxonomy::compile(taxonomy)),
        })
    }

    pub fn taxonomy_version(&self) -> &str {
        &self.tables.version
    }

    pub fn classify(
        &self,
        record: &Record,
        options: &ClassifyOptions,
        now: DateTime<Utc>,
    ) -> Classification {
        if options.enable_name_stage {
            if let Some(found) = self.classify_by_name(&record.name, options.confidence_threshold)
            {
                return found;
            }
        }

        if options.enable_context_stage {
            if let Some(found) = self.classify_by_context(record, options, now) {
                return found;
            }
        }

        self.classify_by_extension(&record.extension)
    }

    /// Classifies every record in place and reports each decision.
    pub fn classify_records(
        &self,
        records: &mut [Record],
        options: &ClassifyOptions,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> ClassifySummary {
        let now = Utc::now();
        let mut summary = ClassifySummary::default();

        for record in records.iter_mut() {
            if cancel.is_cancelled() {
                sink.log("Classification cancelled; remaining files left unclassified");
                summary.cancelled = true;
                break;
            }

            let decision = self.classify(record, options, now);
            match decision.stage {
                ClassificationStage::Name => summary.by_name += 1,
                ClassificationStage::Context => summary.by_context += 1,
                ClassificationStage::Extension => summary.by_extension += 1,
            }
            summary.classified += 1;

            debug!(
                path = %record.path.display(),
                category = %decision.category,
                stage = decision.stage.label(),
                score = ?decision.score,
                "classified"
            );
            sink.log(&format!(
                "Classified {} as {} ({})",
                record.name,
                decision.category,
                decision.stage.label()
            ));
            record.category = Some(decision.category);
        }

        info!(
            classified = summary.classified,
            by_name = summary.by_name,
            by_context = summary.by_context,
            by_extension = summary.by_extension,
            "classification pass finished"
        );
        summary
    }

    fn classify_by_name(&self, name: &str, threshold: u32) -> Option<Classification> {
        let tokens = tokenize(name);
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<(&CompiledRule, ScoreState)> = None;
        for rule in &self.tables.name_rules {
            let state = score_tokens(&tokens, &rule.keywords);
            if state.score == 0 {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |(_, current)| state.score > current.score);
            if better {
                best = Some((rule, state));
            }
        }

        let (rule, state) = best?;
        if state.score < threshold {
            return None;
        }
        Some(Classification {
            category: rule.category.clone(),
            stage: ClassificationStage::Name,
            score: Some(state.score),
            evidence: state.evidence,
        })
    }

    fn classify_by_context(
        &self,
        record: &Record,
        options: &ClassifyOptions,
        now: DateTime<Utc>,
    ) -> Option<Classification> {
        if let Some(parent) = record.parent_name() {
            for rule in &self.tables.context_rules {
                if let Some(pattern) = rule
                    .patterns
                    .iter()
                    .find(|pattern| parent.contains(pattern.as_str()))
                {
                    return Some(Classification {
                        category: rule.category.clone(),
                        stage: ClassificationStage::Context,
                        score: None,
                        evidence: vec![format!("parent folder contains '{pattern}'")],
                    });
                }
            }
        }

        // A window too wide to represent reaches back past every timestamp.
        let cutoff = Duration::try_days(options.recent_window_days)
            .and_then(|window| now.checked_sub_signed(window));
        if cutoff.map_or(true, |cutoff| record.modified > cutoff) {
            return Some(Classification {
                category: self.tables.recent_category.clone(),
                stage: ClassificationStage::Context,
                score: None,
                evidence: vec![format!(
                    "modified within the last {} day(s)",
                    options.recent_window_days
                )],
            });
        }
        None
    }

    fn classify_by_extension(&self, extension: &str) -> Classification {
        let normalized = extension.to_lowercase();
        match self.tables.extensions.get(&normalized) {
            Some(category) => Classification {
                category: category.clone(),
                stage: ClassificationStage::Extension,
                score: None,
                evidence: vec![format!("extension .{normalized}")],
            },
            None => Classification {
                category: self.tables.fallback_category.clone(),
                stage: ClassificationStage::Extension,
                score: None,
                evidence: Vec::new(),
            },
        }
    }
}

#[derive(Default)]
struct ScoreState {
    score: u32,
    evidence: Vec<String>,
}

fn score_tokens(tokens: &[String], keywords: &[(String, u32)]) -> ScoreState {
    let mut state = ScoreState::default();
    for token in tokens {
        for (keyword, weight) in keywords {
            if token.contains(keyword.as_str()) || keyword.contains(token.as_str()) {
                state.score = state.score.saturating_add(*weight);
                state.evidence.push(format!("{token}~{keyword}"));
            }
        }
    }
    state
}

/// Lower-cases the name, treats every non-alphanumeric character as a
/// separator and drops empty pieces.
pub fn tokenize(name: &str) -> Vec<String> {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration, Utc};

    use super::{name_rule, tokenize, Classifier, ClassifyOptions, Taxonomy};
    use crate::events::{CancelToken, EventRecorder};
    use crate::model::{ClassificationStage, Record};

    fn old_record(path: &str) -> Record {
        let old = Utc::now() - Duration::days(400);
        Record::new(PathBuf::from(path), 10, old, old)
    }

    #[test]
    fn tokenizer_splits_on_punctuation() {
        assert_eq!(
            tokenize("Midterm_Exam-2024.pdf"),
            vec!["midterm", "exam", "2024", "pdf"]
        );
        assert!(tokenize("___").is_empty());
        assert_eq!(tokenize("_lead"), vec!["lead"]);
    }

    #[test]
    fn name_stage_scores_exam_files() {
        let classifier = Classifier::builtin();
        let record = old_record("/work/midterm_exam_2024.pdf");
        let options = ClassifyOptions {
            confidence_threshold: 3,
            ..ClassifyOptions::default()
        };

        let result = classifier.classify(&record, &options, Utc::now());
        assert_eq!(result.category, "Academic/Exams and Quizzes");
        assert_eq!(result.stage, ClassificationStage::Name);
        assert!(result.score.expect("score") >= 9);
    }

    #[test]
    fn threshold_above_best_score_falls_through() {
        let classifier = Classifier::builtin();
        let record = old_record("/work/invoice.xyz");
        let options = ClassifyOptions {
            confidence_threshold: 50,
            enable_context_stage: false,
            ..ClassifyOptions::default()
        };

        let result = classifier.classify(&record, &options, Utc::now());
        assert_eq!(result.category, "Uncategorized");
        assert_eq!(result.stage, ClassificationStage::Extension);
    }

    #[test]
    fn ties_go_to_the_first_declared_rule() {
        let taxonomy = Taxonomy {
            name_rules: vec![
                name_rule("Zeta", "Later", &[("alpha", 5)]),
                name_rule("Alpha", "Sooner", &[("alpha", 5)]),
            ],
            ..Taxonomy::builtin()
        };
        let classifier = Classifier::new(&taxonomy).expect("valid taxonomy");
        let record = old_record("/work/alpha.bin");

        let result = classifier.classify(&record, &ClassifyOptions::default(), Utc::now());
        assert_eq!(result.category, "Zeta/Later");
    }

    #[test]
    fn downloads_parent_without_name_match_is_recent_documents() {
        let classifier = Classifier::builtin();
        let record = old_record("/home/me/Downloads/zzz.xyz");

        let result = classifier.classify(&record, &ClassifyOptions::default(), Utc::now());
        assert_eq!(result.category, "Recent Documents");
        assert_eq!(result.stage, ClassificationStage::Context);
    }

    #[test]
    fn context_rules_apply_in_order() {
        let classifier = Classifier::builtin();
        let options = ClassifyOptions {
            enable_name_stage: false,
            ..ClassifyOptions::default()
        };
        let now = Utc::now();

        let whatsapp = old_record("/phone/WhatsApp Images/zzz.jpg");
        assert_eq!(
            classifier.classify(&whatsapp, &options, now).category,
            "Media/WhatsApp"
        );
        let desktop = old_record("/home/me/Desktop/zzz.jpg");
        assert_eq!(
            classifier.classify(&desktop, &options, now).category,
            "Quick Access"
        );
        let download_media = old_record("/home/me/media-downloads/zzz.jpg");
        assert_eq!(
            classifier.classify(&download_media, &options, now).category,
            "Recent Documents"
        );
    }

    #[test]
    fn recent_modification_is_recent_files() {
        let classifier = Classifier::builtin();
        let now = Utc::now();
        let mut record = old_record("/archive/zzz.jpg");
        record.modified = now - Duration::days(2);
        let options = ClassifyOptions {
            enable_name_stage: false,
            ..ClassifyOptions::default()
        };

        assert_eq!(
            classifier.classify(&record, &options, now).category,
            "Recent Files"
        );

        record.modified = now - Duration::days(8);
        assert_eq!(
            classifier.classify(&record, &options, now).category,
            "General/Images"
        );
    }

    #[test]
    fn unrepresentable_recent_window_treats_every_file_as_recent() {
        let classifier = Classifier::builtin();
        let now = Utc::now();
        let record = old_record("/archive/zzz.jpg");
        let options = ClassifyOptions {
            enable_name_stage: false,
            recent_window_days: 1_000_000_000_000,
            ..ClassifyOptions::default()
        };

        let result = classifier.classify(&record, &options, now);
        assert_eq!(result.category, "Recent Files");
        assert_eq!(result.stage, ClassificationStage::Context);
    }

    #[test]
    fn extension_stage_always_produces_a_category() {
        let classifier = Classifier::builtin();
        let options = ClassifyOptions {
            enable_name_stage: false,
            enable_context_stage: false,
            ..ClassifyOptions::default()
        };
        let now = Utc::now();

        for (path, expected) in [
            ("/x/a.TXT", "General/Documents"),
            ("/x/a.mkv", "General/Videos"),
            ("/x/a.flac", "General/Audio"),
            ("/x/a.7z", "General/Archives"),
            ("/x/a.json", "General/Code"),
            ("/x/a.deb", "General/Executables"),
            ("/x/a.webp", "General/Images"),
            ("/x/noext", "Uncategorized"),
            ("/x/.hidden", "Uncategorized"),
        ] {
            let result = classifier.classify(&old_record(path), &options, now);
            assert_eq!(result.category, expected, "{path}");
            assert!(!result.category.is_empty());
        }
    }

    #[test]
    fn classify_records_is_idempotent_and_logs_stage() {
        let classifier = Classifier::builtin();
        let mut records = vec![
            old_record("/x/resume_final.docx"),
            old_record("/x/Downloads/zzz.qqq"),
            old_record("/x/zzz.mp3"),
        ];
        let options = ClassifyOptions::default();
        let mut sink = EventRecorder::new();

        let summary =
            classifier.classify_records(&mut records, &options, &mut sink, &CancelToken::new());
        let first = records
            .iter()
            .map(|r| r.category.clone())
            .collect::<Vec<_>>();
        classifier.classify_records(&mut records, &options, &mut sink, &CancelToken::new());
        let second = records
            .iter()
            .map(|r| r.category.clone())
            .collect::<Vec<_>>();

        assert_eq!(first, second);
        assert_eq!(summary.classified, 3);
        assert_eq!(summary.by_name, 1);
        assert_eq!(summary.by_context, 1);
        assert_eq!(summary.by_extension, 1);
        assert!(sink
            .messages()
            .any(|message| message.ends_with("(Context-based)")));
    }

    #[test]
    fn cancelled_pass_stops_before_first_record() {
        let classifier = Classifier::builtin();
        let mut records = vec![old_record("/x/a.txt")];
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = classifier.classify_records(
            &mut records,
            &ClassifyOptions::default(),
            &mut EventRecorder::new(),
            &cancel,
        );
        assert!(summary.cancelled);
        assert!(records[0].category.is_none());
    }

    #[test]
    fn rejects_taxonomy_with_empty_fallback() {
        let taxonomy = Taxonomy {
            fallback_category: " ".to_string(),
            ..Taxonomy::builtin()
        };
        assert!(Classifier::new(&taxonomy).is_err());
    }
}
