use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_HASH_ALGORITHM: &str = "blake3";
pub const DEFAULT_OUTPUT_DIR_NAME: &str = "Organized";
pub const DEFAULT_RECOVERY_DIR_NAME: &str = ".recovery";
pub const DEFAULT_REPORT_FILE_NAME: &str = "organizer-report.txt";
pub const DEFAULT_RECENT_WINDOW_DAYS: i64 = 7;
pub const MAX_RECENT_WINDOW_DAYS: i64 = 36_500;

/// Engine-wide settings. Every field has a default so a partial JSON file is
/// enough to override a single value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
    #[serde(default = "default_output_dir_name")]
    pub output_dir_name: String,
    #[serde(default = "default_recovery_dir_name")]
    pub recovery_dir_name: String,
    #[serde(default = "default_report_file_name")]
    pub report_file_name: String,
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,
    #[serde(default)]
    pub taxonomy_path: Option<PathBuf>,
}

fn default_hash_algorithm() -> String {
    DEFAULT_HASH_ALGORITHM.to_string()
}

fn default_output_dir_name() -> String {
    DEFAULT_OUTPUT_DIR_NAME.to_string()
}

fn default_recovery_dir_name() -> String {
    DEFAULT_RECOVERY_DIR_NAME.to_string()
}

fn default_report_file_name() -> String {
    DEFAULT_REPORT_FILE_NAME.to_string()
}

fn default_recent_window_days() -> i64 {
    DEFAULT_RECENT_WINDOW_DAYS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: default_hash_algorithm(),
            output_dir_name: default_output_dir_name(),
            recovery_dir_name: default_recovery_dir_name(),
            report_file_name: default_report_file_name(),
            recent_window_days: default_recent_window_days(),
            taxonomy_path: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| EngineError::Config {
            path: Some(path.to_path_buf()),
            reason: format!("failed to read: {err}"),
        })?;
        let config: EngineConfig =
            serde_json::from_str(&text).map_err(|err| EngineError::Config {
                path: Some(path.to_path_buf()),
                reason: format!("failed to parse: {err}"),
            })?;
        config.validate(Some(path))?;
        Ok(config)
    }

    pub fn validate(&self, origin: Option<&Path>) -> Result<()> {
        let invalid = |reason: &str| EngineError::Config {
            path: origin.map(Path::to_path_buf),
            reason: reason.to_string(),
        };

        for (field, value) in [
            ("output_dir_name", &self.output_dir_name),
            ("recovery_dir_name", &self.recovery_dir_name),
            ("report_file_name", &self.report_file_name),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(&format!("{field} must not be empty")));
            }
            if value.contains('/') || value.contains('\\') {
                return Err(invalid(&format!("{field} must be a single path component")));
            }
        }
        if !(0..=MAX_RECENT_WINDOW_DAYS).contains(&self.recent_window_days) {
            return Err(invalid(&format!(
                "recent_window_days must be between 0 and {MAX_RECENT_WINDOW_DAYS}"
            )));
        }
        Ok(())
    }

    /// Directory names the scanner must never descend into.
    pub fn reserved_dir_names(&self) -> Vec<String> {
        vec![self.output_dir_name.clone(), self.recovery_dir_name.clone()]
    }
}
