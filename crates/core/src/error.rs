use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::Stage;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{stage} failed for {}: {source}", path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scan root {} is not accessible: {source}", path.display())]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hash algorithm `{0}` is not available in this build")]
    HashAlgorithmUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration {}: {reason}", config_origin(path))]
    Config {
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("operation cancelled by caller")]
    Cancelled,
}

impl EngineError {
    pub fn io(stage: Stage, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

fn config_origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<built-in>".to_string())
}
