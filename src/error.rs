//! Error type shared by every stage of the report pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while fetching, normalizing, laying out or composing reports.
///
/// A destination that already exists is not an error; save operations report it through
/// [`SaveOutcome::Skipped`].
#[derive(Debug, Error)]
pub enum SurveyError {
    /// Network failure or non-success response from the survey system.
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// The report job never attached a file within the allowed wait.
    #[error("report for quiz {quiz_id} was not ready after {}s", .waited.as_secs())]
    Timeout { quiz_id: u64, waited: Duration },

    /// Nothing matched a search, or an input set was empty.
    #[error("not found: {0}")]
    NotFound(String),

    /// The report export could not be parsed or does not match the expected schema.
    #[error("failed to parse report: {0}")]
    Parse(String),

    /// Missing or invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Font loading or text rendering failure.
    #[error("rendering failed: {0}")]
    Font(#[from] genpdf::error::Error),

    /// Template/overlay merge failure.
    #[error("failed to compose document: {0}")]
    Compose(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SurveyError {
    pub(crate) fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        SurveyError::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SurveyError>;

/// Result of a write that refuses to overwrite existing files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The file was created.
    Written(std::path::PathBuf),
    /// The destination already existed and was left untouched.
    Skipped(std::path::PathBuf),
}

impl SaveOutcome {
    /// Path of the file, whether it was just written or already present.
    pub fn path(&self) -> &std::path::Path {
        match self {
            SaveOutcome::Written(path) | SaveOutcome::Skipped(path) => path,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, SaveOutcome::Written(_))
    }
}
