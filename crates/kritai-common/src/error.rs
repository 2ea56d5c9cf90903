//! Grading error types used across all Kritai services.

use thiserror::Error;

/// Main grading error type.
///
/// Every per-submission failure is converted into one of these at the
/// pipeline boundary and recorded in the participant's ledger with the
/// display text as the message.
#[derive(Error, Debug)]
pub enum GradeError {
    /// Task or dataset configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Submitted code cannot be loaded or lacks the scoring entry point
    #[error("Submission could not be loaded: {0}")]
    Load(String),

    /// Per-sample deadline exceeded
    #[error("Processing timed out: {0}")]
    Timeout(String),

    /// Returned value does not match the declared answer type
    #[error("Returned value is not valid: {0}")]
    Shape(String),

    /// Worker process crashed or raised inside the scoring routine
    #[error("Scoring routine failed: {0}")]
    Crash(String),

    /// Dataset entry could not be materialized
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GradeError {
    /// Single-line message suitable for a ledger cell. Commas and
    /// newlines would break the row format, so they are replaced.
    pub fn ledger_message(&self) -> String {
        self.to_string()
            .replace(',', "-")
            .replace(['\r', '\n'], " ")
    }
}

/// Result type alias using GradeError
pub type GradeResult<T> = Result<T, GradeError>;
