//! Error types for tuneserve.

use uuid::Uuid;

use crate::resource::ResourcePhase;

/// Errors that stop the service from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Rejections raised at submission time. No job is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Model name must not be empty")]
    EmptyModelName,

    #[error("Output model name must not be empty when given")]
    EmptyOutputModel,

    #[error("Dataset needs at least 2 columns, found {found}")]
    TooFewColumns { found: usize },

    #[error("Dataset has no rows")]
    EmptyDataset,

    #[error("Dataset row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Request body for {kind} is invalid: {reason}")]
    MalformedBody { kind: String, reason: String },
}

/// Failures raised while a job executes. These only ever reach a client
/// through polling, as the message of a terminal failure.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Conflict: cannot {operation} while the model is {phase}")]
    Conflict {
        operation: &'static str,
        phase: ResourcePhase,
    },

    #[error("Malformed model output: {reason}")]
    MalformedOutput { reason: String },

    #[error("External failure: {0}")]
    External(#[from] BackendError),

    #[error("Job {id} not found")]
    UnknownIdentifier { id: Uuid },

    #[error("Job {id} execution aborted: {reason}")]
    Aborted { id: Uuid, reason: String },
}

/// Errors reported by a model backend (download, training, generation).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to download {model}: {reason}")]
    Download { model: String, reason: String },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Generation failed: {0}")]
    Generation(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
