use biblink_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Step of a forced commit that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    IdentityDelta,
    MatchpointDelta,
    HeldLinks,
    Activation,
    Counters,
}

impl CommitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStage::IdentityDelta => "identity_delta",
            CommitStage::MatchpointDelta => "matchpoint_delta",
            CommitStage::HeldLinks => "held_links",
            CommitStage::Activation => "activation",
            CommitStage::Counters => "counters",
        }
    }
}

impl std::fmt::Display for CommitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Missing identity context: {0}")]
    MissingIdentityContext(String),

    #[error("Commit failed during {stage}: {source}")]
    Commit {
        stage: CommitStage,
        #[source]
        source: StorageError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl EngineError {
    pub fn invariant<E: std::fmt::Display>(e: E) -> Self {
        Self::InvariantViolation(e.to_string())
    }

    pub fn missing_context<E: std::fmt::Display>(e: E) -> Self {
        Self::MissingIdentityContext(e.to_string())
    }

    pub fn commit(stage: CommitStage) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::Commit { stage, source }
    }

    /// Whether the error is recovered at the per-record boundary
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::InvariantViolation(_) | EngineError::MissingIdentityContext(_) => {
                ErrorCategory::PerRecord
            }
            _ => ErrorCategory::Fatal,
        }
    }
}

/// Where an error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Attached to the failing record; the batch continues
    PerRecord,
    /// Aborts the batch
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::PerRecord => "per_record",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
