//! Per-record result messages
//!
//! Processing never throws for data problems; it attaches a typed message to
//! the record's result instead. A record with zero outputs and no `Error` or
//! `Fatal` message was skipped on purpose.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
    /// Contract breach, distinguishable from ordinary data errors
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCode {
    /// Holding (or bib) without a resolvable organization code
    MissingOrgCode,
    /// Record produced no output
    NoOutput,
    /// Successor record missing or at an unexpected level
    InvariantViolation,
    /// Other records share this record's match key
    DuplicateCandidates,
}

impl MessageCode {
    /// Stable numeric code reported to operators
    pub fn code(&self) -> u16 {
        match self {
            MessageCode::MissingOrgCode => 100,
            MessageCode::NoOutput => 102,
            MessageCode::InvariantViolation => 103,
            MessageCode::DuplicateCandidates => 104,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub code: MessageCode,
    pub severity: Severity,
    pub detail: String,
}

impl RecordMessage {
    pub fn new(code: MessageCode, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            detail: detail.into(),
        }
    }

    pub fn info(code: MessageCode, detail: impl Into<String>) -> Self {
        Self::new(code, Severity::Info, detail)
    }

    pub fn error(code: MessageCode, detail: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, detail)
    }

    /// Message for an error recovered at the per-record boundary
    pub fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::MissingIdentityContext(detail) => {
                Self::error(MessageCode::MissingOrgCode, detail.clone())
            }
            EngineError::InvariantViolation(detail) => Self::new(
                MessageCode::InvariantViolation,
                Severity::Fatal,
                detail.clone(),
            ),
            other => Self::error(MessageCode::NoOutput, other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.severity >= Severity::Error
    }
}
