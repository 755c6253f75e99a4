//! biblink-engine: identity resolution and linkage for harvested
//! bibliographic and holdings records
//!
//! ## Components
//!
//! - `IdAllocator`: block-reserved internal ids that never repeat
//! - `ManifestationIdentityMap`: per-org processed / reserved manifestation ids
//! - `HeldLinkageManager`: holdings waiting for a reserved manifestation
//! - `MatchPointIndex`: normalized LCCN-style keys for duplicate detection
//! - `BatchCommitController`: delta flushing at forced commits
//! - `LinkageService`: per-record processing over all of the above
//! - `BatchDriver`: harvest-order loop with stop / pause control
//!
//! ## Usage
//!
//! ```rust,ignore
//! use biblink_engine::{BatchControl, BatchDriver, EngineConfig, LinkageService};
//! use biblink_storage::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::new("linkage.db")?);
//! let repo = Arc::new(store.repository()?);
//! let mut service = LinkageService::new(EngineConfig::default(), store, repo)?;
//! let summary = BatchDriver::new(BatchControl::new()).run(&mut service, &mut records)?;
//! ```

pub mod allocator;
pub mod batch;
pub mod commit;
pub mod config;
pub mod error;
pub mod held;
pub mod identity;
pub mod matchpoint;
pub mod message;
pub mod record;
pub mod service;
pub mod splitter;

pub use allocator::IdAllocator;
pub use batch::{BatchControl, BatchDriver, BatchOutcome, BatchSummary, FailedRecord};
pub use commit::{BatchCommitController, BatchCounters, CommitPhase, CommitReport};
pub use config::{ConfigError, EngineConfig};
pub use error::{CommitStage, EngineError, ErrorCategory, Result};
pub use held::HeldLinkageManager;
pub use identity::{IdentityView, ManifestationIdentityMap};
pub use matchpoint::{normalize, MatchKey, MatchPointIndex, LCCN_TABLE};
pub use message::{MessageCode, RecordMessage, Severity};
pub use record::{InputRecord, InputStatus, RecordKind};
pub use service::{EngineStats, LinkageService, ProcessResult};
pub use splitter::{FrbrSplitter, PreviousOutputs, RecordSplitter, Split};
