//! biblink-storage: persistence ports and adapters for the linkage engine
//!
//! ## Contents
//!
//! - **Ports**: `IdSequence`, `IdentityStore`, `HeldLinkStore`,
//!   `MatchpointStore`, `PropertyStore` (together `PersistentStore`) and the
//!   `LinkGraph` repository collaborator
//! - **Adapters**: in-memory (tests, dry runs) and SQLite (`sqlite` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use biblink_storage::{SqliteStore, IdSequence};
//!
//! let store = SqliteStore::new("linkage.db")?;
//! let repo = store.repository()?;
//! let first = store.reserve_id_block(1000)?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    BibReferences, ControlKey, FrbrLevel, HeldLink, HeldLinkStore, IdSequence, IdentityDelta,
    IdentityEntry, IdentityKind, IdentitySnapshot, IdentityStore, LinkGraph, MatchpointEntry,
    MatchpointStats, MatchpointStore, OutputRecord, PersistentStore, PropertyStore, RecordId,
    RecordStatus,
};
pub use infrastructure::{InMemoryRepository, InMemoryStore};

#[cfg(feature = "sqlite")]
pub use infrastructure::{SqliteRepository, SqliteStore};
