//! Domain layer
//!
//! # Domain Models
//!
//! - `ControlKey` / `IdentityEntry` / `IdentityDelta`: manifestation identity maps
//! - `HeldLink`: holding waiting for a reserved manifestation
//! - `MatchpointEntry`: one row of a duplicate-detection table
//! - `OutputRecord`: materialized FRBR-level record
//!
//! # Port Traits
//!
//! - `PersistentStore` (composed of `IdSequence`, `IdentityStore`,
//!   `HeldLinkStore`, `MatchpointStore`, `PropertyStore`)
//! - `LinkGraph`: repository collaborator

pub mod models;
pub mod ports;

pub use models::{
    BibReferences, ControlKey, FrbrLevel, HeldLink, IdentityDelta, IdentityEntry, IdentityKind,
    IdentitySnapshot, MatchpointEntry, MatchpointStats, OutputRecord, RecordId, RecordStatus,
};
pub use ports::{
    HeldLinkStore, IdSequence, IdentityStore, LinkGraph, MatchpointStore, PersistentStore,
    PropertyStore,
};
