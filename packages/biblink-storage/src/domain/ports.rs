//! Storage Ports (Trait Interfaces)
//!
//! Narrow, synchronous interfaces the identity engine is composed from:
//! - `IdSequence`: persisted high-water mark for internal ids
//! - `IdentityStore`: manifestation identity maps (processed / reserved)
//! - `HeldLinkStore`: holdings waiting for a reserved manifestation
//! - `MatchpointStore`: match-point tables used for duplicate detection
//! - `PropertyStore`: scalar counters
//! - `LinkGraph`: the output-record repository and its link table
//!
//! Every call blocks. Implementations are responsible for their own safe
//! concurrent access; the engine never shares one instance's in-memory maps
//! with another.

use super::models::{
    FrbrLevel, HeldLink, IdentityDelta, IdentitySnapshot, MatchpointEntry, MatchpointStats,
    OutputRecord, RecordId,
};
use crate::Result;

/// Persisted id sequence
pub trait IdSequence: Send + Sync {
    /// Next id that would be handed out, without consuming it
    fn next_id(&self) -> Result<RecordId>;

    /// Consume and return the next id
    fn next_id_and_increment(&self) -> Result<RecordId>;

    /// Consume `count` consecutive ids and return the first one
    ///
    /// The high-water mark is durable before this returns.
    fn reserve_id_block(&self, count: u32) -> Result<RecordId>;
}

/// Identity map persistence
pub trait IdentityStore: Send + Sync {
    /// Organization codes that have at least one persisted entry
    fn identity_orgs(&self) -> Result<Vec<String>>;

    /// Load both sub-maps for one organization
    fn load_identity_maps(&self, org: &str) -> Result<IdentitySnapshot>;

    /// Apply one batch of added/removed entries
    ///
    /// Removals are applied by key; additions upsert.
    fn persist_identity_deltas(&self, delta: &IdentityDelta) -> Result<()>;
}

/// Held-link persistence
pub trait HeldLinkStore: Send + Sync {
    fn persist_held_links(&self, links: &[HeldLink]) -> Result<()>;

    /// Delete every held link against any of `manifestation_ids`
    fn delete_held_links(&self, manifestation_ids: &[RecordId]) -> Result<()>;

    /// Delete every held link of any of `holding_ids`
    fn delete_held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<()>;

    /// Holdings held against any of `manifestation_ids` (deduplicated)
    fn held_links_to_activate(&self, manifestation_ids: &[RecordId]) -> Result<Vec<RecordId>>;

    /// All held links of the given holdings
    fn held_links_for_holdings(&self, holding_ids: &[RecordId]) -> Result<Vec<HeldLink>>;
}

/// Match-point table persistence
pub trait MatchpointStore: Send + Sync {
    /// Upsert `record_id -> key` rows
    fn persist_matchpoint_deltas(&self, table: &str, entries: &[MatchpointEntry]) -> Result<()>;

    /// Records sharing `key`
    fn query_matchpoint(&self, table: &str, key: i64) -> Result<Vec<RecordId>>;

    fn delete_matchpoint_row(&self, table: &str, record_id: RecordId) -> Result<()>;

    fn matchpoint_for_record(&self, table: &str, record_id: RecordId) -> Result<Option<i64>>;

    /// Every row of the table (full-cache load)
    fn load_matchpoints(&self, table: &str) -> Result<Vec<MatchpointEntry>>;

    fn matchpoint_stats(&self, table: &str) -> Result<MatchpointStats>;
}

/// Scalar properties (batch counters)
pub trait PropertyStore: Send + Sync {
    fn get_property(&self, key: &str) -> Result<Option<String>>;

    fn set_property(&self, key: &str, value: &str) -> Result<()>;
}

/// Everything the engine needs from one persistent store handle
pub trait PersistentStore:
    IdSequence + IdentityStore + HeldLinkStore + MatchpointStore + PropertyStore
{
}

impl<T> PersistentStore for T where
    T: IdSequence + IdentityStore + HeldLinkStore + MatchpointStore + PropertyStore
{
}

/// Output-record repository and link graph
///
/// Links point from a lower FRBR level to the record it belongs to
/// (holdings → manifestation → expression → work).
pub trait LinkGraph: Send + Sync {
    fn get_record(&self, id: RecordId) -> Result<Option<OutputRecord>>;

    /// Insert or overwrite; an overwritten copy is kept as REPLACED history
    fn add_record(&self, record: OutputRecord) -> Result<()>;

    /// Current outputs derived from input record `predecessor_id`
    fn successors_of(&self, predecessor_id: RecordId) -> Result<Vec<RecordId>>;

    /// Ids of records linking *to* `to_id`
    fn get_linked_record_ids(&self, to_id: RecordId) -> Result<Vec<RecordId>>;

    /// Ids `from_id` links to
    fn get_linked_to_record_ids(&self, from_id: RecordId) -> Result<Vec<RecordId>>;

    fn add_link(&self, from_id: RecordId, to_id: RecordId) -> Result<()>;

    fn remove_link(&self, from_id: RecordId, to_id: RecordId) -> Result<()>;

    /// Re-materialize a record with ACTIVE status
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NotFound` if the record does not exist or is not
    /// at `level`.
    fn activate_record(&self, level: FrbrLevel, id: RecordId) -> Result<()>;
}
