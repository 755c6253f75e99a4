//! Match-Point Index
//!
//! Duplicate detection over one normalized field (the LCCN-style control
//! number). Keys are shared freely between records; they never carry
//! identity.
//!
//! Memory layout depends on the cache mode:
//! - full cache: both directions of the whole table live in memory
//! - partial: only `record -> key` is loaded; `key -> records` holds the
//!   unflushed additions and everything else is queried from the store

use std::collections::BTreeSet;

use biblink_storage::{MatchpointEntry, MatchpointStats, MatchpointStore, RecordId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::Result;

/// Table holding LCCN match points
pub const LCCN_TABLE: &str = "matchpoints_010a";

/// Token delimiters: ASCII whitespace except vertical tab
const TOKEN_DELIMITERS: &[char] = &[' ', '\t', '\n', '\r', '\u{000C}'];

/// Normalized match key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Numeric(i64),
    /// Does not participate in matching
    Invalid,
}

impl MatchKey {
    pub fn value(&self) -> Option<i64> {
        match self {
            MatchKey::Numeric(n) => Some(*n),
            MatchKey::Invalid => None,
        }
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn parse_positive(digits: &str) -> MatchKey {
    match digits.parse::<i64>() {
        Ok(n) if n >= 1 => MatchKey::Numeric(n),
        _ => MatchKey::Invalid,
    }
}

fn strip_non_digits(token: &str) -> String {
    token.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize an LCCN-style value
///
/// - first token numeric: that is the key
/// - first token of at most three characters: treated as a prefix; the
///   second token is used, numeric as-is or with non-digits stripped
/// - otherwise the first token has its non-digits stripped
///
/// Anything that leaves no digits, overflows, or comes out below 1 is
/// `Invalid`. Never panics.
pub fn normalize(raw: &str) -> MatchKey {
    let mut tokens = raw.split(TOKEN_DELIMITERS).filter(|t| !t.is_empty());

    let Some(first) = tokens.next() else {
        debug!(raw, "empty match value");
        return MatchKey::Invalid;
    };
    if is_numeric(first) {
        return parse_positive(first);
    }

    let candidate = if first.chars().count() <= 3 {
        match tokens.next() {
            Some(next) if is_numeric(next) => return parse_positive(next),
            Some(next) => next,
            None => {
                debug!(raw, "prefix without number");
                return MatchKey::Invalid;
            }
        }
    } else {
        first
    };

    let key = parse_positive(&strip_non_digits(candidate));
    if key == MatchKey::Invalid {
        debug!(raw, "no usable digits in match value");
    }
    key
}

// ═══════════════════════════════════════════════════════════════════════════
// Index
// ═══════════════════════════════════════════════════════════════════════════

pub struct MatchPointIndex {
    table: String,
    full_cache: bool,
    intermediate_persistence: bool,
    key_to_ids: FxHashMap<i64, BTreeSet<RecordId>>,
    id_to_key: FxHashMap<RecordId, i64>,
    added: FxHashMap<RecordId, i64>,
    removed: FxHashSet<RecordId>,
}

impl MatchPointIndex {
    pub fn new(table: impl Into<String>, full_cache: bool, intermediate_persistence: bool) -> Self {
        Self {
            table: table.into(),
            full_cache,
            intermediate_persistence,
            key_to_ids: FxHashMap::default(),
            id_to_key: FxHashMap::default(),
            added: FxHashMap::default(),
            removed: FxHashSet::default(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Replace in-memory state with the persisted table
    pub fn load<S: MatchpointStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.key_to_ids.clear();
        self.id_to_key.clear();
        self.added.clear();
        self.removed.clear();

        for entry in store.load_matchpoints(&self.table)? {
            self.id_to_key.insert(entry.record_id, entry.key);
            if self.full_cache {
                self.key_to_ids
                    .entry(entry.key)
                    .or_default()
                    .insert(entry.record_id);
            }
        }
        debug!(
            table = %self.table,
            records = self.id_to_key.len(),
            full_cache = self.full_cache,
            "loaded match points"
        );
        Ok(())
    }

    /// Record `record_id`'s key; returns false if the value has no valid key
    pub fn add(&mut self, record_id: RecordId, raw_value: &str) -> bool {
        let MatchKey::Numeric(key) = normalize(raw_value) else {
            return false;
        };
        if let Some(old) = self.id_to_key.insert(record_id, key) {
            if old != key {
                self.unlink(old, record_id);
            }
        }
        self.key_to_ids.entry(key).or_default().insert(record_id);
        self.added.insert(record_id, key);
        self.removed.remove(&record_id);
        true
    }

    pub fn remove(&mut self, record_id: RecordId) -> bool {
        let Some(key) = self.id_to_key.remove(&record_id) else {
            return false;
        };
        self.unlink(key, record_id);
        self.added.remove(&record_id);
        self.removed.insert(record_id);
        true
    }

    fn unlink(&mut self, key: i64, record_id: RecordId) {
        if let Some(ids) = self.key_to_ids.get_mut(&key) {
            ids.remove(&record_id);
            if ids.is_empty() {
                self.key_to_ids.remove(&key);
            }
        }
    }

    /// Other records sharing `raw_value`'s key
    pub fn candidates<S: MatchpointStore + ?Sized>(
        &self,
        store: &S,
        raw_value: &str,
        excluding_id: RecordId,
    ) -> Result<Vec<RecordId>> {
        let MatchKey::Numeric(key) = normalize(raw_value) else {
            return Ok(Vec::new());
        };

        let mut found: BTreeSet<RecordId> =
            self.key_to_ids.get(&key).cloned().unwrap_or_default();
        if !self.full_cache {
            for id in store.query_matchpoint(&self.table, key)? {
                // persisted rows may be stale until the next flush
                if !self.removed.contains(&id) && self.id_to_key.get(&id) == Some(&key) {
                    found.insert(id);
                }
            }
        }
        found.remove(&excluding_id);
        Ok(found.into_iter().collect())
    }

    /// Whether `raw_value` gives `record_id` a different key than it has now
    pub fn changed(&self, record_id: RecordId, raw_value: &str) -> bool {
        normalize(raw_value).value() != self.id_to_key.get(&record_id).copied()
    }

    pub fn key_of(&self, record_id: RecordId) -> Option<i64> {
        self.id_to_key.get(&record_id).copied()
    }

    /// Persist queued removals and additions
    ///
    /// Returns the number of rows written or deleted. With intermediate
    /// persistence off, every in-memory entry is rewritten.
    pub fn persist<S: MatchpointStore + ?Sized>(&self, store: &S) -> Result<usize> {
        let mut removed: Vec<RecordId> = self.removed.iter().copied().collect();
        removed.sort_unstable();
        for id in &removed {
            store.delete_matchpoint_row(&self.table, *id)?;
        }

        let source = if self.intermediate_persistence {
            &self.added
        } else {
            &self.id_to_key
        };
        let mut entries: Vec<MatchpointEntry> = source
            .iter()
            .map(|(id, key)| MatchpointEntry::new(*id, *key))
            .collect();
        entries.sort_by_key(|e| e.record_id);
        if !entries.is_empty() {
            store.persist_matchpoint_deltas(&self.table, &entries)?;
        }
        Ok(removed.len() + entries.len())
    }

    pub fn clear_delta(&mut self) {
        self.added.clear();
        self.removed.clear();
        if !self.full_cache {
            self.key_to_ids.clear();
        }
    }

    /// Persist and clear in one step (forced flush)
    pub fn flush<S: MatchpointStore + ?Sized>(&mut self, store: &S) -> Result<usize> {
        let written = self.persist(store)?;
        self.clear_delta();
        Ok(written)
    }

    pub fn has_pending_delta(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Records with a key in memory
    pub fn records_in_memory(&self) -> usize {
        self.id_to_key.len()
    }

    pub fn stats<S: MatchpointStore + ?Sized>(&self, store: &S) -> Result<MatchpointStats> {
        Ok(store.matchpoint_stats(&self.table)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
