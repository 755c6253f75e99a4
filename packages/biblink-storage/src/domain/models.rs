//! Domain models shared by the identity engine and its stores

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, StorageError};

/// Internal record identifier (input records, output records, manifestation ids)
pub type RecordId = i64;

// ═══════════════════════════════════════════════════════════════════════════
// Identity keys
// ═══════════════════════════════════════════════════════════════════════════

/// Control-number key inside one organization namespace
///
/// Control numbers that parse as an integer (after trimming) are keyed
/// numerically, so `" 0012"` and `"12"` name the same bib. Anything else is
/// keyed by its raw, untrimmed text. The two variants never compare equal, so
/// a numeric key and a textual key cannot collide.
///
/// # Examples
///
/// ```rust
/// use biblink_storage::domain::ControlKey;
///
/// assert_eq!(ControlKey::parse(" 123 "), ControlKey::Numeric(123));
/// assert_eq!(ControlKey::parse("ocm123"), ControlKey::Text("ocm123".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ControlKey {
    Numeric(i64),
    Text(String),
}

impl ControlKey {
    /// Persisted discriminator for numeric keys
    pub const NUMERIC_TYPE: i64 = 0;
    /// Persisted discriminator for text keys
    pub const TEXT_TYPE: i64 = 1;

    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(n) => ControlKey::Numeric(n),
            Err(_) => ControlKey::Text(raw.to_string()),
        }
    }

    pub fn key_type(&self) -> i64 {
        match self {
            ControlKey::Numeric(_) => Self::NUMERIC_TYPE,
            ControlKey::Text(_) => Self::TEXT_TYPE,
        }
    }

    /// Text form used as the persisted key column
    pub fn key_text(&self) -> Cow<'_, str> {
        match self {
            ControlKey::Numeric(n) => Cow::Owned(n.to_string()),
            ControlKey::Text(s) => Cow::Borrowed(s.as_str()),
        }
    }

    /// Rebuild a key from its persisted `(key_type, key_text)` pair
    pub fn from_parts(key_type: i64, key_text: &str) -> Result<Self> {
        match key_type {
            Self::NUMERIC_TYPE => key_text
                .parse::<i64>()
                .map(ControlKey::Numeric)
                .map_err(|e| {
                    StorageError::serialization(format!(
                        "numeric control key '{}' is not an integer",
                        key_text
                    ))
                    .with_source(e)
                }),
            Self::TEXT_TYPE => Ok(ControlKey::Text(key_text.to_string())),
            other => Err(StorageError::new(
                ErrorKind::Serialization,
                format!("unknown control key type {}", other),
            )),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKey::Numeric(n) => write!(f, "{}", n),
            ControlKey::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Which logical sub-map an identity entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// The bib itself has been materialized
    Processed,
    /// Referenced by a holding, bib not yet seen
    Reserved,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Processed => "processed",
            IdentityKind::Reserved => "reserved",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "processed" => Ok(IdentityKind::Processed),
            "reserved" => Ok(IdentityKind::Reserved),
            _ => Err(StorageError::serialization(format!(
                "Invalid identity kind: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `(org, control_number) -> manifestation_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub org: String,
    pub key: ControlKey,
    pub manifestation_id: RecordId,
}

impl IdentityEntry {
    pub fn new(org: impl Into<String>, key: ControlKey, manifestation_id: RecordId) -> Self {
        Self {
            org: org.into(),
            key,
            manifestation_id,
        }
    }
}

/// Added/removed overlay for both identity sub-maps, accumulated over one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDelta {
    pub added_processed: Vec<IdentityEntry>,
    pub removed_processed: Vec<IdentityEntry>,
    pub added_reserved: Vec<IdentityEntry>,
    pub removed_reserved: Vec<IdentityEntry>,
}

impl IdentityDelta {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.added_processed.len()
            + self.removed_processed.len()
            + self.added_reserved.len()
            + self.removed_reserved.len()
    }
}

/// Persisted contents of one organization's identity maps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub processed: Vec<(ControlKey, RecordId)>,
    pub reserved: Vec<(ControlKey, RecordId)>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Held links and match points
// ═══════════════════════════════════════════════════════════════════════════

/// A holding emitted HELD against a reserved manifestation id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeldLink {
    pub holding_id: RecordId,
    pub manifestation_id: RecordId,
}

impl HeldLink {
    pub fn new(holding_id: RecordId, manifestation_id: RecordId) -> Self {
        Self {
            holding_id,
            manifestation_id,
        }
    }
}

/// One `record_id -> key` row of a match-point table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchpointEntry {
    pub record_id: RecordId,
    pub key: i64,
}

impl MatchpointEntry {
    pub fn new(record_id: RecordId, key: i64) -> Self {
        Self { record_id, key }
    }
}

/// Row counts of one persisted match-point table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchpointStats {
    /// Distinct source records with a key
    pub records: usize,
    /// Distinct keys
    pub keys: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// Output records
// ═══════════════════════════════════════════════════════════════════════════

/// Output record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Materialized and fully linked
    Active,
    /// Materialized, but at least one referenced identity is unresolved
    Held,
    /// Source record removed
    Deleted,
    /// Superseded by a newer materialization of the same entity
    Replaced,
}

impl RecordStatus {
    pub fn as_char(&self) -> char {
        match self {
            RecordStatus::Active => 'A',
            RecordStatus::Held => 'H',
            RecordStatus::Deleted => 'D',
            RecordStatus::Replaced => 'R',
        }
    }

    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'A' => Ok(RecordStatus::Active),
            'H' => Ok(RecordStatus::Held),
            'D' => Ok(RecordStatus::Deleted),
            'R' => Ok(RecordStatus::Replaced),
            _ => Err(StorageError::serialization(format!(
                "Invalid record status: {}",
                c
            ))),
        }
    }
}

/// FRBR level of an output record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrbrLevel {
    Work,
    Expression,
    Manifestation,
    Holdings,
}

impl FrbrLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrbrLevel::Work => "work",
            FrbrLevel::Expression => "expression",
            FrbrLevel::Manifestation => "manifestation",
            FrbrLevel::Holdings => "holdings",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "work" => Ok(FrbrLevel::Work),
            "expression" => Ok(FrbrLevel::Expression),
            "manifestation" => Ok(FrbrLevel::Manifestation),
            "holdings" => Ok(FrbrLevel::Holdings),
            _ => Err(StorageError::serialization(format!(
                "Invalid FRBR level: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for FrbrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bibs a holdings record points at, kept so the reference set can be
/// re-derived when one of those bibs disappears
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibReferences {
    pub org_code: String,
    pub control_numbers: Vec<String>,
}

impl BibReferences {
    pub fn new(org_code: impl Into<String>, control_numbers: Vec<String>) -> Self {
        Self {
            org_code: org_code.into(),
            control_numbers,
        }
    }
}

/// Materialized output record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: RecordId,
    pub level: FrbrLevel,
    pub status: RecordStatus,
    /// Input record this output was derived from
    pub predecessor_id: Option<RecordId>,
    /// Holdings only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<BibReferences>,
    pub updated_at: DateTime<Utc>,
}

impl OutputRecord {
    pub fn new(id: RecordId, level: FrbrLevel) -> Self {
        Self {
            id,
            level,
            status: RecordStatus::Active,
            predecessor_id: None,
            references: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_predecessor(mut self, predecessor_id: RecordId) -> Self {
        self.predecessor_id = Some(predecessor_id);
        self
    }

    pub fn with_references(mut self, references: BibReferences) -> Self {
        self.references = Some(references);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.status == RecordStatus::Deleted
    }

    /// Copy of this record carrying a new status and timestamp
    pub fn restated(&self, status: RecordStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_key_parse_numeric() {
        assert_eq!(ControlKey::parse("123"), ControlKey::Numeric(123));
        assert_eq!(ControlKey::parse("  0042 "), ControlKey::Numeric(42));
        assert_eq!(ControlKey::parse("-7"), ControlKey::Numeric(-7));
    }

    #[test]
    fn test_control_key_parse_text_keeps_raw() {
        assert_eq!(
            ControlKey::parse(" ocm 12 "),
            ControlKey::Text(" ocm 12 ".to_string())
        );
        // too large for i64
        assert_eq!(
            ControlKey::parse("99999999999999999999"),
            ControlKey::Text("99999999999999999999".to_string())
        );
    }

    #[test]
    fn test_control_key_variants_never_collide() {
        let numeric = ControlKey::parse("12");
        let text = ControlKey::Text("12".to_string());
        assert_ne!(numeric, text);
        assert_eq!(numeric.key_text(), text.key_text());
        assert_ne!(numeric.key_type(), text.key_type());
    }

    #[test]
    fn test_control_key_from_parts() {
        let key = ControlKey::parse("ocm0001");
        let rebuilt = ControlKey::from_parts(key.key_type(), &key.key_text()).unwrap();
        assert_eq!(rebuilt, key);

        assert!(ControlKey::from_parts(ControlKey::NUMERIC_TYPE, "abc").is_err());
        assert!(ControlKey::from_parts(9, "abc").is_err());
    }

    #[test]
    fn test_identity_kind_from_str() {
        assert_eq!(
            IdentityKind::from_str("processed").unwrap(),
            IdentityKind::Processed
        );
        assert_eq!(
            IdentityKind::from_str("reserved").unwrap(),
            IdentityKind::Reserved
        );
        assert!(IdentityKind::from_str("pending").is_err());
    }

    #[test]
    fn test_identity_delta_len() {
        let mut delta = IdentityDelta::default();
        assert!(delta.is_empty());

        delta
            .added_reserved
            .push(IdentityEntry::new("X", ControlKey::Numeric(1), 10));
        delta
            .removed_processed
            .push(IdentityEntry::new("X", ControlKey::Numeric(2), 11));
        assert_eq!(delta.len(), 2);
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_record_status_chars() {
        for status in [
            RecordStatus::Active,
            RecordStatus::Held,
            RecordStatus::Deleted,
            RecordStatus::Replaced,
        ] {
            assert_eq!(RecordStatus::from_char(status.as_char()).unwrap(), status);
        }
        assert!(RecordStatus::from_char('Z').is_err());
    }

    #[test]
    fn test_frbr_level_from_str() {
        assert_eq!(FrbrLevel::from_str("holdings").unwrap(), FrbrLevel::Holdings);
        assert!(FrbrLevel::from_str("item").is_err());
    }

    #[test]
    fn test_output_record_restated() {
        let record = OutputRecord::new(5, FrbrLevel::Holdings)
            .with_status(RecordStatus::Held)
            .with_predecessor(1)
            .with_references(BibReferences::new("X", vec!["123".into()]));

        let active = record.restated(RecordStatus::Active);
        assert_eq!(active.id, 5);
        assert_eq!(active.status, RecordStatus::Active);
        assert_eq!(active.references, record.references);
        assert_eq!(active.predecessor_id, Some(1));
    }

    #[test]
    fn test_output_record_serde() {
        let record = OutputRecord::new(9, FrbrLevel::Manifestation);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("manifestation"));
        assert!(!json.contains("references"));

        let back: OutputRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
