//! Input records as handed over by the upstream classifier
//!
//! Field extraction happens upstream; an `InputRecord` only carries what the
//! linkage engine reads: the leader type code, the organization namespace,
//! the bib's control numbers, a holding's referenced bibs and the LCCN-style
//! match value.

use biblink_storage::{ControlKey, RecordId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStatus {
    #[default]
    Active,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Bib,
    Holding,
}

impl RecordKind {
    const BIB_TYPES: &'static str = "abcdefghijkmnoprt";
    const HOLDING_TYPES: &'static str = "uvxy";

    /// Classify by leader position 06; `None` means skip the record
    pub fn from_leader06(code: char) -> Option<Self> {
        if Self::BIB_TYPES.contains(code) {
            Some(RecordKind::Bib)
        } else if Self::HOLDING_TYPES.contains(code) {
            Some(RecordKind::Holding)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub id: RecordId,
    #[serde(default)]
    pub status: InputStatus,
    #[serde(default)]
    pub leader06: Option<char>,
    #[serde(default)]
    pub org_code: Option<String>,
    /// Primary control number (001)
    #[serde(default)]
    pub control_number: Option<String>,
    /// System control numbers (035), used when there is no primary one
    #[serde(default)]
    pub system_control_numbers: Vec<String>,
    /// Control numbers of the bibs a holding describes (004)
    #[serde(default)]
    pub referenced_bibs: Vec<String>,
    /// LCCN-style match value (010$a)
    #[serde(default)]
    pub lccn: Option<String>,
}

impl InputRecord {
    fn empty(id: RecordId) -> Self {
        Self {
            id,
            status: InputStatus::Active,
            leader06: None,
            org_code: None,
            control_number: None,
            system_control_numbers: Vec::new(),
            referenced_bibs: Vec::new(),
            lccn: None,
        }
    }

    pub fn bib(id: RecordId, org: impl Into<String>, control_number: impl Into<String>) -> Self {
        Self {
            leader06: Some('a'),
            org_code: Some(org.into()),
            control_number: Some(control_number.into()),
            ..Self::empty(id)
        }
    }

    pub fn holding<I, S>(id: RecordId, org: impl Into<String>, referenced_bibs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            leader06: Some('x'),
            org_code: Some(org.into()),
            referenced_bibs: referenced_bibs.into_iter().map(Into::into).collect(),
            ..Self::empty(id)
        }
    }

    pub fn deleted(id: RecordId) -> Self {
        Self {
            status: InputStatus::Deleted,
            ..Self::empty(id)
        }
    }

    pub fn with_lccn(mut self, lccn: impl Into<String>) -> Self {
        self.lccn = Some(lccn.into());
        self
    }

    pub fn with_leader06(mut self, code: char) -> Self {
        self.leader06 = Some(code);
        self
    }

    pub fn with_system_control_numbers<I, S>(mut self, numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_control_numbers = numbers.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_control_number(mut self) -> Self {
        self.control_number = None;
        self
    }

    pub fn without_org_code(mut self) -> Self {
        self.org_code = None;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.status == InputStatus::Deleted
    }

    pub fn kind(&self) -> Option<RecordKind> {
        self.leader06.and_then(RecordKind::from_leader06)
    }

    /// Identity keys of a bib: the primary control number, or else every
    /// system control number
    pub fn bib_control_numbers(&self) -> Vec<&str> {
        match self.control_number.as_deref() {
            Some(cn) if !cn.trim().is_empty() => vec![cn],
            _ => unique_by_key(self.system_control_numbers.iter().map(String::as_str)),
        }
    }

    /// Referenced bibs, one per distinct control key, in input order
    pub fn referenced_control_numbers(&self) -> Vec<&str> {
        unique_by_key(self.referenced_bibs.iter().map(String::as_str))
    }
}

fn unique_by_key<'a>(numbers: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::<ControlKey>::new();
    let mut out = Vec::new();
    for cn in numbers.filter(|cn| !cn.trim().is_empty()) {
        let key = ControlKey::parse(cn);
        if !seen.contains(&key) {
            seen.push(key);
            out.push(cn);
        }
    }
    out
}
