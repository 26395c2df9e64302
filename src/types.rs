//! Core types for the history store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Anonymized identifier for a document, derived from its filesystem path.
///
/// The store never interprets this; see [`crate::paths::anonymize_path`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a unit, assigned when the unit is created and
/// preserved across edits. Never reused for a different logical unit.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for one immutable version of a unit.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

impl VersionId {
    /// Hex characters kept from the digest. 64 bits is enough that
    /// collisions are negligible for practical history sizes.
    const LEN: usize = 16;

    /// Mint a fresh version id for a unit snapshot.
    ///
    /// Deterministic over (document, unit, time, content). Under the dedup
    /// invariant this tuple is unique: a content-equal version of the same
    /// unit is always reused instead of minted again.
    pub fn mint(
        document_id: &DocumentId,
        unit_id: &UnitId,
        time: Timestamp,
        content: &UnitContent,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(document_id.0.as_bytes());
        hasher.update(unit_id.0.as_bytes());
        hasher.update(time.0.to_le_bytes());
        let bytes =
            rmp_serde::to_vec(content).expect("content schema always serializes");
        hasher.update(&bytes);
        let digest = hasher.finalize();
        VersionId(hex::encode(digest)[..Self::LEN].to_string())
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since Unix epoch. Events carry their own times; this is the
/// logical timestamp of the triggering action, not of the disk write.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Kind tag for unit content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Code,
    Markdown,
    Raw,
}

/// One output produced by an executable unit, discriminated by type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputRecord {
    DisplayData {
        data: BTreeMap<String, serde_json::Value>,
    },
    ExecuteResult {
        data: BTreeMap<String, serde_json::Value>,
    },
    Stream {
        name: String,
        text: String,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

/// Structured content of a unit at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitContent {
    pub kind: UnitKind,
    pub source: String,
    #[serde(default)]
    pub outputs: Vec<OutputRecord>,
}

/// A unit as it appears in an incoming document snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: UnitId,
    pub content: UnitContent,
}

/// Immutable snapshot of a unit's content at one point in time.
///
/// Once recorded, content never changes; a content change always produces a
/// new `UnitVersion` with a fresh id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitVersion {
    pub version_id: VersionId,
    pub unit_id: UnitId,
    pub created_at: Timestamp,
    pub content: UnitContent,
}

/// The state of a whole document at one instant: an ordered mapping of
/// units to their current versions.
///
/// `unit_order` and `version_order` are positionally aligned and always the
/// same length. A new configuration is recorded only when `version_order`
/// differs from the immediately preceding configuration for the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub document_id: DocumentId,
    pub created_at: Timestamp,
    pub unit_order: Vec<UnitId>,
    pub version_order: Vec<VersionId>,
    /// Ordering of hidden/folded units, if the host tracks one.
    #[serde(default)]
    pub hide_order: Vec<UnitId>,
}

/// Append-only log entry describing a user or system event. Never mutated
/// or deduplicated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub time: Timestamp,
    pub name: String,
    pub document_id: DocumentId,
    pub selected_index: Option<i64>,
    pub selected_indices: Vec<i64>,
}

/// Append-only annotation attached to a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub time: Timestamp,
    pub document_id: DocumentId,
    pub text: String,
}

/// Append-only session log line for a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionLogRecord {
    pub time: Timestamp,
    pub document_id: DocumentId,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(source: &str) -> UnitContent {
        UnitContent {
            kind: UnitKind::Code,
            source: source.into(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn test_version_id_mint_deterministic() {
        let doc = DocumentId("d1".into());
        let unit = UnitId("u1".into());
        let a = VersionId::mint(&doc, &unit, Timestamp(100), &content("x"));
        let b = VersionId::mint(&doc, &unit, Timestamp(100), &content("x"));
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 16);
    }

    #[test]
    fn test_version_id_mint_distinguishes_inputs() {
        let doc = DocumentId("d1".into());
        let unit = UnitId("u1".into());
        let base = VersionId::mint(&doc, &unit, Timestamp(100), &content("x"));

        let other_time = VersionId::mint(&doc, &unit, Timestamp(101), &content("x"));
        let other_content = VersionId::mint(&doc, &unit, Timestamp(100), &content("y"));
        let other_unit =
            VersionId::mint(&doc, &UnitId("u2".into()), Timestamp(100), &content("x"));
        let other_doc =
            VersionId::mint(&DocumentId("d2".into()), &unit, Timestamp(100), &content("x"));

        assert_ne!(base, other_time);
        assert_ne!(base, other_content);
        assert_ne!(base, other_unit);
        assert_ne!(base, other_doc);
    }

    #[test]
    fn test_output_record_tagged_serde() {
        let output = OutputRecord::Stream {
            name: "stdout".into(),
            text: "hi\n".into(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["output_type"], "stream");
        let back: OutputRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, output);
    }
}
