//! Inbound event payloads.
//!
//! The request handler delivers arbitrary JSON with a `type` discriminator;
//! this module gives those payloads a schema and validates them before
//! anything reaches the engine. A payload that does not parse, or an
//! action whose snapshot is internally inconsistent, is rejected as
//! [`StoreError::MalformedEvent`] with the queues untouched.

use crate::error::{Result, StoreError};
use crate::types::{Timestamp, UnitId, UnitSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An inbound event, discriminated by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Action(ActionEvent),
    Log(LogEvent),
    Comment(CommentEvent),
}

/// A user or system action carrying a full snapshot of the document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionEvent {
    pub name: String,
    pub time: Timestamp,
    #[serde(default)]
    pub selected_index: Option<i64>,
    #[serde(default)]
    pub selected_indices: Vec<i64>,
    /// The document's units at the moment of the action, in order.
    pub units: Vec<UnitSnapshot>,
    /// Ordering of hidden/folded units, if the host tracks one.
    #[serde(default)]
    pub hidden: Vec<UnitId>,
}

impl ActionEvent {
    /// Action name the host sends when the document is closing. Triggers a
    /// synchronous flush regardless of the debounce timer.
    pub const TERMINATION: &'static str = "document-closed";

    /// Whether this action signals session termination.
    pub fn is_termination(&self) -> bool {
        self.name == Self::TERMINATION
    }

    /// Reject snapshots that cannot be reconciled.
    ///
    /// Two units sharing a `unit_id` in one snapshot would make the stored
    /// order/version pairing ambiguous, so the whole event is refused.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.units.len());
        for unit in &self.units {
            if !seen.insert(&unit.unit_id) {
                return Err(StoreError::MalformedEvent(format!(
                    "duplicate unit id {} in snapshot",
                    unit.unit_id
                )));
            }
        }
        Ok(())
    }
}

/// A session log line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEvent {
    pub time: Timestamp,
    pub message: String,
}

/// A user comment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommentEvent {
    pub time: Timestamp,
    pub text: String,
}

/// Parse a raw JSON payload into a typed event.
pub fn parse(raw: serde_json::Value) -> Result<Event> {
    serde_json::from_value(raw).map_err(|e| StoreError::MalformedEvent(e.to_string()))
}
