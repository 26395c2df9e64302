//! Version reconciliation.
//!
//! Given the previous configuration of a document and a fresh snapshot of
//! its units, decide which units are unchanged (reuse an existing version
//! id), which revert to an earlier version (reuse that id), and which are
//! genuinely new (mint a version). Pure decision logic: all reads and
//! writes go through the injected [`VersionStore`] and store errors
//! propagate unchanged.

use crate::error::Result;
use crate::types::{
    DocumentConfig, DocumentId, Timestamp, UnitContent, UnitId, UnitKind, UnitSnapshot,
    UnitVersion, VersionId,
};

/// Read/write surface the reconciler needs from the store.
///
/// Implementations must let queued (not-yet-flushed) records take
/// precedence over durable ones, so reconciliation is never stale relative
/// to earlier writes from the same process.
pub trait VersionStore {
    /// Most recent configuration recorded for a document, if any.
    fn last_config(&self, document_id: &DocumentId) -> Result<Option<DocumentConfig>>;

    /// Look up a version by id.
    fn unit_version(&self, version_id: &VersionId) -> Result<Option<UnitVersion>>;

    /// Every version ever recorded for a unit, newest first.
    fn unit_versions(&self, unit_id: &UnitId) -> Result<Vec<UnitVersion>>;

    /// Queue a new unit version for persistence.
    fn record_unit_version(
        &self,
        time: Timestamp,
        unit_id: UnitId,
        version_id: VersionId,
        content: UnitContent,
    ) -> Result<()>;

    /// Queue a new document configuration for persistence.
    fn record_config(
        &self,
        time: Timestamp,
        document_id: DocumentId,
        unit_order: Vec<UnitId>,
        version_order: Vec<VersionId>,
        hide_order: Vec<UnitId>,
    ) -> Result<()>;
}

/// Reconciliation options.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiffOptions {
    /// Also require output equality when matching code units. Trades dedup
    /// recall for output fidelity; off by default.
    pub compare_outputs: bool,
}

/// Outcome of reconciling one snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub unit_order: Vec<UnitId>,
    pub version_order: Vec<VersionId>,
    /// Whether a new configuration was recorded.
    pub changed: bool,
}

/// Reconcile a document snapshot against its recorded history.
///
/// For each unit, in document order: reuse the version from the previous
/// configuration if the content is unchanged; otherwise reuse the most
/// recent content-equal version anywhere in the unit's history (the undo
/// pattern); otherwise mint and record a new version. A new configuration
/// is recorded only when the resulting `version_order` differs from the
/// previous configuration's.
pub fn reconcile<S: VersionStore + ?Sized>(
    store: &S,
    time: Timestamp,
    document_id: &DocumentId,
    units: &[UnitSnapshot],
    hide_order: &[UnitId],
    options: DiffOptions,
) -> Result<Reconciliation> {
    let previous = store.last_config(document_id)?;

    let Some(previous) = previous else {
        // First sighting of this document: every unit is new.
        let mut unit_order = Vec::with_capacity(units.len());
        let mut version_order = Vec::with_capacity(units.len());
        for unit in units {
            let version_id = VersionId::mint(document_id, &unit.unit_id, time, &unit.content);
            store.record_unit_version(
                time,
                unit.unit_id.clone(),
                version_id.clone(),
                unit.content.clone(),
            )?;
            unit_order.push(unit.unit_id.clone());
            version_order.push(version_id);
        }
        store.record_config(
            time,
            document_id.clone(),
            unit_order.clone(),
            version_order.clone(),
            hide_order.to_vec(),
        )?;
        return Ok(Reconciliation {
            unit_order,
            version_order,
            changed: true,
        });
    };

    // Reconstruct the versions the previous configuration referenced.
    let mut previous_versions = Vec::with_capacity(previous.version_order.len());
    for version_id in &previous.version_order {
        if let Some(version) = store.unit_version(version_id)? {
            previous_versions.push(version);
        }
    }

    let mut unit_order = Vec::with_capacity(units.len());
    let mut version_order = Vec::with_capacity(units.len());

    for unit in units {
        let version_id = match find_match(store, &previous_versions, unit, options)? {
            Some(existing) => existing,
            None => {
                let minted = VersionId::mint(document_id, &unit.unit_id, time, &unit.content);
                store.record_unit_version(
                    time,
                    unit.unit_id.clone(),
                    minted.clone(),
                    unit.content.clone(),
                )?;
                minted
            }
        };
        unit_order.push(unit.unit_id.clone());
        version_order.push(version_id);
    }

    let changed = version_order != previous.version_order;
    if changed {
        store.record_config(
            time,
            document_id.clone(),
            unit_order.clone(),
            version_order.clone(),
            hide_order.to_vec(),
        )?;
    }

    Ok(Reconciliation {
        unit_order,
        version_order,
        changed,
    })
}

/// Find an existing version id for a snapshot unit, or `None` if one must
/// be minted.
fn find_match<S: VersionStore + ?Sized>(
    store: &S,
    previous_versions: &[UnitVersion],
    unit: &UnitSnapshot,
    options: DiffOptions,
) -> Result<Option<VersionId>> {
    // Common case: the unit is unchanged since the previous configuration.
    if let Some(prior) = previous_versions
        .iter()
        .find(|v| v.unit_id == unit.unit_id)
    {
        if content_equal(&prior.content, &unit.content, options.compare_outputs) {
            return Ok(Some(prior.version_id.clone()));
        }
    }

    // Undo pattern: exact earlier content reappearing after intervening
    // edits. The most recent matching historical version wins.
    for version in store.unit_versions(&unit.unit_id)? {
        if content_equal(&version.content, &unit.content, options.compare_outputs) {
            return Ok(Some(version.version_id));
        }
    }

    Ok(None)
}

/// Content-equality rule.
///
/// Two snapshots are equal iff kind and source match exactly. With
/// `compare_outputs`, code units additionally need the same outputs: same
/// count, and positionally the same type tag with equal data bundle,
/// stream text, or error value depending on the type.
pub fn content_equal(a: &UnitContent, b: &UnitContent, compare_outputs: bool) -> bool {
    if a.kind != b.kind || a.source != b.source {
        return false;
    }

    if !compare_outputs || a.kind != UnitKind::Code {
        return true;
    }

    if a.outputs.len() != b.outputs.len() {
        return false;
    }
    a.outputs
        .iter()
        .zip(&b.outputs)
        .all(|(x, y)| output_equal(x, y))
}

fn output_equal(a: &crate::types::OutputRecord, b: &crate::types::OutputRecord) -> bool {
    use crate::types::OutputRecord::*;
    match (a, b) {
        (DisplayData { data: x }, DisplayData { data: y }) => x == y,
        (ExecuteResult { data: x }, ExecuteResult { data: y }) => x == y,
        (Stream { text: x, .. }, Stream { text: y, .. }) => x == y,
        (Error { evalue: x, .. }, Error { evalue: y, .. }) => x == y,
        _ => false,
    }
}
