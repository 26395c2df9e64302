//! The version store: write queues, debounced flush, merged reads.
//!
//! Owns all durable state. Mutating calls append to in-memory queues and
//! arm a debounce timer; after a quiet period the queues are flushed to the
//! relation logs in one all-or-nothing batch. Reads merge queued and
//! durable records, queued taking precedence, so they are never stale
//! relative to earlier writes from the same process.

use crate::debounce::DebounceTimer;
use crate::diff::{self, DiffOptions, Reconciliation, VersionStore};
use crate::error::{Result, StoreError};
use crate::events::{self, ActionEvent, CommentEvent, Event, LogEvent};
use crate::relations::RelationLog;
use crate::types::{
    ActionRecord, CommentRecord, DocumentConfig, DocumentId, SessionLogRecord, Timestamp,
    UnitContent, UnitId, UnitVersion, VersionId,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"PLM\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const ACTIONS_MAGIC: [u8; 4] = *b"ACT\0";
const VERSIONS_MAGIC: [u8; 4] = *b"VER\0";
const CONFIGS_MAGIC: [u8; 4] = *b"CFG\0";
const SESSION_LOGS_MAGIC: [u8; 4] = *b"SLG\0";
const COMMENTS_MAGIC: [u8; 4] = *b"CMT\0";

/// Store configuration. One instance per store; nothing here is global.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the relation logs.
    pub path: PathBuf,

    /// Quiet period before queued writes are flushed.
    pub debounce: Duration,

    /// Require output equality when matching code units (see
    /// [`DiffOptions::compare_outputs`]).
    pub compare_outputs: bool,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./history"),
            debounce: Duration::from_secs(2),
            compare_outputs: false,
            create_if_missing: true,
        }
    }
}

/// Queued records awaiting the next flush. Append-only between flushes;
/// relative order within each queue is preserved on disk.
#[derive(Default)]
struct WriteQueues {
    actions: Vec<ActionRecord>,
    versions: Vec<UnitVersion>,
    configs: Vec<DocumentConfig>,
    session_logs: Vec<SessionLogRecord>,
    comments: Vec<CommentRecord>,
}

impl WriteQueues {
    fn is_empty(&self) -> bool {
        self.actions.is_empty()
            && self.versions.is_empty()
            && self.configs.is_empty()
            && self.session_logs.is_empty()
            && self.comments.is_empty()
    }

    fn len(&self) -> usize {
        self.actions.len()
            + self.versions.len()
            + self.configs.len()
            + self.session_logs.len()
            + self.comments.len()
    }

    fn snapshot(&self) -> WriteQueues {
        WriteQueues {
            actions: self.actions.clone(),
            versions: self.versions.clone(),
            configs: self.configs.clone(),
            session_logs: self.session_logs.clone(),
            comments: self.comments.clone(),
        }
    }
}

/// Offsets of durable entries, rebuilt from the relation logs on open.
#[derive(Default)]
struct Indexes {
    version_by_id: HashMap<VersionId, u64>,
    /// Offsets in append order (oldest first).
    versions_by_unit: HashMap<UnitId, Vec<u64>>,
    /// Offsets in append order (oldest first).
    configs_by_document: HashMap<DocumentId, Vec<u64>>,
}

struct Inner {
    config: StoreConfig,

    /// Exclusive lock on the store directory.
    _lock_file: File,

    actions: RelationLog<ActionRecord>,
    versions: RelationLog<UnitVersion>,
    configs: RelationLog<DocumentConfig>,
    session_logs: RelationLog<SessionLogRecord>,
    comments: RelationLog<CommentRecord>,

    queues: Mutex<WriteQueues>,
    indexes: RwLock<Indexes>,

    /// Serializes flushes and gates merged reads, so a read never observes
    /// the window where a record has left the queue but is not yet indexed.
    flush_lock: Mutex<()>,

    timer: DebounceTimer,
}

/// The version store.
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::init(config)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        Self::init(config)
    }

    fn init(config: StoreConfig) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let actions = RelationLog::open(config.path.join("actions.log"), ACTIONS_MAGIC)?;
        let versions: RelationLog<UnitVersion> =
            RelationLog::open(config.path.join("versions.log"), VERSIONS_MAGIC)?;
        let configs: RelationLog<DocumentConfig> =
            RelationLog::open(config.path.join("configs.log"), CONFIGS_MAGIC)?;
        let session_logs =
            RelationLog::open(config.path.join("session_logs.log"), SESSION_LOGS_MAGIC)?;
        let comments = RelationLog::open(config.path.join("comments.log"), COMMENTS_MAGIC)?;

        // Rebuild point/range indexes from the logs (not persisted).
        let mut indexes = Indexes::default();
        for entry in versions.iter() {
            let (offset, version) = entry?;
            indexes
                .version_by_id
                .insert(version.version_id.clone(), offset);
            indexes
                .versions_by_unit
                .entry(version.unit_id)
                .or_default()
                .push(offset);
        }
        for entry in configs.iter() {
            let (offset, record) = entry?;
            indexes
                .configs_by_document
                .entry(record.document_id)
                .or_default()
                .push(offset);
        }

        let debounce = config.debounce;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let timer = DebounceTimer::spawn(debounce, move || {
                let Some(inner) = weak.upgrade() else { return };
                if let Err(e) = inner.flush() {
                    tracing::error!(error = %e, "debounced flush failed; queue retained for retry");
                }
            });

            Inner {
                config,
                _lock_file: lock_file,
                actions,
                versions,
                configs,
                session_logs,
                comments,
                queues: Mutex::new(WriteQueues::default()),
                indexes: RwLock::new(indexes),
                flush_lock: Mutex::new(()),
                timer,
            }
        });

        Ok(Self { inner })
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }

    // --- Event entry points ---

    /// Dispatch a raw inbound event on its `type` discriminator.
    ///
    /// Returns the reconciliation outcome for action events, `None` for
    /// annotation events.
    pub fn apply_event(
        &self,
        raw: serde_json::Value,
        document_id: &DocumentId,
    ) -> Result<Option<Reconciliation>> {
        match events::parse(raw)? {
            Event::Action(action) => self.record_action(&action, document_id).map(Some),
            Event::Log(log) => {
                self.record_session_log(&log, document_id)?;
                Ok(None)
            }
            Event::Comment(comment) => {
                self.record_comment(&comment, document_id)?;
                Ok(None)
            }
        }
    }

    /// Record an action: append the action record, reconcile the event's
    /// snapshot against history, and schedule (or, on termination, force)
    /// a flush.
    pub fn record_action(
        &self,
        event: &ActionEvent,
        document_id: &DocumentId,
    ) -> Result<Reconciliation> {
        event.validate()?;

        self.inner.queues.lock().actions.push(ActionRecord {
            time: event.time,
            name: event.name.clone(),
            document_id: document_id.clone(),
            selected_index: event.selected_index,
            selected_indices: event.selected_indices.clone(),
        });

        let options = DiffOptions {
            compare_outputs: self.inner.config.compare_outputs,
        };
        let outcome = diff::reconcile(
            &*self.inner,
            event.time,
            document_id,
            &event.units,
            &event.hidden,
            options,
        )?;

        if event.is_termination() {
            // Flush before the host closes the document; no data may sit in
            // the queue once this call returns.
            self.inner.timer.cancel();
            self.inner.flush()?;
        } else {
            self.inner.timer.arm();
        }

        Ok(outcome)
    }

    /// Record a comment annotation.
    pub fn record_comment(&self, event: &CommentEvent, document_id: &DocumentId) -> Result<()> {
        self.inner.queues.lock().comments.push(CommentRecord {
            time: event.time,
            document_id: document_id.clone(),
            text: event.text.clone(),
        });
        self.inner.timer.arm();
        Ok(())
    }

    /// Record a session log line.
    pub fn record_session_log(&self, event: &LogEvent, document_id: &DocumentId) -> Result<()> {
        self.inner.queues.lock().session_logs.push(SessionLogRecord {
            time: event.time,
            document_id: document_id.clone(),
            message: event.message.clone(),
        });
        self.inner.timer.arm();
        Ok(())
    }

    /// Flush all queued records to durable storage now.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Number of queued records awaiting flush.
    pub fn pending_writes(&self) -> usize {
        self.inner.queues.lock().len()
    }

    // --- Reads (queued entries take precedence over durable ones) ---

    /// Most recent configuration for a document, or `None`.
    pub fn get_last_config(&self, document_id: &DocumentId) -> Result<Option<DocumentConfig>> {
        self.inner.last_config(document_id)
    }

    /// Version by id, or `None`. Absence is a normal outcome, never an
    /// error.
    pub fn get_last_unit_version(&self, version_id: &VersionId) -> Result<Option<UnitVersion>> {
        self.inner.unit_version(version_id)
    }

    /// Every version ever recorded for a unit, newest first.
    pub fn get_all_unit_versions(&self, unit_id: &UnitId) -> Result<Vec<UnitVersion>> {
        self.inner.unit_versions(unit_id)
    }

    /// Configurations for a document within `[start, end]`, oldest first.
    pub fn get_configs(
        &self,
        document_id: &DocumentId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DocumentConfig>> {
        self.inner.configs_between(document_id, start, end)
    }

    /// Look up versions by id, in request order. Missing ids are skipped.
    pub fn get_versions(&self, version_ids: &[VersionId]) -> Result<Vec<UnitVersion>> {
        let mut result = Vec::with_capacity(version_ids.len());
        for version_id in version_ids {
            if let Some(version) = self.inner.unit_version(version_id)? {
                result.push(version);
            }
        }
        Ok(result)
    }

    /// The versions one unit moved through within a document's
    /// configurations in `[start, end]`, oldest first, consecutive
    /// repeats collapsed.
    pub fn get_unit_history(
        &self,
        document_id: &DocumentId,
        start: Timestamp,
        end: Timestamp,
        unit_id: &UnitId,
    ) -> Result<Vec<UnitVersion>> {
        let configs = self.inner.configs_between(document_id, start, end)?;

        let mut history = Vec::new();
        let mut last_seen: Option<VersionId> = None;
        for config in &configs {
            let Some(position) = config.unit_order.iter().position(|u| u == unit_id) else {
                continue;
            };
            let version_id = &config.version_order[position];
            if last_seen.as_ref() == Some(version_id) {
                continue;
            }
            last_seen = Some(version_id.clone());
            if let Some(version) = self.inner.unit_version(version_id)? {
                history.push(version);
            }
        }
        Ok(history)
    }

    /// All comments, oldest first.
    pub fn get_comments(&self) -> Result<Vec<CommentRecord>> {
        self.inner.comments_all()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Stop the timer first so no fire races the final flush.
        self.inner.timer.shutdown();
        if let Err(e) = self.inner.flush() {
            tracing::error!(error = %e, "final flush on close failed");
        }
    }
}

impl Inner {
    /// Write all queued records to the relation logs in one all-or-nothing
    /// batch.
    ///
    /// Entries stay queued until they are durably written *and* indexed;
    /// only then is exactly the snapshotted prefix drained, so appends
    /// racing the flush are neither lost nor duplicated. On failure every
    /// log is rolled back to its pre-flush size and the queues are left
    /// intact for retry.
    fn flush(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();

        let batch = {
            let queues = self.queues.lock();
            if queues.is_empty() {
                return Ok(());
            }
            queues.snapshot()
        };

        let actions_size = self.actions.size();
        let versions_size = self.versions.size();
        let configs_size = self.configs.size();
        let session_logs_size = self.session_logs.size();
        let comments_size = self.comments.size();

        match self.write_batch(&batch) {
            Ok((version_offsets, config_offsets)) => {
                let mut queues = self.queues.lock();
                let mut indexes = self.indexes.write();

                for (version, offset) in batch.versions.iter().zip(version_offsets) {
                    indexes
                        .version_by_id
                        .insert(version.version_id.clone(), offset);
                    indexes
                        .versions_by_unit
                        .entry(version.unit_id.clone())
                        .or_default()
                        .push(offset);
                }
                for (record, offset) in batch.configs.iter().zip(config_offsets) {
                    indexes
                        .configs_by_document
                        .entry(record.document_id.clone())
                        .or_default()
                        .push(offset);
                }

                // Drop exactly the snapshotted prefix; anything appended
                // while the batch was being written stays queued.
                queues.actions.drain(..batch.actions.len());
                queues.versions.drain(..batch.versions.len());
                queues.configs.drain(..batch.configs.len());
                queues.session_logs.drain(..batch.session_logs.len());
                queues.comments.drain(..batch.comments.len());

                tracing::debug!(records = batch.len(), "flushed write queues");
                Ok(())
            }
            Err(e) => {
                let rollbacks = [
                    self.actions.truncate(actions_size),
                    self.versions.truncate(versions_size),
                    self.configs.truncate(configs_size),
                    self.session_logs.truncate(session_logs_size),
                    self.comments.truncate(comments_size),
                ];
                for rollback in rollbacks {
                    if let Err(re) = rollback {
                        tracing::error!(error = %re, "rollback truncate failed");
                    }
                }
                Err(e)
            }
        }
    }

    fn write_batch(&self, batch: &WriteQueues) -> Result<(Vec<u64>, Vec<u64>)> {
        for action in &batch.actions {
            self.actions.append(action)?;
        }

        let mut version_offsets = Vec::with_capacity(batch.versions.len());
        for version in &batch.versions {
            version_offsets.push(self.versions.append(version)?);
        }

        let mut config_offsets = Vec::with_capacity(batch.configs.len());
        for record in &batch.configs {
            config_offsets.push(self.configs.append(record)?);
        }

        for log in &batch.session_logs {
            self.session_logs.append(log)?;
        }
        for comment in &batch.comments {
            self.comments.append(comment)?;
        }

        self.actions.sync()?;
        self.versions.sync()?;
        self.configs.sync()?;
        self.session_logs.sync()?;
        self.comments.sync()?;

        Ok((version_offsets, config_offsets))
    }

    fn configs_between(
        &self,
        document_id: &DocumentId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DocumentConfig>> {
        let _flush = self.flush_lock.lock();

        let offsets = self
            .indexes
            .read()
            .configs_by_document
            .get(document_id)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for offset in offsets {
            let record = self.configs.read_at(offset)?;
            if record.created_at >= start && record.created_at <= end {
                result.push(record);
            }
        }

        // Queued configurations are strictly newer than durable ones.
        let queues = self.queues.lock();
        for record in &queues.configs {
            if &record.document_id == document_id
                && record.created_at >= start
                && record.created_at <= end
            {
                result.push(record.clone());
            }
        }

        Ok(result)
    }

    fn comments_all(&self) -> Result<Vec<CommentRecord>> {
        let _flush = self.flush_lock.lock();

        let mut result = Vec::new();
        for entry in self.comments.iter() {
            result.push(entry?.1);
        }
        let queues = self.queues.lock();
        result.extend(queues.comments.iter().cloned());
        Ok(result)
    }
}

impl VersionStore for Inner {
    fn last_config(&self, document_id: &DocumentId) -> Result<Option<DocumentConfig>> {
        let _flush = self.flush_lock.lock();

        {
            let queues = self.queues.lock();
            if let Some(found) = queues
                .configs
                .iter()
                .rev()
                .find(|c| &c.document_id == document_id)
            {
                return Ok(Some(found.clone()));
            }
        }

        let offset = self
            .indexes
            .read()
            .configs_by_document
            .get(document_id)
            .and_then(|offsets| offsets.last().copied());

        match offset {
            Some(offset) => Ok(Some(self.configs.read_at(offset)?)),
            None => Ok(None),
        }
    }

    fn unit_version(&self, version_id: &VersionId) -> Result<Option<UnitVersion>> {
        let _flush = self.flush_lock.lock();

        {
            let queues = self.queues.lock();
            if let Some(found) = queues
                .versions
                .iter()
                .rev()
                .find(|v| &v.version_id == version_id)
            {
                return Ok(Some(found.clone()));
            }
        }

        let offset = self.indexes.read().version_by_id.get(version_id).copied();
        match offset {
            Some(offset) => Ok(Some(self.versions.read_at(offset)?)),
            None => Ok(None),
        }
    }

    fn unit_versions(&self, unit_id: &UnitId) -> Result<Vec<UnitVersion>> {
        let _flush = self.flush_lock.lock();

        // Queued entries first (they are strictly newer), newest first.
        let mut result: Vec<UnitVersion> = {
            let queues = self.queues.lock();
            queues
                .versions
                .iter()
                .rev()
                .filter(|v| &v.unit_id == unit_id)
                .cloned()
                .collect()
        };

        let offsets = self
            .indexes
            .read()
            .versions_by_unit
            .get(unit_id)
            .cloned()
            .unwrap_or_default();
        for offset in offsets.into_iter().rev() {
            result.push(self.versions.read_at(offset)?);
        }

        Ok(result)
    }

    fn record_unit_version(
        &self,
        time: Timestamp,
        unit_id: UnitId,
        version_id: VersionId,
        content: UnitContent,
    ) -> Result<()> {
        self.queues.lock().versions.push(UnitVersion {
            version_id,
            unit_id,
            created_at: time,
            content,
        });
        self.timer.arm();
        Ok(())
    }

    fn record_config(
        &self,
        time: Timestamp,
        document_id: DocumentId,
        unit_order: Vec<UnitId>,
        version_order: Vec<VersionId>,
        hide_order: Vec<UnitId>,
    ) -> Result<()> {
        debug_assert_eq!(unit_order.len(), version_order.len());
        self.queues.lock().configs.push(DocumentConfig {
            document_id,
            created_at: time,
            unit_order,
            version_order,
            hide_order,
        });
        self.timer.arm();
        Ok(())
    }
}
