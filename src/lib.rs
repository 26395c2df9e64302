//! # Palimpsest
//!
//! An append-only history store for documents made of ordered,
//! independently editable units (e.g. notebook cells). Every user action
//! delivers a full snapshot of the document; the store deduplicates
//! unchanged units so each distinct version is kept exactly once, and
//! batches durable writes behind a debounce timer so keystroke-rate events
//! do not hammer the disk.
//!
//! ## Core concepts
//!
//! - **Unit versions**: immutable content snapshots, minted only when
//!   content actually changes; reverting a unit reuses its old version id
//! - **Document configurations**: the ordered unit-to-version mapping at
//!   one instant, recorded only when it differs from the previous one
//! - **Write queues**: every record is queued in memory and flushed in one
//!   all-or-nothing batch after a quiet period; a termination event
//!   flushes synchronously so nothing is lost when the session ends
//!
//! ## Example
//!
//! ```ignore
//! use palimpsest::{anonymize_path, Store, StoreConfig};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./history".into(),
//!     ..Default::default()
//! })?;
//!
//! let document = anonymize_path("/home/user/analysis.ipynb");
//! let outcome = store.record_action(&event, &document)?;
//! assert!(outcome.changed);
//! ```

pub mod debounce;
pub mod diff;
pub mod error;
pub mod events;
pub mod paths;
pub mod relations;
pub mod store;
pub mod types;

// Re-exports
pub use debounce::DebounceTimer;
pub use diff::{content_equal, reconcile, DiffOptions, Reconciliation, VersionStore};
pub use error::{Result, StoreError};
pub use events::{ActionEvent, CommentEvent, Event, LogEvent};
pub use paths::{anonymize_path, resolve_storage_dir};
pub use relations::{RelationIter, RelationLog};
pub use store::{Store, StoreConfig};
pub use types::*;
