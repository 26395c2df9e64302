//! Durable append-only relations.
//!
//! Each persisted relation lives in its own log file; nothing in it is
//! ever updated or deleted, only inserted.

pub mod log;

pub use log::{RelationIter, RelationLog};
