//! Path anonymization and storage-location resolution.

use crate::error::{Result, StoreError};
use crate::types::DocumentId;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Hex characters kept from the path digest. Eight characters of a
/// cryptographic digest keep the collision probability negligible for
/// practical document counts.
const DOCUMENT_ID_LEN: usize = 8;

/// Directory name under the user's home for the default store location.
const DATA_DIR_NAME: &str = ".palimpsest";

/// File inside the default location that may override the data directory.
const CONFIG_FILE_NAME: &str = "config.json";

/// Derive a stable, semantically meaningless identifier from a document
/// path. Same path, same id; the store treats it as opaque.
pub fn anonymize_path(path: &str) -> DocumentId {
    let digest = Sha256::digest(path.as_bytes());
    DocumentId(hex::encode(digest)[..DOCUMENT_ID_LEN].to_string())
}

/// User settings for where history data lives.
#[derive(Debug, Default, Deserialize)]
struct StorageSettings {
    data_directory: Option<PathBuf>,
}

/// Resolve the directory holding the durable store, creating it if absent.
///
/// The default is `~/.palimpsest`; a `config.json` inside it may point
/// `data_directory` somewhere else. An unreadable config file is ignored
/// with a warning rather than blocking recording.
pub fn resolve_storage_dir() -> Result<PathBuf> {
    resolve_in(default_storage_dir()?)
}

fn default_storage_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| StoreError::Unavailable("no home directory".into()))?;
    Ok(home.join(DATA_DIR_NAME))
}

fn resolve_in(base: PathBuf) -> Result<PathBuf> {
    let mut dir = base.clone();

    let config_path = base.join(CONFIG_FILE_NAME);
    if config_path.is_file() {
        let raw = std::fs::read(&config_path)?;
        match serde_json::from_slice::<StorageSettings>(&raw) {
            Ok(settings) => {
                if let Some(overridden) = settings.data_directory {
                    dir = overridden;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %config_path.display(),
                    "ignoring unreadable storage config");
            }
        }
    }

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
