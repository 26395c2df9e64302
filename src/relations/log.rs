//! Append-only relation log.
//!
//! One file per relation: a fixed header (magic + format version) followed
//! by length-prefixed MessagePack entries, each with a CRC32 trailer. A
//! torn trailing entry (partial write from a crash) is detected on open and
//! truncated away; everything before it is intact.

use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Header size: 4 bytes magic + 1 byte version.
const HEADER_SIZE: u64 = 5;

/// Sanity bound on a single entry.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

struct LogFile {
    file: File,
    size: u64,
}

/// Append-only log of one relation's records.
pub struct RelationLog<T> {
    path: PathBuf,
    inner: Mutex<LogFile>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> RelationLog<T> {
    /// Open or create the log, verifying the header and recovering from a
    /// torn tail if the last write was interrupted.
    pub fn open(path: impl AsRef<Path>, magic: [u8; 4]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut size = file.metadata()?.len();

        if size == 0 {
            file.write_all(&magic)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
            size = HEADER_SIZE;
        } else {
            Self::verify_header(&mut file, &magic)?;
            let valid_end = Self::scan_valid_end(&mut file, size)?;
            if valid_end < size {
                tracing::warn!(
                    path = %path.display(),
                    lost = size - valid_end,
                    "truncating torn tail of relation log"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
                size = valid_end;
            }
        }

        Ok(Self {
            path,
            inner: Mutex::new(LogFile { file, size }),
            _marker: PhantomData,
        })
    }

    fn verify_header(file: &mut File, magic: &[u8; 4]) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;

        let mut found = [0u8; 4];
        file.read_exact(&mut found)?;
        if &found != magic {
            return Err(StoreError::InvalidFormat("invalid relation magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported relation log version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    /// Walk the frames and return the end offset of the last complete,
    /// checksum-valid entry.
    fn scan_valid_end(file: &mut File, file_size: u64) -> Result<u64> {
        let mut offset = HEADER_SIZE;

        while offset < file_size {
            if offset + 4 > file_size {
                break;
            }
            file.seek(SeekFrom::Start(offset))?;

            let mut len_bytes = [0u8; 4];
            file.read_exact(&mut len_bytes)?;
            let len = u32::from_le_bytes(len_bytes) as u64;
            if len as usize > MAX_ENTRY_SIZE || offset + 4 + len + 4 > file_size {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            file.read_exact(&mut payload)?;

            let mut crc_bytes = [0u8; 4];
            file.read_exact(&mut crc_bytes)?;
            if u32::from_le_bytes(crc_bytes) != crc32fast::hash(&payload) {
                break;
            }

            offset += 4 + len + 4;
        }

        Ok(offset)
    }

    /// Append one entry. Returns the offset it was written at.
    ///
    /// The write is buffered by the OS; call [`sync`](Self::sync) to make
    /// it durable.
    pub fn append(&self, entry: &T) -> Result<u64> {
        let payload = rmp_serde::to_vec(entry)?;
        if payload.len() > MAX_ENTRY_SIZE {
            return Err(StoreError::Serialization(format!(
                "entry of {} bytes exceeds maximum",
                payload.len()
            )));
        }

        let mut inner = self.inner.lock();
        let offset = inner.size;

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        inner.file.write_all(&payload)?;
        inner
            .file
            .write_all(&crc32fast::hash(&payload).to_le_bytes())?;

        inner.size = offset + 4 + payload.len() as u64 + 4;
        Ok(offset)
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    /// Roll the log back to a previous size. Used to undo a partially
    /// written batch when a flush fails.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if size > inner.size {
            return Err(StoreError::Corruption(format!(
                "cannot truncate {} forward to {}",
                inner.size, size
            )));
        }
        inner.file.set_len(size)?;
        inner.file.sync_all()?;
        inner.size = size;
        Ok(())
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the entry at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<T> {
        Ok(self.read_frame(offset)?.0)
    }

    /// Iterate all entries in append order, yielding `(offset, entry)`.
    pub fn iter(&self) -> RelationIter<'_, T> {
        RelationIter {
            log: self,
            offset: HEADER_SIZE,
            end: self.size(),
        }
    }

    /// Read one frame, returning the entry and the offset just past it.
    fn read_frame(&self, offset: u64) -> Result<(T, u64)> {
        let mut inner = self.inner.lock();

        if offset + 4 > inner.size {
            return Err(StoreError::Corruption(format!(
                "relation read past end of log at offset {}",
                offset
            )));
        }
        inner.file.seek(SeekFrom::Start(offset))?;

        let mut len_bytes = [0u8; 4];
        inner.file.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_ENTRY_SIZE {
            return Err(StoreError::Corruption("relation entry too large".into()));
        }

        let mut payload = vec![0u8; len];
        inner.file.read_exact(&mut payload)?;

        let mut crc_bytes = [0u8; 4];
        inner.file.read_exact(&mut crc_bytes)?;
        let stored = u32::from_le_bytes(crc_bytes);
        let computed = crc32fast::hash(&payload);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let entry = rmp_serde::from_slice(&payload)?;
        Ok((entry, offset + 4 + len as u64 + 4))
    }
}

/// Iterator over entries of a relation log.
pub struct RelationIter<'a, T> {
    log: &'a RelationLog<T>,
    offset: u64,
    end: u64,
}

impl<T: Serialize + DeserializeOwned> Iterator for RelationIter<'_, T> {
    type Item = Result<(u64, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let current = self.offset;
        match self.log.read_frame(current) {
            Ok((entry, next)) => {
                self.offset = next;
                Some(Ok((current, entry)))
            }
            Err(e) => {
                // Stop iteration after a bad frame.
                self.offset = self.end;
                Some(Err(e))
            }
        }
    }
}
