//! # File-Backed Shared Record Store
//!
//! One file per key inside a directory, guarded by an `fs2` exclusive lock on
//! a `LOCK` file, so peers in separate processes on one host share the
//! leader slot. Writes go through a temporary file and a rename.

use crate::ports::SharedRecordStore;
use fs2::FileExt;
use shared_types::StorageError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileRecordStore {
    dir: PathBuf,
    quota_bytes: Option<u64>,
}

/// Exclusive lock released on drop.
struct DirLock {
    file: File,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileRecordStore {
    const LOCK_FILE: &'static str = "LOCK";

    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(unavailable)?;
        debug!(dir = %dir.display(), "File record store opened");
        Ok(Self {
            dir,
            quota_bytes: None,
        })
    }

    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<DirLock, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(Self::LOCK_FILE))
            .map_err(unavailable)?;
        file.lock_exclusive().map_err(unavailable)?;
        Ok(DirLock { file })
    }

    /// Map a key to a file name, replacing anything outside `[A-Za-z0-9._-]`.
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    fn used_bytes_excluding(&self, skip: &Path) -> Result<u64, StorageError> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir).map_err(unavailable)? {
            let entry = entry.map_err(unavailable)?;
            let path = entry.path();
            if path == skip || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            total += entry.metadata().map_err(unavailable)?.len();
        }
        Ok(total)
    }
}

impl SharedRecordStore for FileRecordStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _lock = self.lock()?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        let path = self.path_for(key);
        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes_excluding(&path)?;
            if used + value.len() as u64 > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(unavailable)?;
        fs::rename(&tmp, &path).map_err(unavailable)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn unavailable(error: io::Error) -> StorageError {
    StorageError::Unavailable(error.to_string())
}
