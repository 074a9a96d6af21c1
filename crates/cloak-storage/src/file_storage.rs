use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use cloak_core::storage::{check_quota, BackingStore, StorageError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Backing store persisted as one JSON file of ordered `{key, value}` records.
///
/// Every call re-reads the file, so several handles (or processes) on the same
/// path see each other's writes. Writes replace the file atomically.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    quota: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Record {
    key: String,
    value: String,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota: None,
        }
    }

    /// Rejects writes that would grow the stored keys and values past `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Record>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(storage_err)
    }

    fn save(&self, records: &[Record]) -> Result<(), StorageError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            Some(_) => Path::new("."),
            None => {
                return Err(StorageError::Backend {
                    reason: "invalid storage path".to_string(),
                })
            }
        };
        fs::create_dir_all(parent).map_err(storage_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
        let json = serde_json::to_vec(records).map_err(storage_err)?;
        tmp.write_all(&json).map_err(storage_err)?;
        tmp.flush().map_err(storage_err)?;
        tmp.persist(&self.path).map_err(|e| storage_err(e.error))?;
        Ok(())
    }
}

impl BackingStore for FileStorage {
    #[instrument(level = "debug", skip_all)]
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let records = self.load()?;
        Ok(records
            .into_iter()
            .find(|record| record.key == key)
            .map(|record| record.value))
    }

    #[instrument(level = "debug", skip_all)]
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut records = self.load()?;
        check_quota(
            records.iter().map(|r| (r.key.as_str(), r.value.as_str())),
            key,
            value,
            self.quota,
        )?;

        match records.iter_mut().find(|record| record.key == key) {
            Some(record) => record.value = value.to_string(),
            None => records.push(Record {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }

        debug!(path = %self.path.display(), entries = records.len(), "persisting store");
        self.save(&records)
    }

    #[instrument(level = "debug", skip_all)]
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|record| record.key != key);
        if records.len() == before {
            return Ok(());
        }
        self.save(&records)
    }

    #[instrument(level = "debug", skip_all)]
    fn clear(&self) -> Result<(), StorageError> {
        self.save(&[])
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        let records = self.load()?;
        Ok(records.into_iter().nth(index).map(|record| record.key))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.load()?.len())
    }
}

fn storage_err<E: ToString>(err: E) -> StorageError {
    StorageError::Backend {
        reason: err.to_string(),
    }
}
