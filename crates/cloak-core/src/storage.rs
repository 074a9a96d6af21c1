use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

/// Errors produced by backing store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The write would grow the store beyond its configured size.
    #[error("storage quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Backend { reason: String },
}

/// Synchronous, ordered string key-value store wrapped by [`crate::secure::SecureStorage`].
///
/// Stores may be shared with other actors, so every method takes `&self` and
/// implementations handle their own interior mutability.
pub trait BackingStore: Send + Sync {
    /// Raw value for a key, `None` when no entry exists.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Persist a value under a key, overwriting any existing entry.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key and its value (idempotent).
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every entry.
    fn clear(&self) -> Result<(), StorageError>;

    /// Key at an ordinal position, `None` when out of range.
    fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

    /// Number of entries.
    fn len(&self) -> Result<usize, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl<S: BackingStore + ?Sized> BackingStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }

    fn clear(&self) -> Result<(), StorageError> {
        (**self).clear()
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        (**self).key(index)
    }

    fn len(&self) -> Result<usize, StorageError> {
        (**self).len()
    }
}

impl<S: BackingStore + ?Sized> BackingStore for &S {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }

    fn clear(&self) -> Result<(), StorageError> {
        (**self).clear()
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        (**self).key(index)
    }

    fn len(&self) -> Result<usize, StorageError> {
        (**self).len()
    }
}

/// Checks that replacing (or inserting) `key` with `value` keeps the store within `limit`.
///
/// Size is counted as the UTF-8 length of every key plus its value.
pub fn check_quota<'a, I>(
    entries: I,
    key: &str,
    value: &str,
    limit: Option<usize>,
) -> Result<(), StorageError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let Some(limit) = limit else {
        return Ok(());
    };

    let others: usize = entries
        .into_iter()
        .filter(|(k, _)| *k != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
    let needed = others + key.len() + value.len();

    if needed > limit {
        return Err(StorageError::QuotaExceeded { needed, limit });
    }
    Ok(())
}

/// In-memory backing store for tests and ephemeral sessions.
///
/// Clones share the same entries, so two handles behave like two views of one
/// physical store. Entries enumerate in insertion order; overwriting keeps a
/// key's position.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Vec<(String, String)>>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes growing it past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            inner: Arc::default(),
            quota: Some(bytes),
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<(String, String)>>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Backend {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl BackingStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries()?;
        Ok(entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        check_quota(
            entries.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            key,
            value,
            self.quota,
        )?;

        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => entries.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        entries.retain(|(k, _)| k != key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries()?.clear();
        Ok(())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        let entries = self.entries()?;
        Ok(entries.get(index).map(|(k, _)| k.clone()))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries()?.len())
    }
}
