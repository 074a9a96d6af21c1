use std::{fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::storage::{BackingStore, StorageError};

/// Failure raised by a key transform or value codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransformError {
    pub reason: String,
}

impl TransformError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Which injected function failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    Hash,
    Encrypt,
    Decrypt,
}

impl fmt::Display for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransformStage::Hash => "hash",
            TransformStage::Encrypt => "encrypt",
            TransformStage::Decrypt => "decrypt",
        })
    }
}

/// Errors surfaced by [`SecureStorage`]. Nothing is logged or swallowed internally.
#[derive(Debug, Error)]
pub enum SecureStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{stage} transform failed: {source}")]
    Transform {
        stage: TransformStage,
        #[source]
        source: TransformError,
    },
    #[error("value could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("stored value for key {key} is not valid JSON: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A text-to-text function applied to keys or serialized values.
pub type Transform = Arc<dyn Fn(&str) -> Result<String, TransformError> + Send + Sync>;

/// Reversible text codec applied to serialized values (usually encryption).
pub trait ValueCodec: Send + Sync {
    fn encode(&self, plain: &str) -> Result<String, TransformError>;
    fn decode(&self, stored: &str) -> Result<String, TransformError>;
}

/// Deterministic mapping from logical to physical keys.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &str) -> Result<String, TransformError>;
}

fn identity() -> Transform {
    Arc::new(|input: &str| -> Result<String, TransformError> { Ok(input.to_string()) })
}

/// Optional transforms for a [`SecureStorage`]; anything unset is the identity.
#[derive(Clone, Default)]
pub struct SecureStorageOptions {
    hash: Option<Transform>,
    encrypt: Option<Transform>,
    decrypt: Option<Transform>,
}

impl SecureStorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key transform applied to every logical key.
    pub fn hash<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    {
        self.hash = Some(Arc::new(f));
        self
    }

    /// Encoder applied to serialized values before they are written.
    pub fn encrypt<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    {
        self.encrypt = Some(Arc::new(f));
        self
    }

    /// Decoder applied to raw stored text before it is parsed.
    pub fn decrypt<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    {
        self.decrypt = Some(Arc::new(f));
        self
    }

    /// Sets both `encrypt` and `decrypt` from one codec.
    pub fn codec<C: ValueCodec + 'static>(self, codec: C) -> Self {
        let codec = Arc::new(codec);
        let decoder = Arc::clone(&codec);
        self.encrypt(move |plain| codec.encode(plain))
            .decrypt(move |stored| decoder.decode(stored))
    }

    /// Sets `hash` from a [`KeyHasher`].
    pub fn key_hasher<H: KeyHasher + 'static>(self, hasher: H) -> Self {
        self.hash(move |key| hasher.hash(key))
    }
}

impl fmt::Debug for SecureStorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStorageOptions")
            .field("hash", &self.hash.is_some())
            .field("encrypt", &self.encrypt.is_some())
            .field("decrypt", &self.decrypt.is_some())
            .finish()
    }
}

/// Facade over a [`BackingStore`] that obfuscates keys and encodes JSON values.
///
/// Every operation is a stateless pipeline: transform, delegate, transform.
/// Physical entries are `(hash(key), encrypt(json(value)))`.
pub struct SecureStorage<S: BackingStore> {
    store: S,
    hash: Transform,
    encrypt: Transform,
    decrypt: Transform,
}

impl<S: BackingStore> SecureStorage<S> {
    /// Wraps `store` with identity transforms.
    pub fn new(store: S) -> Self {
        Self::with_options(store, SecureStorageOptions::default())
    }

    pub fn with_options(store: S, options: SecureStorageOptions) -> Self {
        Self {
            store,
            hash: options.hash.unwrap_or_else(identity),
            encrypt: options.encrypt.unwrap_or_else(identity),
            decrypt: options.decrypt.unwrap_or_else(identity),
        }
    }

    /// The wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn physical_key(&self, key: &str) -> Result<String, SecureStoreError> {
        (self.hash)(key).map_err(|source| SecureStoreError::Transform {
            stage: TransformStage::Hash,
            source,
        })
    }

    /// Reads and decodes the value stored at a physical key.
    fn load<T: DeserializeOwned>(&self, physical: &str) -> Result<Option<T>, SecureStoreError> {
        let Some(raw) = self.store.get(physical)? else {
            debug!(key = %physical, "no entry");
            return Ok(None);
        };

        let plain = (self.decrypt)(&raw).map_err(|source| SecureStoreError::Transform {
            stage: TransformStage::Decrypt,
            source,
        })?;
        serde_json::from_str(&plain)
            .map(Some)
            .map_err(|source| SecureStoreError::Deserialize {
                key: physical.to_string(),
                source,
            })
    }

    /// Value stored under a logical key; `None` when there is no entry.
    #[instrument(level = "debug", skip_all)]
    pub fn read(&self, key: &str) -> Result<Option<Value>, SecureStoreError> {
        self.read_as(key)
    }

    /// Like [`read`](Self::read), deserializing into `T`.
    #[instrument(level = "debug", skip_all)]
    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SecureStoreError> {
        let physical = self.physical_key(key)?;
        self.load(&physical)
    }

    /// Serializes, encodes and stores `value`, overwriting any existing entry.
    #[instrument(level = "debug", skip_all)]
    pub fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), SecureStoreError> {
        let json = serde_json::to_string(value).map_err(SecureStoreError::Serialize)?;
        let encoded = (self.encrypt)(&json).map_err(|source| SecureStoreError::Transform {
            stage: TransformStage::Encrypt,
            source,
        })?;
        let physical = self.physical_key(key)?;

        debug!(key = %physical, bytes = encoded.len(), "writing entry");
        self.store.set(&physical, &encoded)?;
        Ok(())
    }

    /// Removes the entry for a logical key (idempotent).
    #[instrument(level = "debug", skip_all)]
    pub fn remove(&self, key: &str) -> Result<(), SecureStoreError> {
        let physical = self.physical_key(key)?;
        debug!(key = %physical, "removing entry");
        self.store.remove(&physical)?;
        Ok(())
    }

    /// Clears the whole backing store, including entries other facades wrote.
    #[instrument(level = "debug", skip_all)]
    pub fn clear(&self) -> Result<(), SecureStoreError> {
        self.store.clear()?;
        Ok(())
    }

    /// Physical key at `index`. The key transform is one-way, so this is never the logical key.
    pub fn key(&self, index: usize) -> Result<Option<String>, SecureStoreError> {
        Ok(self.store.key(index)?)
    }

    /// Number of entries in the backing store.
    pub fn len(&self) -> Result<usize, SecureStoreError> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, SecureStoreError> {
        Ok(self.len()? == 0)
    }

    /// Physical keys in backing-store order.
    ///
    /// Positions that no longer hold a key (the store shrank mid-enumeration) are skipped;
    /// no snapshot is taken.
    pub fn keys(&self) -> Result<Vec<String>, SecureStoreError> {
        let count = self.store.len()?;
        let mut keys = Vec::with_capacity(count);
        for index in 0..count {
            if let Some(key) = self.store.key(index)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// `read(k)` for every `k` in [`keys`](Self::keys).
    ///
    /// The keys are physical, and `read` hashes them again. Results are only
    /// complete when the key transform is the identity or idempotent; otherwise a
    /// lookup for `hash(hash(k))` misses and yields `None`. Use
    /// [`physical_entries`](Self::physical_entries) for one-way transforms.
    pub fn values(&self) -> Result<Vec<Option<Value>>, SecureStoreError> {
        self.keys()?.iter().map(|key| self.read(key)).collect()
    }

    /// `(k, read(k))` for every `k` in [`keys`](Self::keys). Same caveat as
    /// [`values`](Self::values).
    pub fn entries(&self) -> Result<Vec<(String, Option<Value>)>, SecureStoreError> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let value = self.read(&key)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Physical keys paired with their decoded values, read without re-hashing.
    pub fn physical_entries(&self) -> Result<Vec<(String, Option<Value>)>, SecureStoreError> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let value = self.load(&key)?;
                Ok((key, value))
            })
            .collect()
    }
}

impl<S: BackingStore + fmt::Debug> fmt::Debug for SecureStorage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStorage")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
