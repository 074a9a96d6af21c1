use std::path::{Path, PathBuf};

use cloak_core::secure::{SecureStorage, SecureStorageOptions};
use cloak_storage::{
    codec::{AesGcmCodec, Sha256KeyHasher, StableSha256KeyHasher},
    file_storage::FileStorage,
    key_provider::{KeyProvider, KeyringProvider},
};
use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;

use crate::config::{Config, KeyHashMode};

const KEYRING_SERVICE: &str = "cloak";
const KEYRING_ACCOUNT: &str = "value-key";

/// Resolve the default store file.
pub fn default_data_file() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("cloak").join("store.json"))
}

/// Build the secure store described by the config, keyed from the OS keychain.
pub fn store_from_config(
    config: &Config,
    data_file: Option<&Path>,
) -> Result<SecureStorage<FileStorage>> {
    let path = match data_file.or(config.data_file.as_deref()) {
        Some(path) => path.to_path_buf(),
        None => default_data_file()?,
    };
    debug!(?path, encrypt = config.encrypt, key_hash = ?config.key_hash, "opening store");

    build_store(
        config,
        path,
        &KeyringProvider::new(KEYRING_SERVICE, KEYRING_ACCOUNT),
    )
}

/// Assemble a store from an explicit key provider; the provider is only consulted when encrypting.
pub fn build_store<P: KeyProvider + ?Sized>(
    config: &Config,
    path: impl Into<PathBuf>,
    keys: &P,
) -> Result<SecureStorage<FileStorage>> {
    let mut backing = FileStorage::new(path);
    if let Some(quota) = config.quota_bytes {
        backing = backing.with_quota(quota);
    }

    let mut options = match config.key_hash {
        KeyHashMode::Plain => SecureStorageOptions::new(),
        KeyHashMode::Sha256 => SecureStorageOptions::new().key_hasher(Sha256KeyHasher),
        KeyHashMode::StableSha256 => SecureStorageOptions::new().key_hasher(StableSha256KeyHasher),
    };
    if config.encrypt {
        let codec = AesGcmCodec::from_provider(keys)
            .map_err(|e| color_eyre::eyre::eyre!("encryption key unavailable: {e}"))?;
        options = options.codec(codec);
    }

    Ok(SecureStorage::with_options(backing, options))
}

/// Helper for tests: a store at `path` using an in-memory key.
#[cfg(test)]
pub fn test_store(config: &Config, path: impl Into<PathBuf>) -> SecureStorage<FileStorage> {
    use cloak_storage::key_provider::InMemoryKeyProvider;

    build_store(config, path, &InMemoryKeyProvider::default()).expect("test store")
}
