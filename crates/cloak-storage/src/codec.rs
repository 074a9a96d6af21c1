//! Ready-made value codecs and key hashers for
//! [`SecureStorageOptions`](cloak_core::secure::SecureStorageOptions).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use cloak_core::secure::{KeyHasher, TransformError, ValueCodec};
use sha2::{Digest, Sha256};

use crate::key_provider::{KeyError, KeyMaterial, KeyProvider};

/// Plain base64 (standard alphabet, padded). Obfuscation only.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Codec;

impl ValueCodec for Base64Codec {
    fn encode(&self, plain: &str) -> Result<String, TransformError> {
        Ok(STANDARD.encode(plain))
    }

    fn decode(&self, stored: &str) -> Result<String, TransformError> {
        let bytes = STANDARD.decode(stored).map_err(transform_err)?;
        String::from_utf8(bytes).map_err(transform_err)
    }
}

/// AES-256-GCM with a random nonce per value, stored as `base64url(nonce).base64url(ciphertext)`.
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    const NONCE_LEN: usize = 12;

    pub fn new(material: &KeyMaterial) -> Result<Self, KeyError> {
        let cipher = Aes256Gcm::new_from_slice(&material.bytes)
            .map_err(|e| KeyError::Decode(format!("cipher init failed: {e}")))?;
        Ok(Self { cipher })
    }

    /// Builds a codec from the provider's key, creating the key if needed.
    pub fn from_provider<P: KeyProvider + ?Sized>(provider: &P) -> Result<Self, KeyError> {
        Self::new(&provider.get_or_create()?)
    }
}

impl ValueCodec for AesGcmCodec {
    fn encode(&self, plain: &str) -> Result<String, TransformError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| TransformError::new(format!("encrypt failed: {e}")))?;

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    fn decode(&self, stored: &str) -> Result<String, TransformError> {
        let (nonce, ciphertext) = stored
            .split_once('.')
            .ok_or_else(|| TransformError::new("missing nonce separator"))?;

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|e| TransformError::new(format!("nonce decode failed: {e}")))?;
        if nonce_bytes.len() != Self::NONCE_LEN {
            return Err(TransformError::new(format!(
                "expected {}-byte nonce, got {}",
                Self::NONCE_LEN,
                nonce_bytes.len()
            )));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|e| TransformError::new(format!("ciphertext decode failed: {e}")))?;

        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| TransformError::new(format!("decrypt failed: {e}")))?;
        String::from_utf8(plain).map_err(transform_err)
    }
}

/// Lowercase hex SHA-256 of the key. One-way and not idempotent, so
/// `SecureStorage::entries` cannot look values up; use `physical_entries`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256KeyHasher;

impl KeyHasher for Sha256KeyHasher {
    fn hash(&self, key: &str) -> Result<String, TransformError> {
        Ok(hex::encode(Sha256::digest(key.as_bytes())))
    }
}

/// `sha256:<hex>` keys; input already in that form passes through unchanged,
/// which makes the transform idempotent.
///
/// The pass-through applies to logical keys too: a caller key that is literally
/// `sha256:<64 lowercase hex>` addresses the same entry as the logical key with
/// that digest, and writing it overwrites that entry. Keep such strings out of
/// the logical key space.
#[derive(Debug, Default, Clone, Copy)]
pub struct StableSha256KeyHasher;

impl StableSha256KeyHasher {
    pub const PREFIX: &'static str = "sha256:";

    fn is_hashed(key: &str) -> bool {
        key.strip_prefix(Self::PREFIX).is_some_and(|digest| {
            digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
    }
}

impl KeyHasher for StableSha256KeyHasher {
    fn hash(&self, key: &str) -> Result<String, TransformError> {
        if Self::is_hashed(key) {
            return Ok(key.to_string());
        }
        Ok(format!("{}{}", Self::PREFIX, Sha256KeyHasher.hash(key)?))
    }
}

fn transform_err<E: ToString>(err: E) -> TransformError {
    TransformError::new(err.to_string())
}

#[cfg(test)]
mod tests {
    use cloak_core::{
        secure::{SecureStorage, SecureStorageOptions, SecureStoreError, TransformStage},
        storage::{BackingStore, MemoryStorage},
    };
    use serde_json::json;

    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    fn aes_codec() -> AesGcmCodec {
        AesGcmCodec::from_provider(&InMemoryKeyProvider::default()).expect("codec")
    }

    #[test]
    fn base64_codec_stores_encoded_json_text() {
        let backing = MemoryStorage::new();
        let storage = SecureStorage::with_options(
            backing.clone(),
            SecureStorageOptions::new().codec(Base64Codec),
        );

        storage.write("greeting", "hello").expect("write");
        assert_eq!(
            backing.get("greeting").unwrap(),
            Some(STANDARD.encode("\"hello\""))
        );
        assert_eq!(storage.read("greeting").expect("read"), Some(json!("hello")));
    }

    #[test]
    fn base64_codec_rejects_invalid_input() {
        assert!(Base64Codec.decode("***").is_err());
        // valid base64, invalid UTF-8
        assert!(Base64Codec.decode(&STANDARD.encode([0xffu8, 0xfe])).is_err());
    }

    #[test]
    fn aes_codec_hides_plaintext_and_uses_fresh_nonces() {
        let codec = aes_codec();
        let first = codec.encode("top-secret-payload").expect("encode");
        let second = codec.encode("top-secret-payload").expect("encode");

        assert!(!first.contains("top-secret"));
        assert_ne!(first, second);
        assert_eq!(codec.decode(&first).expect("decode"), "top-secret-payload");
    }

    #[test]
    fn aes_codec_detects_tampering_and_wrong_keys() {
        let codec = aes_codec();
        let stored = codec.encode("{\"balance\":10}").expect("encode");

        let (nonce, ciphertext) = stored.split_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(ciphertext).unwrap();
        bytes[0] ^= 0x01;
        let tampered = format!("{nonce}.{}", URL_SAFE_NO_PAD.encode(bytes));
        assert!(codec.decode(&tampered).is_err());

        assert!(aes_codec().decode(&stored).is_err(), "other key must not decrypt");
        assert!(codec.decode("no-separator").is_err());
        assert!(codec.decode("AAAA.AAAA").is_err(), "short nonce");
    }

    #[test]
    fn encrypted_storage_surfaces_decrypt_failures() {
        let backing = MemoryStorage::new();
        let storage = SecureStorage::with_options(
            backing.clone(),
            SecureStorageOptions::new()
                .key_hasher(Sha256KeyHasher)
                .codec(aes_codec()),
        );
        storage.write("token", &json!({"access": "abc"})).expect("write");
        assert_eq!(
            storage.read("token").expect("read"),
            Some(json!({"access": "abc"}))
        );

        let physical = storage.key(0).expect("key").expect("one entry");
        backing.set(&physical, "garbage.garbage").unwrap();
        let err = storage.read("token").expect_err("tampered entry");
        assert!(matches!(
            err,
            SecureStoreError::Transform { stage: TransformStage::Decrypt, .. }
        ));
    }

    #[test]
    fn sha256_hasher_is_deterministic_hex() {
        let hashed = Sha256KeyHasher.hash("abc").expect("hash");
        assert_eq!(
            hashed,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(Sha256KeyHasher.hash(&hashed).expect("hash"), hashed);
    }

    #[test]
    fn stable_hasher_is_idempotent() {
        let once = StableSha256KeyHasher.hash("user:42").expect("hash");
        assert!(once.starts_with(StableSha256KeyHasher::PREFIX));
        assert_eq!(StableSha256KeyHasher.hash(&once).expect("hash"), once);

        // a digest-shaped logical key shares the entry of the key it digests
        let digest = Sha256KeyHasher.hash("user:42").expect("hash");
        let digest_shaped = format!("sha256:{digest}");
        assert_eq!(StableSha256KeyHasher.hash(&digest_shaped).expect("hash"), once);

        // a lookalike that is not a full digest still gets hashed
        let lookalike = "sha256:abc";
        assert_ne!(StableSha256KeyHasher.hash(lookalike).expect("hash"), lookalike);
    }

    #[test]
    fn entries_depend_on_hash_idempotence() {
        let backing = MemoryStorage::new();
        let stable = SecureStorage::with_options(
            backing.clone(),
            SecureStorageOptions::new()
                .key_hasher(StableSha256KeyHasher)
                .codec(aes_codec()),
        );
        stable.write("a", &1).expect("write");
        stable.write("b", &json!([true])).expect("write");

        let mut values: Vec<_> = stable
            .entries()
            .expect("entries")
            .into_iter()
            .map(|(_, value)| value)
            .collect();
        values.sort_by_key(|value| value.as_ref().map(|v| v.to_string()));
        assert_eq!(values, vec![Some(json!(1)), Some(json!([true]))]);

        let one_way = SecureStorage::with_options(
            MemoryStorage::new(),
            SecureStorageOptions::new().key_hasher(Sha256KeyHasher),
        );
        one_way.write("a", &1).expect("write");
        assert_eq!(one_way.values().expect("values"), vec![None]);
        assert_eq!(
            one_way.physical_entries().expect("physical entries"),
            vec![(Sha256KeyHasher.hash("a").unwrap(), Some(json!(1)))]
        );
    }
}
