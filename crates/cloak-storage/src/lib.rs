//! Concrete collaborators for the Cloak facade: a durable file-backed store,
//! value codecs (AES-GCM, base64), key hashers, and encryption key providers.

pub mod codec;
pub mod file_storage;
pub mod key_provider;
