//! Core abstractions for Cloak: the backing store contract and the secure storage facade.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod secure;
pub mod storage;
