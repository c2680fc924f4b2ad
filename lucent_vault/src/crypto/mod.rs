//! Lucent Vault - Cryptographic Core

pub mod aead;
pub mod keys;
pub mod keystore;

pub use aead::{open, seal, BlobDomain};
pub use keys::{KeyManager, VaultKey};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
