//! Lucent Vault - Key Store
//!
//! The vault master key never touches disk in the clear. It is sealed with
//! XChaCha20-Poly1305 under a key-encryption key derived from the user's
//! passphrase with Argon2id.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::{random_bytes, VaultKey, KEY_LEN, XCHACHA_NONCE_LEN};
use crate::config::KdfParams;
use crate::error::{VaultError, VaultResult};

/// Key store file name inside the vault root
pub const KEYSTORE_FILE: &str = "keystore.json";

const SALT_LEN: usize = 16;
const RECORD_VERSION: u32 = 1;
const SEAL_AAD: &[u8] = b"LUCENT:KEYSTORE:v1";

/// Source of the vault master key
pub trait KeyStore: Send + Sync {
    /// Whether a sealed key has been created
    fn exists(&self) -> bool;

    /// Generate and seal a new master key
    fn create(&self, passphrase: &SecretString) -> VaultResult<VaultKey>;

    /// Unseal the master key
    fn unlock(&self, passphrase: &SecretString) -> VaultResult<VaultKey>;
}

/// Persisted form of a sealed master key
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedKeyRecord {
    version: u32,
    kdf: KdfParams,
    salt: String,
    nonce: String,
    sealed_key: String,
}

impl SealedKeyRecord {
    fn seal(master: &VaultKey, passphrase: &SecretString, kdf: KdfParams) -> VaultResult<Self> {
        let salt: [u8; SALT_LEN] = random_bytes();
        let nonce: [u8; XCHACHA_NONCE_LEN] = random_bytes();
        let kek = derive_kek(passphrase, &salt, &kdf)?;

        let cipher = XChaCha20Poly1305::new_from_slice(kek.as_slice())
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload { msg: master.expose().as_slice(), aad: SEAL_AAD },
            )
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        Ok(Self {
            version: RECORD_VERSION,
            kdf,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            sealed_key: STANDARD.encode(sealed),
        })
    }

    fn unseal(&self, passphrase: &SecretString) -> VaultResult<VaultKey> {
        if self.version != RECORD_VERSION {
            return Err(VaultError::MalformedCiphertext(format!(
                "Unsupported key store version: {}",
                self.version
            )));
        }

        let salt = decode_field("salt", &self.salt)?;
        let nonce = decode_field("nonce", &self.nonce)?;
        let sealed = decode_field("sealed_key", &self.sealed_key)?;
        if nonce.len() != XCHACHA_NONCE_LEN {
            return Err(VaultError::MalformedCiphertext("Invalid key store nonce".into()));
        }

        let kek = derive_kek(passphrase, &salt, &self.kdf)?;
        let cipher = XChaCha20Poly1305::new_from_slice(kek.as_slice())
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    XNonce::from_slice(&nonce),
                    Payload { msg: sealed.as_slice(), aad: SEAL_AAD },
                )
                .map_err(|_| VaultError::InvalidPassphrase)?,
        );

        let bytes: [u8; KEY_LEN] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::MalformedCiphertext("Invalid master key length".into()))?;
        Ok(VaultKey::new(bytes))
    }
}

fn decode_field(name: &str, value: &str) -> VaultResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| VaultError::MalformedCiphertext(format!("Invalid {}: {}", name, e)))
}

/// Derive the key-encryption key from a passphrase with Argon2id
fn derive_kek(
    passphrase: &SecretString,
    salt: &[u8],
    kdf: &KdfParams,
) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_LEN))
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut kek = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut kek[..])
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    Ok(kek)
}

/// Key store backed by `keystore.json` in the vault root
pub struct FileKeyStore {
    path: PathBuf,
    kdf: KdfParams,
}

impl FileKeyStore {
    pub fn new(root: &Path, kdf: KdfParams) -> Self {
        Self {
            path: root.join(KEYSTORE_FILE),
            kdf,
        }
    }

    fn read_record(&self) -> VaultResult<SealedKeyRecord> {
        if !self.path.exists() {
            return Err(VaultError::VaultNotFound(self.path.display().to_string()));
        }
        let data = std::fs::read(&self.path)?;
        serde_json::from_slice(&data)
            .map_err(|e| VaultError::MalformedCiphertext(format!("Key store unreadable: {}", e)))
    }
}

impl KeyStore for FileKeyStore {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn create(&self, passphrase: &SecretString) -> VaultResult<VaultKey> {
        if self.exists() {
            return Err(VaultError::VaultAlreadyExists(self.path.display().to_string()));
        }

        let master = VaultKey::generate();
        let record = SealedKeyRecord::seal(&master, passphrase, self.kdf)?;

        // Write-then-rename so a crash never leaves a half-written key store
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        std::fs::rename(&tmp, &self.path)?;

        log::info!("Created key store at {}", self.path.display());
        Ok(master)
    }

    fn unlock(&self, passphrase: &SecretString) -> VaultResult<VaultKey> {
        let record = self.read_record()?;
        let key = record.unseal(passphrase);
        if key.is_err() {
            log::warn!("Key store unlock failed");
        }
        key
    }
}

/// In-memory key store, for tests and embedders with their own key storage
pub struct MemoryKeyStore {
    kdf: KdfParams,
    record: Mutex<Option<SealedKeyRecord>>,
}

impl MemoryKeyStore {
    pub fn new(kdf: KdfParams) -> Self {
        Self {
            kdf,
            record: Mutex::new(None),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn exists(&self) -> bool {
        self.record.lock().is_some()
    }

    fn create(&self, passphrase: &SecretString) -> VaultResult<VaultKey> {
        let mut slot = self.record.lock();
        if slot.is_some() {
            return Err(VaultError::VaultAlreadyExists("memory key store".into()));
        }
        let master = VaultKey::generate();
        *slot = Some(SealedKeyRecord::seal(&master, passphrase, self.kdf)?);
        Ok(master)
    }

    fn unlock(&self, passphrase: &SecretString) -> VaultResult<VaultKey> {
        let record = self
            .record
            .lock()
            .clone()
            .ok_or_else(|| VaultError::VaultNotFound("memory key store".into()))?;
        record.unseal(passphrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pass(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path(), KdfParams::insecure_fast());
        assert!(!store.exists());

        let created = store.create(&pass("1234")).unwrap();
        assert!(store.exists());

        let unlocked = store.unlock(&pass("1234")).unwrap();
        assert_eq!(created.expose(), unlocked.expose());
    }

    #[test]
    fn test_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path(), KdfParams::insecure_fast());
        store.create(&pass("correct")).unwrap();

        assert!(matches!(
            store.unlock(&pass("wrong")),
            Err(VaultError::InvalidPassphrase)
        ));
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path(), KdfParams::insecure_fast());
        store.create(&pass("a")).unwrap();
        assert!(matches!(
            store.create(&pass("a")),
            Err(VaultError::VaultAlreadyExists(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryKeyStore::new(KdfParams::insecure_fast());
        assert!(store.unlock(&pass("x")).is_err());

        let key = store.create(&pass("x")).unwrap();
        assert_eq!(store.unlock(&pass("x")).unwrap().expose(), key.expose());
        assert!(store.unlock(&pass("y")).is_err());
    }
}
