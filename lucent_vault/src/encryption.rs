//! Lucent Vault - Encryption Manager
//!
//! Authenticated encryption of opaque blobs. The manager holds the derived
//! domain keys for as long as the vault is unlocked and never hands them out.
//! It performs no I/O and caches nothing.

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;

use crate::crypto::{self, BlobDomain, KeyManager, VaultKey};
use crate::error::{VaultError, VaultResult};

type HmacSha256 = Hmac<Sha256>;

/// A blob as read from disk, still encrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    domain: BlobDomain,
    bytes: Vec<u8>,
}

impl SealedBlob {
    pub fn new(domain: BlobDomain, bytes: Vec<u8>) -> Self {
        Self { domain, bytes }
    }

    pub fn domain(&self) -> BlobDomain {
        self.domain
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Encryption Manager
pub struct EncryptionManager {
    keys: RwLock<Option<KeyManager>>,
}

impl EncryptionManager {
    /// Manager with no key installed; every transform fails until `install_key`
    pub fn locked() -> Self {
        Self {
            keys: RwLock::new(None),
        }
    }

    /// Manager unlocked with the given master key
    pub fn with_master_key(master: &VaultKey) -> VaultResult<Self> {
        let manager = Self::locked();
        manager.install_key(master)?;
        Ok(manager)
    }

    /// Derive and install domain keys from the master key
    pub fn install_key(&self, master: &VaultKey) -> VaultResult<()> {
        let keys = KeyManager::from_master(master)?;
        *self.keys.write() = Some(keys);
        log::debug!("Encryption keys installed");
        Ok(())
    }

    /// Drop all key material
    pub fn forget_key(&self) {
        *self.keys.write() = None;
        log::debug!("Encryption keys dropped");
    }

    pub fn has_key(&self) -> bool {
        self.keys.read().is_some()
    }

    /// Encrypt a photo payload
    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.encrypt_in(BlobDomain::Photo, plaintext)
    }

    /// Decrypt a photo payload
    pub fn decrypt(&self, ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
        self.decrypt_in(BlobDomain::Photo, ciphertext)
    }

    pub fn encrypt_in(&self, domain: BlobDomain, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let guard = self.keys.read();
        let keys = guard.as_ref().ok_or(VaultError::KeyUnavailable)?;
        crypto::seal(Self::key_for(keys, domain), domain, plaintext)
    }

    pub fn decrypt_in(&self, domain: BlobDomain, ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
        let guard = self.keys.read();
        let keys = guard.as_ref().ok_or(VaultError::KeyUnavailable)?;
        crypto::open(Self::key_for(keys, domain), domain, ciphertext)
    }

    /// Decrypt a blob read by storage
    pub fn open(&self, blob: &SealedBlob) -> VaultResult<Vec<u8>> {
        self.decrypt_in(blob.domain, &blob.bytes)
    }

    /// Keyed fingerprint of plaintext content (hex HMAC-SHA256)
    pub fn fingerprint(&self, plaintext: &[u8]) -> VaultResult<String> {
        let guard = self.keys.read();
        let keys = guard.as_ref().ok_or(VaultError::KeyUnavailable)?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(keys.fingerprint_key().expose())
            .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
        mac.update(plaintext);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn key_for(keys: &KeyManager, domain: BlobDomain) -> &VaultKey {
        match domain {
            BlobDomain::Photo => keys.photos_key(),
            BlobDomain::Thumbnail => keys.thumbs_key(),
            BlobDomain::Catalog => keys.catalog_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn manager() -> EncryptionManager {
        EncryptionManager::with_master_key(&VaultKey::generate()).unwrap()
    }

    #[test]
    fn test_roundtrip_including_empty() {
        let em = manager();
        for payload in [&b""[..], &b"x"[..], &[0xABu8; 4096][..]] {
            let ct = em.encrypt(payload).unwrap();
            assert_eq!(em.decrypt(&ct).unwrap(), payload);
        }
    }

    #[test]
    fn test_tampering_any_byte_fails() {
        let em = manager();
        let ct = em.encrypt(b"holiday.jpg bytes").unwrap();
        for i in 0..ct.len() {
            let mut tampered = ct.clone();
            tampered[i] = tampered[i].wrapping_add(1);
            let err = em.decrypt(&tampered).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Crypto);
        }
    }

    #[test]
    fn test_locked_manager_fails() {
        let em = EncryptionManager::locked();
        assert!(matches!(em.encrypt(b"x"), Err(VaultError::KeyUnavailable)));

        let em = manager();
        let ct = em.encrypt(b"x").unwrap();
        em.forget_key();
        assert!(!em.has_key());
        assert!(matches!(em.decrypt(&ct), Err(VaultError::KeyUnavailable)));
    }

    #[test]
    fn test_domains_do_not_cross() {
        let em = manager();
        let thumb = em.encrypt_in(BlobDomain::Thumbnail, b"thumb").unwrap();
        assert!(em.decrypt(&thumb).is_err());

        let blob = SealedBlob::new(BlobDomain::Thumbnail, thumb);
        assert_eq!(em.open(&blob).unwrap(), b"thumb");
    }

    #[test]
    fn test_fingerprint_is_keyed() {
        let a = manager();
        let b = manager();
        assert_eq!(a.fingerprint(b"same").unwrap(), a.fingerprint(b"same").unwrap());
        assert_ne!(a.fingerprint(b"same").unwrap(), b.fingerprint(b"same").unwrap());
    }
}
