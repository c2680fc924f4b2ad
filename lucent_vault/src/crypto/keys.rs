//! Lucent Vault - Key Management
//!
//! Derives one sub-key per blob domain from the vault master key.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256 / XChaCha20
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// AEAD tag length (both ciphers)
pub const TAG_LEN: usize = 16;

/// HKDF info strings, one per derived key
pub mod contexts {
    pub const PHOTOS: &[u8] = b"LUCENT:PHOTOS:v1";
    pub const THUMBS: &[u8] = b"LUCENT:THUMBS:v1";
    pub const CATALOG: &[u8] = b"LUCENT:CATALOG:v1";
    pub const FINGERPRINT: &[u8] = b"LUCENT:FINGERPRINT:v1";
}

/// Secret key bytes, zeroized on drop
pub struct VaultKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl VaultKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl Clone for VaultKey {
    fn clone(&self) -> Self {
        Self::new(*self.expose())
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

/// Domain keys derived from the master key
pub struct KeyManager {
    photos_key: VaultKey,
    thumbs_key: VaultKey,
    catalog_key: VaultKey,
    fingerprint_key: VaultKey,
}

impl KeyManager {
    /// Derive all domain keys from the master key
    pub fn from_master(master: &VaultKey) -> VaultResult<Self> {
        Ok(Self {
            photos_key: derive_key(master.expose(), b"photos", contexts::PHOTOS)?,
            thumbs_key: derive_key(master.expose(), b"thumbs", contexts::THUMBS)?,
            catalog_key: derive_key(master.expose(), b"catalog", contexts::CATALOG)?,
            fingerprint_key: derive_key(master.expose(), b"fingerprint", contexts::FINGERPRINT)?,
        })
    }

    pub fn photos_key(&self) -> &VaultKey {
        &self.photos_key
    }

    pub fn thumbs_key(&self) -> &VaultKey {
        &self.thumbs_key
    }

    pub fn catalog_key(&self) -> &VaultKey {
        &self.catalog_key
    }

    pub fn fingerprint_key(&self) -> &VaultKey {
        &self.fingerprint_key
    }
}

/// Derive a key using HKDF-SHA256
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> VaultResult<VaultKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(VaultKey::new(okm))
}

/// Fill a fixed-size buffer from the thread RNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_keys_differ() {
        let master = VaultKey::new([0x42u8; KEY_LEN]);
        let km = KeyManager::from_master(&master).unwrap();

        assert_ne!(km.photos_key().expose(), km.thumbs_key().expose());
        assert_ne!(km.photos_key().expose(), km.catalog_key().expose());
        assert_ne!(km.catalog_key().expose(), km.fingerprint_key().expose());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let master = VaultKey::new([7u8; KEY_LEN]);
        let a = KeyManager::from_master(&master).unwrap();
        let b = KeyManager::from_master(&master).unwrap();
        assert_eq!(a.photos_key().expose(), b.photos_key().expose());
    }

    #[test]
    fn test_debug_redacts() {
        let key = VaultKey::generate();
        assert_eq!(format!("{:?}", key), "VaultKey([REDACTED])");
    }
}
