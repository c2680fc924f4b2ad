//! Lucent Vault - AEAD Blob Sealing
//!
//! AES-256-GCM for photos and thumbnails, XChaCha20-Poly1305 for catalog rows.
//!
//! Sealed blob layout:
//! ```text
//! [MAGIC 6B]["LUCENT"]
//! [VERSION 1B][0x01]
//! [DOMAIN 1B][1=photo 2=thumbnail 3=catalog]
//! [NONCE 12B or 24B][random]
//! [CIPHERTEXT variable][with 16B tag]
//! ```
//! Everything before the ciphertext is passed as associated data.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::keys::{random_bytes, VaultKey, NONCE_LEN, TAG_LEN, XCHACHA_NONCE_LEN};
use crate::error::{VaultError, VaultResult};

/// Magic bytes identifying a Lucent blob
pub const MAGIC: &[u8; 6] = b"LUCENT";

/// Current format version
pub const FORMAT_VERSION: u8 = 0x01;

/// MAGIC + VERSION + DOMAIN
const PREAMBLE_LEN: usize = MAGIC.len() + 2;

/// What a blob holds; each domain has its own key and cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobDomain {
    Photo,
    Thumbnail,
    Catalog,
}

impl BlobDomain {
    fn tag(self) -> u8 {
        match self {
            BlobDomain::Photo => 1,
            BlobDomain::Thumbnail => 2,
            BlobDomain::Catalog => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(BlobDomain::Photo),
            2 => Some(BlobDomain::Thumbnail),
            3 => Some(BlobDomain::Catalog),
            _ => None,
        }
    }

    pub fn nonce_len(self) -> usize {
        match self {
            BlobDomain::Photo | BlobDomain::Thumbnail => NONCE_LEN,
            BlobDomain::Catalog => XCHACHA_NONCE_LEN,
        }
    }

    /// Bytes before the ciphertext
    pub fn header_len(self) -> usize {
        PREAMBLE_LEN + self.nonce_len()
    }

    /// Smallest valid blob (empty plaintext)
    pub fn min_len(self) -> usize {
        self.header_len() + TAG_LEN
    }
}

/// Encrypt `plaintext` into a self-describing blob
pub fn seal(key: &VaultKey, domain: BlobDomain, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let mut blob = Vec::with_capacity(domain.min_len() + plaintext.len());
    blob.extend_from_slice(MAGIC);
    blob.push(FORMAT_VERSION);
    blob.push(domain.tag());

    let ciphertext = match domain {
        BlobDomain::Photo | BlobDomain::Thumbnail => {
            let nonce_bytes: [u8; NONCE_LEN] = random_bytes();
            blob.extend_from_slice(&nonce_bytes);

            let cipher = Aes256Gcm::new_from_slice(key.expose())
                .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
            cipher
                .encrypt(
                    Nonce::from_slice(&nonce_bytes),
                    Payload { msg: plaintext, aad: &blob },
                )
                .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?
        }
        BlobDomain::Catalog => {
            let nonce_bytes: [u8; XCHACHA_NONCE_LEN] = random_bytes();
            blob.extend_from_slice(&nonce_bytes);

            let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
                .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
            cipher
                .encrypt(
                    XNonce::from_slice(&nonce_bytes),
                    Payload { msg: plaintext, aad: &blob },
                )
                .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?
        }
    };

    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`seal`] for the same domain
pub fn open(key: &VaultKey, domain: BlobDomain, blob: &[u8]) -> VaultResult<Vec<u8>> {
    if blob.len() < domain.min_len() {
        return Err(VaultError::MalformedCiphertext("Data too short".into()));
    }
    if &blob[..MAGIC.len()] != MAGIC {
        return Err(VaultError::MalformedCiphertext("Invalid magic bytes".into()));
    }

    let version = blob[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(VaultError::MalformedCiphertext(format!(
            "Unsupported version: {}",
            version
        )));
    }

    match BlobDomain::from_tag(blob[MAGIC.len() + 1]) {
        Some(found) if found == domain => {}
        Some(found) => {
            return Err(VaultError::MalformedCiphertext(format!(
                "Expected {:?} blob, found {:?}",
                domain, found
            )))
        }
        None => return Err(VaultError::MalformedCiphertext("Unknown blob domain".into())),
    }

    let header_len = domain.header_len();
    let (header, ciphertext) = blob.split_at(header_len);
    let nonce_bytes = &header[PREAMBLE_LEN..];

    let payload = Payload {
        msg: ciphertext,
        aad: header,
    };

    match domain {
        BlobDomain::Photo | BlobDomain::Thumbnail => {
            let cipher = Aes256Gcm::new_from_slice(key.expose())
                .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;
            cipher
                .decrypt(Nonce::from_slice(nonce_bytes), payload)
                .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
        }
        BlobDomain::Catalog => {
            let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
                .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;
            cipher
                .decrypt(XNonce::from_slice(nonce_bytes), payload)
                .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_each_domain() {
        let key = VaultKey::generate();
        let plaintext = b"Lucent - private photo bytes";

        for domain in [BlobDomain::Photo, BlobDomain::Thumbnail, BlobDomain::Catalog] {
            let blob = seal(&key, domain, plaintext).unwrap();
            assert_eq!(blob.len(), domain.min_len() + plaintext.len());
            assert_eq!(open(&key, domain, &blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_every_byte_is_authenticated() {
        let key = VaultKey::generate();

        for domain in [BlobDomain::Photo, BlobDomain::Catalog] {
            let blob = seal(&key, domain, b"tamper me").unwrap();
            for i in 0..blob.len() {
                let mut tampered = blob.clone();
                tampered[i] ^= 0x01;
                let err = open(&key, domain, &tampered).unwrap_err();
                assert_eq!(err.kind(), crate::error::ErrorKind::Crypto, "byte {}", i);
            }
        }
    }

    #[test]
    fn test_domain_mismatch_rejected() {
        let key = VaultKey::generate();
        let blob = seal(&key, BlobDomain::Photo, b"photo").unwrap();
        assert!(matches!(
            open(&key, BlobDomain::Thumbnail, &blob),
            Err(VaultError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = seal(&VaultKey::generate(), BlobDomain::Photo, b"secret").unwrap();
        assert!(matches!(
            open(&VaultKey::generate(), BlobDomain::Photo, &blob),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let key = VaultKey::generate();
        let blob = seal(&key, BlobDomain::Photo, b"").unwrap();
        assert!(open(&key, BlobDomain::Photo, &blob[..blob.len() - 1]).is_err());
        assert!(open(&key, BlobDomain::Photo, &[]).is_err());
    }
}
