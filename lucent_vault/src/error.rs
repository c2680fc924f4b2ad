//! Lucent Vault - Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::PhotoId;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Coarse error taxonomy shared by single-item calls and batch outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Identifier absent from the catalog
    NotFound,
    /// I/O failure or catalog corruption
    Storage,
    /// Key unavailable or authentication failure
    Crypto,
    /// Skipped because the caller cancelled
    Cancelled,
    /// Rejected before touching any state
    InvalidInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Storage => "storage error",
            ErrorKind::Crypto => "crypto error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidInput => "invalid input",
        };
        f.write_str(name)
    }
}

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption key unavailable - vault is locked")]
    KeyUnavailable,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    // ═══════════════════════════════════════════════════════════════
    // LOOKUP ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("Album not found: {0}")]
    AlbumNotFound(String),

    #[error("Photo has no thumbnail: {0}")]
    ThumbnailMissing(PhotoId),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Vault already exists at: {0}")]
    VaultAlreadyExists(String),

    #[error("Vault not found at: {0}")]
    VaultNotFound(String),

    #[error("Blob missing on disk: {0}")]
    BlobMissing(String),

    #[error("Catalog corrupted: {0}")]
    CatalogCorrupted(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Thumbnail generation failed: {0}")]
    ThumbnailFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // CALLER ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("System album cannot be modified: {0}")]
    SystemAlbum(String),

    #[error("Album already exists: {0}")]
    AlbumExists(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl VaultError {
    /// Map onto the shared taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::KeyUnavailable
            | VaultError::EncryptionFailed(_)
            | VaultError::DecryptionFailed(_)
            | VaultError::MalformedCiphertext(_)
            | VaultError::KeyDerivationFailed(_)
            | VaultError::InvalidPassphrase => ErrorKind::Crypto,

            VaultError::PhotoNotFound(_)
            | VaultError::AlbumNotFound(_)
            | VaultError::ThumbnailMissing(_) => ErrorKind::NotFound,

            VaultError::VaultAlreadyExists(_)
            | VaultError::VaultNotFound(_)
            | VaultError::BlobMissing(_)
            | VaultError::CatalogCorrupted(_)
            | VaultError::DatabaseError(_)
            | VaultError::SerializationError(_)
            | VaultError::ThumbnailFailed(_)
            | VaultError::IoError(_) => ErrorKind::Storage,

            VaultError::InvalidInput(_)
            | VaultError::SystemAlbum(_)
            | VaultError::AlbumExists(_) => ErrorKind::InvalidInput,

            VaultError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Check if this is a tamper or wrong-key signal
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed(_)
                | VaultError::MalformedCiphertext(_)
                | VaultError::InvalidPassphrase
                | VaultError::CatalogCorrupted(_)
        )
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::ThumbnailFailed(e.to_string())
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            VaultError::Cancelled
        } else {
            VaultError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let id = PhotoId::new();
        assert_eq!(VaultError::PhotoNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(VaultError::BlobMissing("photos/x".into()).kind(), ErrorKind::Storage);
        assert_eq!(VaultError::KeyUnavailable.kind(), ErrorKind::Crypto);
        assert_eq!(VaultError::Cancelled.kind(), ErrorKind::Cancelled);

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(VaultError::from(io).kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_security_critical() {
        assert!(VaultError::InvalidPassphrase.is_security_critical());
        assert!(VaultError::CatalogCorrupted("row 3".into()).is_security_critical());
        assert!(!VaultError::PhotoNotFound(PhotoId::new()).is_security_critical());
        assert!(!VaultError::Cancelled.is_security_critical());
    }
}
