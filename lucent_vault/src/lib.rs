//! # Lucent Vault
//!
//! Storage core of an encrypted photo vault.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      PHOTO VAULT                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  KEY STORE  │  │   BATCH     │  │  THUMBNAIL      │  │
//! │  │  Argon2id   │  │ COORDINATOR │  │  LOADER + CACHE │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬────────┘  │
//! │         │                │                   │           │
//! │  ┌──────┴────────────────┴───────────────────┴────────┐ │
//! │  │                SECURE PHOTO STORAGE                 │ │
//! │  │      photos/*.lcb   thumbs/*.lcb   catalog.db       │ │
//! │  └─────────────────────────┬───────────────────────────┘ │
//! │                            │                             │
//! │  ┌─────────────────────────┴───────────────────────────┐ │
//! │  │                 ENCRYPTION MANAGER                   │ │
//! │  │       HKDF → K_photos / K_thumbs / K_catalog         │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Photos and thumbnails sealed with AES-256-GCM
//! - Catalog rows sealed with XChaCha20-Poly1305
//! - Blob headers authenticated as associated data
//! - Master key sealed under an Argon2id passphrase key
//! - Decrypted thumbnails live only in memory and are dropped on lock

pub mod batch;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod encryption;
pub mod error;
pub mod model;
pub mod secure_fs;
pub mod storage;
pub mod thumbs;
pub mod vault;

pub use batch::{BatchOperation, BatchReport, BatchStatus, CancelFlag, ItemFailure, ItemOutcome};
pub use config::VaultConfig;
pub use encryption::{EncryptionManager, SealedBlob};
pub use error::{ErrorKind, VaultError, VaultResult};
pub use model::{Album, AlbumSortOrder, EncryptedPhoto, PhotoId, PhotoMetadata, SystemAlbum};
pub use storage::SecurePhotoStorage;
pub use thumbs::{ThumbnailCache, ThumbnailEngine, ThumbnailLoader};
pub use vault::{ImportReport, PhotoVault};

/// Lucent Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
