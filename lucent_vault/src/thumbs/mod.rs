//! Lucent Vault - Thumbnails
//!
//! Generation at import, an in-memory cache of decrypted thumbnails, and the
//! loader that fills it.

pub mod cache;
pub mod engine;
pub mod loader;

pub use cache::{CacheStats, ThumbnailCache};
pub use engine::{RenderedThumbnail, ThumbnailEngine};
pub use loader::ThumbnailLoader;
