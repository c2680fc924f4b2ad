//! Lucent Vault - Thumbnail Loader
//!
//! Cache-first thumbnail access. On a miss the sealed thumbnail is read from
//! storage and opened on a blocking worker. Concurrent loads of the same id
//! share a gate so each thumbnail is decrypted at most once at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::cache::ThumbnailCache;
use crate::encryption::EncryptionManager;
use crate::error::VaultResult;
use crate::model::{EncryptedPhoto, PhotoId};
use crate::storage::SecurePhotoStorage;

type Gate = Arc<tokio::sync::Mutex<()>>;

/// A caller's place in the gate map. Dropping it gives up the handle and
/// removes the gate once nobody else holds it, including when a `load`
/// future is dropped while still waiting.
struct InFlight<'a> {
    gates: &'a DashMap<PhotoId, Gate>,
    id: PhotoId,
    gate: Option<Gate>,
}

impl<'a> InFlight<'a> {
    fn enter(gates: &'a DashMap<PhotoId, Gate>, id: PhotoId) -> Self {
        let gate = gates
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Self {
            gates,
            id,
            gate: Some(gate),
        }
    }

    /// Wait for the gate. The handle is only taken in `drop`, so this is
    /// always `Some` while the guard is alive.
    async fn lock(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        drop(self.gate.take());
        // Clones happen under the shard lock, so a count of 1 means only the map holds it
        self.gates
            .remove_if(&self.id, |_, gate| Arc::strong_count(gate) == 1);
    }
}

/// Thumbnail Loader
pub struct ThumbnailLoader {
    storage: Arc<SecurePhotoStorage>,
    crypto: Arc<EncryptionManager>,
    cache: Arc<ThumbnailCache>,
    in_flight: DashMap<PhotoId, Gate>,
    decrypts: AtomicU64,
}

impl ThumbnailLoader {
    pub fn new(
        storage: Arc<SecurePhotoStorage>,
        crypto: Arc<EncryptionManager>,
        cache: Arc<ThumbnailCache>,
    ) -> Self {
        Self {
            storage,
            crypto,
            cache,
            in_flight: DashMap::new(),
            decrypts: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.cache
    }

    /// Number of thumbnails decrypted since construction
    pub fn decrypt_count(&self) -> u64 {
        self.decrypts.load(Ordering::Relaxed)
    }

    /// Decrypted thumbnail bytes for `id`.
    ///
    /// Fails with `ThumbnailMissing` when the photo has no thumbnail and with
    /// `PhotoNotFound` when the photo is not in the catalog.
    pub async fn load(&self, id: PhotoId) -> VaultResult<Arc<Vec<u8>>> {
        if let Some(bytes) = self.cache.get(id) {
            return Ok(bytes);
        }

        let in_flight = InFlight::enter(&self.in_flight, id);
        let _held = in_flight.lock().await;

        // Another caller may have filled the cache while we waited
        match self.cache.get(id) {
            Some(bytes) => Ok(bytes),
            None => self.decrypt_into_cache(id).await,
        }
    }

    async fn decrypt_into_cache(&self, id: PhotoId) -> VaultResult<Arc<Vec<u8>>> {
        let generation = self.cache.generation();
        let storage = Arc::clone(&self.storage);
        let crypto = Arc::clone(&self.crypto);

        let bytes = tokio::task::spawn_blocking(move || {
            let sealed = storage.read_thumbnail_blob(id)?;
            crypto.open(&sealed)
        })
        .await??;
        self.decrypts.fetch_add(1, Ordering::Relaxed);

        let bytes = Arc::new(bytes);
        if !self.cache.insert_if_current(id, Arc::clone(&bytes), generation) {
            log::debug!("Thumbnail {} not retained", id);
        }
        Ok(bytes)
    }

    /// Store a new thumbnail for `id` and drop any decrypted copy of the old one
    pub async fn replace(&self, id: PhotoId, jpeg: Vec<u8>) -> VaultResult<EncryptedPhoto> {
        let storage = Arc::clone(&self.storage);
        let photo = tokio::task::spawn_blocking(move || {
            let jpeg = zeroize::Zeroizing::new(jpeg);
            storage.write_thumbnail(id, &jpeg)
        })
        .await??;
        self.cache.remove(id);
        Ok(photo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use crate::crypto::VaultKey;
    use crate::error::VaultError;
    use crate::storage::tests::png;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn loader() -> (TempDir, Arc<ThumbnailLoader>) {
        let dir = tempdir().unwrap();
        let crypto = Arc::new(EncryptionManager::with_master_key(&VaultKey::generate()).unwrap());
        let config = VaultConfig {
            thumb_size: 16,
            ..VaultConfig::default()
        };
        let storage =
            Arc::new(SecurePhotoStorage::open(dir.path(), Arc::clone(&crypto), &config).unwrap());
        let cache = Arc::new(ThumbnailCache::new(16, 1024 * 1024));
        (dir, Arc::new(ThumbnailLoader::new(storage, crypto, cache)))
    }

    #[tokio::test]
    async fn test_load_fills_cache() {
        let (_dir, loader) = loader();
        let photo = loader.storage.import_photo("a.png", &png(40, 40)).unwrap();

        let first = loader.load(photo.id()).await.unwrap();
        assert!(loader.cache.contains(photo.id()));
        let second = loader.load(photo.id()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(loader.decrypt_count(), 1);
        assert!(image::load_from_memory(&first).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_decrypt_once() {
        let (_dir, loader) = loader();
        let photo = loader.storage.import_photo("a.png", &png(40, 40)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = Arc::clone(&loader);
            let id = photo.id();
            handles.push(tokio::spawn(async move { loader.load(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(loader.decrypt_count(), 1);
        assert!(loader.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_load_releases_gate() {
        let (_dir, loader) = loader();
        let photo = loader.storage.import_photo("a.png", &png(40, 40)).unwrap();

        let busy = InFlight::enter(&loader.in_flight, photo.id());
        let held = busy.lock().await;
        assert!(held.is_some());

        let waited = tokio::time::timeout(Duration::from_millis(20), loader.load(photo.id())).await;
        assert!(waited.is_err());
        assert_eq!(loader.in_flight.len(), 1);

        drop(held);
        drop(busy);
        assert!(loader.in_flight.is_empty());
        assert_eq!(loader.decrypt_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_forces_reload() {
        let (_dir, loader) = loader();
        let photo = loader.storage.import_photo("a.png", &png(40, 40)).unwrap();

        loader.load(photo.id()).await.unwrap();
        loader.cache.clear();
        assert!(!loader.cache.contains(photo.id()));

        loader.load(photo.id()).await.unwrap();
        assert_eq!(loader.decrypt_count(), 2);
    }

    #[tokio::test]
    async fn test_replace_evicts_stale_copy() {
        let (_dir, loader) = loader();
        let photo = loader.storage.import_photo("a.png", &png(40, 40)).unwrap();
        let old = loader.load(photo.id()).await.unwrap();

        loader.replace(photo.id(), b"new thumbnail".to_vec()).await.unwrap();
        assert!(!loader.cache.contains(photo.id()));

        let fresh = loader.load(photo.id()).await.unwrap();
        assert_ne!(fresh, old);
        assert_eq!(fresh.as_slice(), b"new thumbnail");
    }

    #[tokio::test]
    async fn test_missing_thumbnail() {
        let (_dir, loader) = loader();
        let photo = loader.storage.import_photo("notes.txt", b"not an image").unwrap();

        let err = loader.load(photo.id()).await.unwrap_err();
        assert!(matches!(err, VaultError::ThumbnailMissing(_)));
        assert!(matches!(
            loader.load(PhotoId::new()).await,
            Err(VaultError::PhotoNotFound(_))
        ));
    }
}
