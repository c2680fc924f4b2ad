//! Lucent Vault - Main Vault Implementation
//!
//! `PhotoVault` wires the services together and exposes the async API the
//! UI calls. Blocking storage and crypto work runs on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;

use crate::batch::{BatchCoordinator, BatchOperation, BatchReport, CancelFlag, ItemFailure};
use crate::config::VaultConfig;
use crate::crypto::keystore::KEYSTORE_FILE;
use crate::crypto::{FileKeyStore, KeyStore, VaultKey};
use crate::encryption::EncryptionManager;
use crate::error::{VaultError, VaultResult};
use crate::model::{Album, EncryptedPhoto, PhotoId, PhotoMetadata};
use crate::storage::{ReconcileReport, SecurePhotoStorage, StorageStats};
use crate::thumbs::{CacheStats, ThumbnailCache, ThumbnailLoader};

/// File extensions picked up when importing a directory
const IMPORT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "bmp", "tif", "tiff",
];

/// Result of importing a set of files
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub imported: Vec<EncryptedPhoto>,
    pub failed: Vec<(PathBuf, ItemFailure)>,
    /// Files not attempted because the import was cancelled
    pub skipped: usize,
}

/// Photo Vault - Main entry point
pub struct PhotoVault {
    root: PathBuf,
    config: VaultConfig,
    key_store: Box<dyn KeyStore>,
    crypto: Arc<EncryptionManager>,
    storage: Arc<SecurePhotoStorage>,
    thumbnails: ThumbnailLoader,
    batch: BatchCoordinator,
}

impl PhotoVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new vault at the given path. The directory must be absent or empty.
    pub fn create<P: AsRef<Path>>(
        path: P,
        passphrase: &SecretString,
        config: VaultConfig,
    ) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();

        let occupied = root.exists() && std::fs::read_dir(&root)?.next().is_some();
        if occupied {
            return Err(VaultError::VaultAlreadyExists(root.display().to_string()));
        }

        config.validate()?;
        std::fs::create_dir_all(&root)?;
        config.save(&root)?;

        let key_store = FileKeyStore::new(&root, config.kdf);
        let master = key_store.create(passphrase)?;

        log::info!("Created vault at {}", root.display());
        Self::assemble(root, config, Box::new(key_store), &master)
    }

    /// Open and unlock an existing vault
    pub fn open<P: AsRef<Path>>(path: P, passphrase: &SecretString) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.join(KEYSTORE_FILE).is_file() {
            return Err(VaultError::VaultNotFound(root.display().to_string()));
        }

        let config = VaultConfig::load_or_default(&root)?;
        let key_store = FileKeyStore::new(&root, config.kdf);
        let master = key_store.unlock(passphrase)?;

        let vault = Self::assemble(root, config, Box::new(key_store), &master)?;
        vault.storage.reconcile()?;
        Ok(vault)
    }

    /// Open a vault whose master key lives in a caller-provided key store.
    /// A key is created in the store on first use.
    pub fn with_key_store<P: AsRef<Path>>(
        path: P,
        config: VaultConfig,
        key_store: Box<dyn KeyStore>,
        passphrase: &SecretString,
    ) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();
        config.validate()?;
        std::fs::create_dir_all(&root)?;

        let master = if key_store.exists() {
            key_store.unlock(passphrase)?
        } else {
            key_store.create(passphrase)?
        };

        let vault = Self::assemble(root, config, key_store, &master)?;
        vault.storage.reconcile()?;
        Ok(vault)
    }

    fn assemble(
        root: PathBuf,
        config: VaultConfig,
        key_store: Box<dyn KeyStore>,
        master: &VaultKey,
    ) -> VaultResult<Self> {
        let crypto = Arc::new(EncryptionManager::with_master_key(master)?);
        let storage = Arc::new(SecurePhotoStorage::open(&root, Arc::clone(&crypto), &config)?);
        let cache = Arc::new(ThumbnailCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
        ));

        let thumbnails =
            ThumbnailLoader::new(Arc::clone(&storage), Arc::clone(&crypto), Arc::clone(&cache));
        let batch = BatchCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&crypto),
            cache,
            config.batch_concurrency,
        );

        Ok(Self {
            root,
            config,
            key_store,
            crypto,
            storage,
            thumbnails,
            batch,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Direct access to encrypt/decrypt
    pub fn encryption(&self) -> &Arc<EncryptionManager> {
        &self.crypto
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNLOCK / LOCK
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop keys, every decrypted thumbnail held in memory and every
    /// decrypted copy staged for sharing. The keys are dropped even if the
    /// staging area cannot be cleared; that error is returned afterwards.
    pub fn lock(&self) -> VaultResult<()> {
        let dropped = self.thumbnails.cache().clear();
        let staged = self.batch.clear_share_staging();
        self.crypto.forget_key();
        log::info!("Vault locked ({} thumbnails dropped)", dropped);
        staged.map(|_| ())
    }

    pub fn unlock(&self, passphrase: &SecretString) -> VaultResult<()> {
        let master = self.key_store.unlock(passphrase)?;
        self.crypto.install_key(&master)?;
        log::info!("Vault unlocked");
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.crypto.has_key()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTO OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    async fn blocking<T, F>(&self, op: F) -> VaultResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SecurePhotoStorage) -> VaultResult<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || op(&storage)).await?
    }

    pub async fn list_all_photos(&self) -> VaultResult<Vec<EncryptedPhoto>> {
        self.blocking(|s| s.list_all_photos()).await
    }

    pub async fn get_photo(&self, id: PhotoId) -> VaultResult<EncryptedPhoto> {
        self.blocking(move |s| s.get_photo(id)).await
    }

    /// Decrypted full-size photo bytes
    pub async fn load_photo(&self, id: PhotoId) -> VaultResult<Vec<u8>> {
        let crypto = Arc::clone(&self.crypto);
        self.blocking(move |s| crypto.open(&s.read_photo_blob(id)?))
            .await
    }

    pub async fn import_bytes(&self, filename: &str, data: Vec<u8>) -> VaultResult<EncryptedPhoto> {
        let filename = filename.to_string();
        self.blocking(move |s| s.import_photo(&filename, &data)).await
    }

    /// Import files and directories (recursively, image extensions only).
    /// Cancellation is checked between files.
    pub async fn import_files(&self, paths: &[PathBuf], cancel: &CancelFlag) -> VaultResult<ImportReport> {
        let candidates = collect_import_candidates(paths);
        let mut report = ImportReport::default();

        for (index, path) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                report.skipped = candidates.len() - index;
                break;
            }

            let source = path.clone();
            let result = self
                .blocking(move |s| {
                    let data = zeroize::Zeroizing::new(std::fs::read(&source)?);
                    let name = source
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    s.import_photo(&name, &data)
                })
                .await;

            match result {
                Ok(photo) => report.imported.push(photo),
                Err(e) => {
                    log::warn!("Import of {} failed: {}", path.display(), e);
                    report.failed.push((path.clone(), ItemFailure::from(&e)));
                }
            }
        }

        log::info!(
            "Imported {} files, {} failed, {} skipped",
            report.imported.len(),
            report.failed.len(),
            report.skipped
        );
        Ok(report)
    }

    /// Delete one photo; errors surface directly
    pub async fn delete_photo(&self, id: PhotoId) -> VaultResult<()> {
        self.blocking(move |s| s.delete_photo(id)).await?;
        self.thumbnails.cache().remove(id);
        Ok(())
    }

    pub async fn delete_photos(&self, ids: &[PhotoId]) -> VaultResult<BatchReport> {
        self.batch.run(ids, BatchOperation::Delete).await
    }

    pub async fn update_metadata(&self, id: PhotoId, metadata: PhotoMetadata) -> VaultResult<EncryptedPhoto> {
        self.blocking(move |s| s.update_metadata(id, metadata)).await
    }

    /// Flip the favorite flag; returns the new state
    pub async fn toggle_favorite(&self, id: PhotoId) -> VaultResult<bool> {
        self.blocking(move |s| {
            let current = s.get_photo(id)?.is_favorite;
            Ok(s.set_favorite(id, !current)?.is_favorite)
        })
        .await
    }

    pub async fn set_favorites(&self, ids: &[PhotoId], favorite: bool) -> VaultResult<BatchReport> {
        self.batch.run(ids, BatchOperation::SetFavorite(favorite)).await
    }

    pub async fn move_photos_to_album(&self, ids: &[PhotoId], album: &str) -> VaultResult<BatchReport> {
        self.batch
            .run(ids, BatchOperation::MoveToAlbum(album.to_string()))
            .await
    }

    pub async fn add_tags_to_photos(&self, ids: &[PhotoId], tags: &[String]) -> VaultResult<BatchReport> {
        self.batch.run(ids, BatchOperation::AddTags(tags.to_vec())).await
    }

    pub async fn remove_tags_from_photos(&self, ids: &[PhotoId], tags: &[String]) -> VaultResult<BatchReport> {
        self.batch.run(ids, BatchOperation::RemoveTags(tags.to_vec())).await
    }

    pub async fn export_photos(
        &self,
        ids: &[PhotoId],
        destination: &Path,
        cancel: &CancelFlag,
    ) -> VaultResult<BatchReport> {
        let operation = BatchOperation::Export {
            destination: destination.to_path_buf(),
        };
        self.batch.run_with_cancel(ids, operation, cancel).await
    }

    pub async fn prepare_for_share(&self, ids: &[PhotoId], cancel: &CancelFlag) -> VaultResult<BatchReport> {
        self.batch
            .run_with_cancel(ids, BatchOperation::PrepareForShare, cancel)
            .await
    }

    pub fn clear_share_staging(&self) -> VaultResult<usize> {
        self.batch.clear_share_staging()
    }

    pub async fn photos_with_tag(&self, tag: &str) -> VaultResult<Vec<EncryptedPhoto>> {
        let tag = tag.to_string();
        self.blocking(move |s| s.photos_with_tag(&tag)).await
    }

    pub async fn find_duplicates(&self) -> VaultResult<Vec<Vec<EncryptedPhoto>>> {
        self.blocking(|s| s.find_duplicates()).await
    }

    pub async fn stats(&self) -> VaultResult<StorageStats> {
        self.blocking(|s| s.stats()).await
    }

    pub async fn reconcile(&self) -> VaultResult<ReconcileReport> {
        self.blocking(|s| s.reconcile()).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // THUMBNAILS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn load_thumbnail(&self, id: PhotoId) -> VaultResult<Arc<Vec<u8>>> {
        self.thumbnails.load(id).await
    }

    /// Store a re-rendered thumbnail; the cached copy of the old one is dropped
    pub async fn replace_thumbnail(&self, id: PhotoId, jpeg: Vec<u8>) -> VaultResult<EncryptedPhoto> {
        self.thumbnails.replace(id, jpeg).await
    }

    /// Drop decrypted thumbnails, e.g. when the app goes to the background
    pub fn clear_thumbnails_from_memory(&self) -> usize {
        let dropped = self.thumbnails.cache().clear();
        log::debug!("Dropped {} cached thumbnails", dropped);
        dropped
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.thumbnails.cache().stats()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    /// System albums followed by user albums
    pub async fn albums(&self) -> VaultResult<Vec<Album>> {
        self.blocking(|s| s.list_albums()).await
    }

    pub async fn create_album(&self, album: Album) -> VaultResult<Album> {
        self.blocking(move |s| s.create_album(album)).await
    }

    /// Returns how many photos lost their membership
    pub async fn delete_album(&self, name: &str) -> VaultResult<usize> {
        let name = name.to_string();
        self.blocking(move |s| s.delete_album(&name)).await
    }

    pub async fn photos_in_album(&self, name: &str) -> VaultResult<Vec<EncryptedPhoto>> {
        let name = name.to_string();
        self.blocking(move |s| s.photos_in_album(&name)).await
    }
}

/// Expand directories into the image files beneath them, sorted per directory
fn collect_import_candidates(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        for entry in walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && has_image_extension(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMPORT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KdfParams;
    use crate::crypto::MemoryKeyStore;
    use crate::error::ErrorKind;
    use crate::storage::tests::png;
    use tempfile::tempdir;

    fn passphrase(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    fn test_config() -> VaultConfig {
        VaultConfig {
            thumb_size: 16,
            kdf: KdfParams::insecure_fast(),
            ..VaultConfig::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_reopen() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("vault");

        let vault = PhotoVault::create(&root, &passphrase("correct horse"), test_config()).unwrap();
        let photo = vault.import_bytes("a.png", png(10, 10)).await.unwrap();
        drop(vault);

        assert!(matches!(
            PhotoVault::create(&root, &passphrase("x"), test_config()),
            Err(VaultError::VaultAlreadyExists(_))
        ));
        assert!(matches!(
            PhotoVault::open(&root, &passphrase("wrong")),
            Err(VaultError::InvalidPassphrase)
        ));

        let vault = PhotoVault::open(&root, &passphrase("correct horse")).unwrap();
        assert_eq!(vault.config().thumb_size, 16);
        assert_eq!(vault.list_all_photos().await.unwrap(), vec![photo.clone()]);
        assert_eq!(vault.load_photo(photo.id()).await.unwrap(), png(10, 10));
    }

    #[tokio::test]
    async fn test_open_missing_vault() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            PhotoVault::open(dir.path(), &passphrase("x")),
            Err(VaultError::VaultNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_drops_keys_and_thumbnails() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::with_key_store(
            dir.path(),
            test_config(),
            Box::new(MemoryKeyStore::new(KdfParams::insecure_fast())),
            &passphrase("pw"),
        )
        .unwrap();
        let photo = vault.import_bytes("a.png", png(20, 20)).await.unwrap();
        vault.load_thumbnail(photo.id()).await.unwrap();
        assert_eq!(vault.cache_stats().entries, 1);

        vault.lock().unwrap();
        assert!(!vault.is_unlocked());
        assert_eq!(vault.cache_stats().entries, 0);
        let err = vault.list_all_photos().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
        assert_eq!(
            vault.encryption().encrypt(b"x").unwrap_err().kind(),
            ErrorKind::Crypto
        );

        assert!(vault.unlock(&passphrase("nope")).is_err());
        vault.unlock(&passphrase("pw")).unwrap();
        assert_eq!(vault.list_all_photos().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_clears_share_staging() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("v"), &passphrase("pw"), test_config()).unwrap();
        let photo = vault.import_bytes("a.png", png(8, 8)).await.unwrap();

        let report = vault.prepare_for_share(&[photo.id()], &CancelFlag::new()).await.unwrap();
        let shared = report.outputs()[0].to_path_buf();
        assert!(shared.exists());

        vault.lock().unwrap();
        assert!(!shared.exists());
        assert!(!vault.is_unlocked());
    }

    #[tokio::test]
    async fn test_replace_thumbnail() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("v"), &passphrase("pw"), test_config()).unwrap();
        let photo = vault.import_bytes("a.png", png(20, 20)).await.unwrap();
        vault.load_thumbnail(photo.id()).await.unwrap();

        vault.replace_thumbnail(photo.id(), b"rerendered".to_vec()).await.unwrap();
        let thumb = vault.load_thumbnail(photo.id()).await.unwrap();
        assert_eq!(thumb.as_slice(), b"rerendered");
    }

    #[tokio::test]
    async fn test_import_directory_and_cancel() {
        let dir = tempdir().unwrap();
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("one.png"), png(8, 8)).unwrap();
        std::fs::write(source.path().join("two.PNG"), png(9, 9)).unwrap();
        std::fs::write(source.path().join("notes.txt"), b"skip me").unwrap();

        let vault = PhotoVault::create(dir.path().join("v"), &passphrase("pw"), test_config()).unwrap();

        let missing = source.path().join("missing.jpg");
        let report = vault
            .import_files(&[source.path().to_path_buf(), missing], &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1.kind, ErrorKind::Storage);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = vault
            .import_files(&[source.path().to_path_buf()], &cancel)
            .await
            .unwrap();
        assert!(report.imported.is_empty());
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_batch_and_album_flow() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("v"), &passphrase("pw"), test_config()).unwrap();
        let a = vault.import_bytes("a.png", png(8, 8)).await.unwrap();
        let b = vault.import_bytes("b.png", png(8, 8)).await.unwrap();
        let c = vault.import_bytes("c.png", png(8, 8)).await.unwrap();

        let report = vault.set_favorites(&[a.id(), b.id()], true).await.unwrap();
        assert!(report.is_complete());
        assert!(!vault.toggle_favorite(b.id()).await.unwrap());
        assert_eq!(vault.photos_in_album("Favorites").await.unwrap().len(), 1);

        let report = vault.move_photos_to_album(&[b.id(), c.id()], "Trip").await.unwrap();
        assert_eq!(report.summary(), "2 photos moved");
        let names: Vec<_> = vault.albums().await.unwrap().into_iter().map(|a| a.name).collect();
        assert!(names.contains(&"Trip".to_string()));

        let tags = vec!["sea".to_string()];
        vault.add_tags_to_photos(&[a.id(), a.id()], &tags).await.unwrap();
        vault.add_tags_to_photos(&[a.id()], &tags).await.unwrap();
        assert_eq!(vault.get_photo(a.id()).await.unwrap().tags(), &tags[..]);
        assert_eq!(vault.photos_with_tag("sea").await.unwrap().len(), 1);

        assert_eq!(vault.delete_album("Trip").await.unwrap(), 2);

        let err = vault.delete_photo(PhotoId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(vault.list_all_photos().await.unwrap().len(), 3);

        let report = vault.delete_photos(&[a.id(), b.id(), c.id()]).await.unwrap();
        assert_eq!(report.summary(), "3 photos deleted");
        assert_eq!(vault.stats().await.unwrap().total_photos, 0);
    }
}
