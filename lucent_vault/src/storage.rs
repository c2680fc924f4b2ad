//! Lucent Vault - Secure Photo Storage
//!
//! Owns the on-disk layout of a vault:
//!
//! ```text
//! <root>/
//!   catalog.db          sealed photo + album records
//!   photos/<id>.lcb     sealed primary blobs
//!   thumbs/<id>.lcb     sealed thumbnails
//! ```
//!
//! Storage hands out [`SealedBlob`]s and never returns decrypted image bytes.
//! Plaintext passes through only on import, where it is sealed before it
//! touches disk.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;

use crate::catalog::{Catalog, CATALOG_FILE};
use crate::config::VaultConfig;
use crate::crypto::BlobDomain;
use crate::encryption::{EncryptionManager, SealedBlob};
use crate::error::{VaultError, VaultResult};
use crate::model::{Album, EncryptedPhoto, PhotoId, PhotoMetadata, SystemAlbum};
use crate::secure_fs::SecureFs;
use crate::thumbs::ThumbnailEngine;

pub const PHOTOS_DIR: &str = "photos";
pub const THUMBS_DIR: &str = "thumbs";
pub const BLOB_EXT: &str = "lcb";

const LOCK_STRIPES: usize = 64;

/// Per-id locks, striped over a fixed pool
struct IdLocks {
    stripes: Vec<Mutex<()>>,
}

impl IdLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, id: PhotoId) -> MutexGuard<'_, ()> {
        let stripe = (id.as_uuid().as_u128() % LOCK_STRIPES as u128) as usize;
        self.stripes[stripe].lock()
    }
}

/// Aggregate numbers for a vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub total_photos: usize,
    pub favorite_photos: usize,
    pub with_thumbnail: usize,
    pub user_albums: usize,
    /// Sum of plaintext sizes
    pub original_bytes: u64,
    /// Bytes under the vault root
    pub disk_bytes: u64,
}

/// Findings of a consistency pass between blobs and catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub orphan_blobs_removed: usize,
    pub orphan_thumbnails_removed: usize,
    pub temp_files_removed: usize,
    /// Catalog entries whose primary blob is gone
    pub missing_blobs: Vec<PhotoId>,
    /// Entries whose thumbnail path was cleared because the file is gone
    pub thumbnails_detached: usize,
}

impl ReconcileReport {
    pub fn is_healthy(&self) -> bool {
        self.missing_blobs.is_empty()
    }

    pub fn changed_anything(&self) -> bool {
        self.orphan_blobs_removed + self.orphan_thumbnails_removed + self.temp_files_removed
            + self.thumbnails_detached
            > 0
    }
}

/// Secure Photo Storage
pub struct SecurePhotoStorage {
    fs: SecureFs,
    catalog: Catalog,
    crypto: Arc<EncryptionManager>,
    engine: ThumbnailEngine,
    locks: IdLocks,
    /// Shared by every blob or catalog mutation, exclusive for `reconcile`
    maintenance: RwLock<()>,
    /// Serializes album create/delete and membership additions
    albums_lock: Mutex<()>,
    recent_window_days: i64,
}

impl SecurePhotoStorage {
    /// Open storage rooted at `root`, creating the blob directories if needed
    pub fn open(
        root: &Path,
        crypto: Arc<EncryptionManager>,
        config: &VaultConfig,
    ) -> VaultResult<Self> {
        std::fs::create_dir_all(root.join(PHOTOS_DIR))?;
        std::fs::create_dir_all(root.join(THUMBS_DIR))?;

        let catalog = Catalog::open(&root.join(CATALOG_FILE), Arc::clone(&crypto))?;

        Ok(Self {
            fs: SecureFs::new(root),
            catalog,
            crypto,
            engine: ThumbnailEngine::new(config.thumb_size),
            locks: IdLocks::new(),
            maintenance: RwLock::new(()),
            albums_lock: Mutex::new(()),
            recent_window_days: config.recent_window_days,
        })
    }

    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    fn photo_blob_path(id: PhotoId) -> String {
        format!("{}/{}.{}", PHOTOS_DIR, id, BLOB_EXT)
    }

    fn thumb_blob_path(id: PhotoId) -> String {
        format!("{}/{}.{}", THUMBS_DIR, id, BLOB_EXT)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IMPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Seal and store a new photo. Blobs are written first and the catalog
    /// entry last; if anything after the first blob write fails, the blobs
    /// are removed again.
    pub fn import_photo(&self, filename: &str, plaintext: &[u8]) -> VaultResult<EncryptedPhoto> {
        let id = PhotoId::new();
        let metadata = PhotoMetadata {
            file_size: plaintext.len() as u64,
            mime_type: detect_mime(plaintext).to_string(),
            fingerprint: Some(self.crypto.fingerprint(plaintext)?),
            ..Default::default()
        };
        let mut photo = EncryptedPhoto::new(
            id,
            sanitize_filename(filename),
            Self::photo_blob_path(id),
            metadata,
        );

        let _shared = self.maintenance.read();
        let _guard = self.locks.lock(id);

        if let Err(e) = self.write_import_artifacts(&mut photo, plaintext) {
            self.discard_blobs(&photo);
            return Err(e);
        }

        log::info!(
            "Imported photo {} ({} bytes, {})",
            id,
            photo.metadata.file_size,
            photo.metadata.mime_type
        );
        Ok(photo)
    }

    fn write_import_artifacts(&self, photo: &mut EncryptedPhoto, plaintext: &[u8]) -> VaultResult<()> {
        let sealed = self.crypto.encrypt(plaintext)?;
        self.fs.write_file(photo.blob_path(), &sealed)?;

        match self.engine.render(plaintext) {
            Ok(rendered) => {
                photo.metadata.dimensions = Some(rendered.source_dimensions);
                let thumb_path = Self::thumb_blob_path(photo.id());
                let sealed_thumb = self.crypto.encrypt_in(BlobDomain::Thumbnail, &rendered.jpeg)?;
                self.fs.write_file(&thumb_path, &sealed_thumb)?;
                photo.thumbnail_path = Some(thumb_path);
            }
            Err(e) => log::warn!("No thumbnail for {}: {}", photo.id(), e),
        }

        self.catalog.upsert_photo(photo)
    }

    fn discard_blobs(&self, photo: &EncryptedPhoto) {
        let paths = [
            Some(photo.blob_path().to_string()),
            photo.thumbnail_path.clone(),
        ];
        for path in paths.iter().flatten() {
            if let Err(e) = self.fs.remove_if_present(path) {
                log::warn!("Could not remove {} after failed import: {}", path, e);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════

    /// Catalog snapshot, newest first. Does not decrypt image bytes.
    pub fn list_all_photos(&self) -> VaultResult<Vec<EncryptedPhoto>> {
        self.catalog.list_photos()
    }

    pub fn get_photo(&self, id: PhotoId) -> VaultResult<EncryptedPhoto> {
        self.catalog
            .get_photo(id)?
            .ok_or(VaultError::PhotoNotFound(id))
    }

    pub fn contains_photo(&self, id: PhotoId) -> VaultResult<bool> {
        self.catalog.contains_photo(id)
    }

    pub fn read_photo_blob(&self, id: PhotoId) -> VaultResult<SealedBlob> {
        let photo = self.get_photo(id)?;
        let bytes = self.fs.read_file(photo.blob_path())?;
        Ok(SealedBlob::new(BlobDomain::Photo, bytes))
    }

    pub fn read_thumbnail_blob(&self, id: PhotoId) -> VaultResult<SealedBlob> {
        let photo = self.get_photo(id)?;
        let path = photo
            .thumbnail_path
            .ok_or(VaultError::ThumbnailMissing(id))?;
        let bytes = self.fs.read_file(&path).map_err(|e| match e {
            VaultError::BlobMissing(_) => VaultError::ThumbnailMissing(id),
            other => other,
        })?;
        Ok(SealedBlob::new(BlobDomain::Thumbnail, bytes))
    }

    pub fn photos_with_tag(&self, tag: &str) -> VaultResult<Vec<EncryptedPhoto>> {
        Ok(self
            .list_all_photos()?
            .into_iter()
            .filter(|p| p.metadata.has_tag(tag))
            .collect())
    }

    /// Photos in a system or user album, in the album's sort order
    pub fn photos_in_album(&self, name: &str) -> VaultResult<Vec<EncryptedPhoto>> {
        if let Some(system) = SystemAlbum::from_name(name) {
            let now = Utc::now();
            return Ok(self
                .list_all_photos()?
                .into_iter()
                .filter(|p| system.contains(p, now, self.recent_window_days))
                .collect());
        }

        let album = self
            .catalog
            .find_album(name)?
            .ok_or_else(|| VaultError::AlbumNotFound(name.trim().to_string()))?;

        let mut photos: Vec<_> = self
            .list_all_photos()?
            .into_iter()
            .filter(|p| p.metadata.in_album(&album.name))
            .collect();
        album.sort_order.sort(&mut photos);
        Ok(photos)
    }

    /// Groups of photos with identical content, largest group first
    pub fn find_duplicates(&self) -> VaultResult<Vec<Vec<EncryptedPhoto>>> {
        let mut groups: HashMap<String, Vec<EncryptedPhoto>> = HashMap::new();
        for photo in self.list_all_photos()? {
            if let Some(fp) = photo.metadata.fingerprint.clone() {
                groups.entry(fp).or_default().push(photo);
            }
        }

        let mut duplicates: Vec<_> = groups.into_values().filter(|g| g.len() > 1).collect();
        duplicates.sort_by(|a, b| b.len().cmp(&a.len()));
        Ok(duplicates)
    }

    pub fn stats(&self) -> VaultResult<StorageStats> {
        let photos = self.list_all_photos()?;
        Ok(StorageStats {
            total_photos: photos.len(),
            favorite_photos: photos.iter().filter(|p| p.is_favorite).count(),
            with_thumbnail: photos.iter().filter(|p| p.thumbnail_path.is_some()).count(),
            user_albums: self.catalog.list_albums()?.len(),
            original_bytes: photos.iter().map(|p| p.metadata.file_size).sum(),
            disk_bytes: self.fs.total_size()?,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove a photo, its thumbnail and its catalog entry.
    ///
    /// The primary blob must exist; otherwise nothing is touched and
    /// `BlobMissing` is returned. The catalog entry goes last, so a failure
    /// part-way leaves the photo listed rather than orphaning files.
    pub fn delete_photo(&self, id: PhotoId) -> VaultResult<()> {
        let _shared = self.maintenance.read();
        let _guard = self.locks.lock(id);
        let mut photo = self.get_photo(id)?;

        if !self.fs.exists(photo.blob_path()) {
            return Err(VaultError::BlobMissing(photo.blob_path().to_string()));
        }

        if let Some(thumb) = &photo.thumbnail_path {
            self.fs.remove_if_present(thumb)?;
        }

        if let Err(e) = self.fs.remove_file(photo.blob_path()) {
            if photo.thumbnail_path.take().is_some() {
                if let Err(write_err) = self.catalog.upsert_photo(&photo) {
                    log::warn!("Could not detach thumbnail of {}: {}", id, write_err);
                }
            }
            return Err(e);
        }

        self.catalog.remove_photo(id)?;
        log::info!("Deleted photo {}", id);
        Ok(())
    }

    /// Replace a photo's metadata wholesale
    pub fn update_metadata(&self, id: PhotoId, mut metadata: PhotoMetadata) -> VaultResult<EncryptedPhoto> {
        metadata.normalize();
        self.mutate(id, |photo| {
            photo.metadata = metadata;
            true
        })
    }

    pub fn set_favorite(&self, id: PhotoId, favorite: bool) -> VaultResult<EncryptedPhoto> {
        self.mutate(id, |photo| {
            let changed = photo.is_favorite != favorite;
            photo.is_favorite = favorite;
            changed
        })
    }

    /// Add a photo to an existing user album. The membership is stored under
    /// the album's own spelling of its name.
    pub fn add_to_album(&self, id: PhotoId, album: &str) -> VaultResult<EncryptedPhoto> {
        let _albums = self.albums_lock.lock();
        let album = match self.find_album(album)? {
            Some(album) if album.is_system => return Err(VaultError::SystemAlbum(album.name)),
            Some(album) => album,
            None => return Err(VaultError::AlbumNotFound(album.trim().to_string())),
        };
        self.mutate(id, |photo| photo.metadata.add_album(&album.name))
    }

    pub fn remove_from_album(&self, id: PhotoId, album: &str) -> VaultResult<EncryptedPhoto> {
        self.mutate(id, |photo| photo.metadata.remove_album(album))
    }

    pub fn add_tags(&self, id: PhotoId, tags: &[String]) -> VaultResult<EncryptedPhoto> {
        self.mutate(id, |photo| {
            tags.iter()
                .fold(false, |changed, tag| photo.metadata.add_tag(tag) || changed)
        })
    }

    pub fn remove_tags(&self, id: PhotoId, tags: &[String]) -> VaultResult<EncryptedPhoto> {
        self.mutate(id, |photo| {
            tags.iter()
                .fold(false, |changed, tag| photo.metadata.remove_tag(tag) || changed)
        })
    }

    /// Seal and store a (re)generated thumbnail for an existing photo.
    /// Callers holding a decrypted copy must evict it; see `ThumbnailLoader::replace`.
    pub fn write_thumbnail(&self, id: PhotoId, thumbnail: &[u8]) -> VaultResult<EncryptedPhoto> {
        let _shared = self.maintenance.read();
        let _guard = self.locks.lock(id);
        let mut photo = self.get_photo(id)?;

        let path = Self::thumb_blob_path(id);
        let sealed = self.crypto.encrypt_in(BlobDomain::Thumbnail, thumbnail)?;
        self.fs.write_file(&path, &sealed)?;

        photo.thumbnail_path = Some(path);
        self.catalog.upsert_photo(&photo)?;
        Ok(photo)
    }

    /// Read-modify-write of one catalog entry under its id lock.
    /// `apply` returns whether anything changed; unchanged entries are not rewritten.
    fn mutate<F>(&self, id: PhotoId, apply: F) -> VaultResult<EncryptedPhoto>
    where
        F: FnOnce(&mut EncryptedPhoto) -> bool,
    {
        let _shared = self.maintenance.read();
        let _guard = self.locks.lock(id);
        let mut photo = self.get_photo(id)?;
        if apply(&mut photo) {
            self.catalog.upsert_photo(&photo)?;
            log::debug!("Updated photo {}", id);
        }
        Ok(photo)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    /// System albums first, then user albums by creation time
    pub fn list_albums(&self) -> VaultResult<Vec<Album>> {
        let mut albums: Vec<Album> = SystemAlbum::ALL.iter().map(|a| a.to_album()).collect();
        albums.extend(self.catalog.list_albums()?);
        Ok(albums)
    }

    pub fn find_album(&self, name: &str) -> VaultResult<Option<Album>> {
        if let Some(system) = SystemAlbum::from_name(name) {
            return Ok(Some(system.to_album()));
        }
        self.catalog.find_album(name)
    }

    pub fn create_album(&self, album: Album) -> VaultResult<Album> {
        let name = validate_album_name(&album.name)?.to_string();

        let _guard = self.albums_lock.lock();
        if self.catalog.find_album(&name)?.is_some() {
            return Err(VaultError::AlbumExists(name));
        }

        let album = Album {
            name,
            is_system: false,
            ..album
        };
        self.catalog.upsert_album(&album)?;
        log::info!("Created album {}", album.name);
        Ok(album)
    }

    /// Existing user album by name (case-insensitive), created if absent
    pub fn ensure_album(&self, name: &str) -> VaultResult<Album> {
        let name = validate_album_name(name)?;

        let _guard = self.albums_lock.lock();
        if let Some(existing) = self.catalog.find_album(name)? {
            return Ok(existing);
        }

        let album = Album::new(name);
        self.catalog.upsert_album(&album)?;
        log::info!("Created album {}", album.name);
        Ok(album)
    }

    /// Delete a user album. Membership is stripped from every photo first and
    /// the album record goes last. Returns how many photos were detached.
    pub fn delete_album(&self, name: &str) -> VaultResult<usize> {
        let name = validate_album_name(name)?;

        let _guard = self.albums_lock.lock();
        let album = self
            .catalog
            .find_album(name)?
            .ok_or_else(|| VaultError::AlbumNotFound(name.to_string()))?;

        let mut detached = 0;
        for photo in self.list_all_photos()? {
            if photo.metadata.in_album(&album.name) {
                match self.remove_from_album(photo.id(), &album.name) {
                    Ok(_) => detached += 1,
                    // Deleted concurrently
                    Err(VaultError::PhotoNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.catalog.remove_album(&album)?;
        log::info!("Deleted album {} ({} photos detached)", album.name, detached);
        Ok(detached)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Bring blobs and catalog back in line after an interrupted operation.
    /// Waits for in-progress mutations and holds off new ones until done.
    pub fn reconcile(&self) -> VaultResult<ReconcileReport> {
        let _exclusive = self.maintenance.write();
        let mut report = ReconcileReport::default();
        let known: HashSet<PhotoId> = self.catalog.photo_ids()?.into_iter().collect();

        report.orphan_blobs_removed =
            self.sweep_dir(PHOTOS_DIR, &known, &mut report.temp_files_removed)?;
        report.orphan_thumbnails_removed =
            self.sweep_dir(THUMBS_DIR, &known, &mut report.temp_files_removed)?;

        for mut photo in self.list_all_photos()? {
            if !self.fs.exists(photo.blob_path()) {
                log::warn!("Photo {} has no blob at {}", photo.id(), photo.blob_path());
                report.missing_blobs.push(photo.id());
                continue;
            }

            let thumb_gone = photo
                .thumbnail_path
                .as_deref()
                .map_or(false, |path| !self.fs.exists(path));
            if thumb_gone {
                photo.thumbnail_path = None;
                self.catalog.upsert_photo(&photo)?;
                report.thumbnails_detached += 1;
            }
        }

        if report.changed_anything() || !report.is_healthy() {
            log::info!("Reconcile: {:?}", report);
        }
        Ok(report)
    }

    /// Remove files in `dir` that belong to no catalog entry.
    /// Returns the number of orphan blobs removed.
    fn sweep_dir(&self, dir: &str, known: &HashSet<PhotoId>, temp_removed: &mut usize) -> VaultResult<usize> {
        let mut removed = 0;

        for name in self.fs.list_dir(dir)? {
            let path = format!("{}/{}", dir, name);
            let stem = name.strip_suffix(&format!(".{}", BLOB_EXT));

            match stem.map(|s| s.parse::<PhotoId>()) {
                Some(Ok(id)) if known.contains(&id) => {}
                Some(Ok(_)) => {
                    log::warn!("Removing orphan blob {}", path);
                    self.fs.remove_if_present(&path)?;
                    removed += 1;
                }
                _ if name.ends_with(".tmp") => {
                    self.fs.remove_if_present(&path)?;
                    *temp_removed += 1;
                }
                _ => log::debug!("Ignoring foreign file {}", path),
            }
        }

        Ok(removed)
    }
}

/// Trimmed album name that is usable for a user album
pub(crate) fn validate_album_name(name: &str) -> VaultResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::InvalidInput("Album name is empty".into()));
    }
    if SystemAlbum::from_name(name).is_some() {
        return Err(VaultError::SystemAlbum(name.to_string()));
    }
    Ok(name)
}

/// Keep only the final path component of an imported file name
fn sanitize_filename(filename: &str) -> String {
    Path::new(filename.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("untitled")
        .to_string()
}

/// MIME type from magic bytes
fn detect_mime(data: &[u8]) -> &'static str {
    const UNKNOWN: &str = "application/octet-stream";

    match data {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [_, _, _, _, b'f', b't', b'y', b'p', brand @ ..] if brand.len() >= 4 => match &brand[..4] {
            b"heic" | b"heix" => "image/heic",
            b"mif1" => "image/heif",
            _ => UNKNOWN,
        },
        _ => UNKNOWN,
    }
}
