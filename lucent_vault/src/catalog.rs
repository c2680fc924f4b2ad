//! Lucent Vault - Photo Catalog (Encrypted Database)
//!
//! SQLite table of sealed JSON records. Only the row key and the
//! date-added ordering column are stored in the clear.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::BlobDomain;
use crate::encryption::EncryptionManager;
use crate::error::{VaultError, VaultResult};
use crate::model::{Album, EncryptedPhoto, PhotoId};

/// Catalog file name inside the vault root
pub const CATALOG_FILE: &str = "catalog.db";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS photos (
        id TEXT PRIMARY KEY,
        data BLOB NOT NULL,
        date_added TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS albums (
        id TEXT PRIMARY KEY,
        data BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_photos_added ON photos(date_added);
"#;

/// Photo Catalog
pub struct Catalog {
    conn: Mutex<Connection>,
    crypto: Arc<EncryptionManager>,
}

impl Catalog {
    /// Open (or create) the catalog database at the given path
    pub fn open(path: &Path, crypto: Arc<EncryptionManager>) -> VaultResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, crypto)
    }

    pub fn open_in_memory(crypto: Arc<EncryptionManager>) -> VaultResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, crypto)
    }

    fn init(conn: Connection, crypto: Arc<EncryptionManager>) -> VaultResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            crypto,
        })
    }

    fn seal_record<T: Serialize>(&self, record: &T) -> VaultResult<Vec<u8>> {
        let json = serde_json::to_vec(record)?;
        self.crypto.encrypt_in(BlobDomain::Catalog, &json)
    }

    fn open_record<T: DeserializeOwned>(&self, key: &str, data: &[u8]) -> VaultResult<T> {
        let json = self.crypto.decrypt_in(BlobDomain::Catalog, data).map_err(|e| match e {
            VaultError::KeyUnavailable => e,
            other => VaultError::CatalogCorrupted(format!("{}: {}", key, other)),
        })?;
        serde_json::from_slice(&json)
            .map_err(|e| VaultError::CatalogCorrupted(format!("{}: {}", key, e)))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTOS
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert or replace a photo record
    pub fn upsert_photo(&self, photo: &EncryptedPhoto) -> VaultResult<()> {
        let sealed = self.seal_record(photo)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO photos (id, data, date_added) VALUES (?1, ?2, ?3)",
            params![photo.id().to_string(), sealed, photo.date_added.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_photo(&self, id: PhotoId) -> VaultResult<Option<EncryptedPhoto>> {
        let key = id.to_string();
        let data: Option<Vec<u8>> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT data FROM photos WHERE id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };

        data.map(|bytes| self.open_record(&key, &bytes)).transpose()
    }

    pub fn contains_photo(&self, id: PhotoId) -> VaultResult<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM photos WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remove a photo record. Returns whether a row was deleted.
    pub fn remove_photo(&self, id: PhotoId) -> VaultResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM photos WHERE id = ?1", params![id.to_string()])?;
        Ok(n > 0)
    }

    /// All photo records, newest first. Any unreadable row fails the call.
    pub fn list_photos(&self) -> VaultResult<Vec<EncryptedPhoto>> {
        let rows: Vec<(String, Vec<u8>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT id, data FROM photos ORDER BY date_added DESC, id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.iter()
            .map(|(key, data)| self.open_record(key, data))
            .collect()
    }

    /// Every photo id in the catalog, without decrypting rows
    pub fn photo_ids(&self) -> VaultResult<Vec<PhotoId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM photos")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        keys.into_iter()
            .map(|k| {
                k.parse()
                    .map_err(|_| VaultError::CatalogCorrupted(format!("bad photo id: {}", k)))
            })
            .collect()
    }

    pub fn count_photos(&self) -> VaultResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn upsert_album(&self, album: &Album) -> VaultResult<()> {
        let sealed = self.seal_record(album)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO albums (id, data) VALUES (?1, ?2)",
            params![album.id.to_string(), sealed],
        )?;
        Ok(())
    }

    pub fn list_albums(&self) -> VaultResult<Vec<Album>> {
        let rows: Vec<(String, Vec<u8>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT id, data FROM albums")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut albums = rows
            .iter()
            .map(|(key, data)| self.open_record::<Album>(key, data))
            .collect::<VaultResult<Vec<_>>>()?;
        albums.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(albums)
    }

    /// Case-insensitive lookup by name
    pub fn find_album(&self, name: &str) -> VaultResult<Option<Album>> {
        let name = name.trim();
        Ok(self
            .list_albums()?
            .into_iter()
            .find(|a| a.name.eq_ignore_ascii_case(name)))
    }

    pub fn remove_album(&self, album: &Album) -> VaultResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM albums WHERE id = ?1", params![album.id.to_string()])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::VaultKey;
    use crate::model::PhotoMetadata;
    use chrono::{Duration, Utc};

    fn catalog() -> Catalog {
        let crypto = Arc::new(EncryptionManager::with_master_key(&VaultKey::generate()).unwrap());
        Catalog::open_in_memory(crypto).unwrap()
    }

    fn photo(name: &str) -> EncryptedPhoto {
        let id = PhotoId::new();
        EncryptedPhoto::new(id, name, format!("photos/{}.lcb", id), PhotoMetadata::default())
    }

    #[test]
    fn test_photo_crud() {
        let cat = catalog();
        let mut p = photo("a.jpg");
        cat.upsert_photo(&p).unwrap();
        assert_eq!(cat.get_photo(p.id()).unwrap(), Some(p.clone()));

        p.is_favorite = true;
        cat.upsert_photo(&p).unwrap();
        assert!(cat.get_photo(p.id()).unwrap().unwrap().is_favorite);
        assert_eq!(cat.count_photos().unwrap(), 1);

        assert!(cat.remove_photo(p.id()).unwrap());
        assert!(!cat.remove_photo(p.id()).unwrap());
        assert_eq!(cat.get_photo(p.id()).unwrap(), None);
    }

    #[test]
    fn test_list_newest_first() {
        let cat = catalog();
        let mut old = photo("old.jpg");
        old.date_added = Utc::now() - Duration::days(2);
        let new = photo("new.jpg");
        cat.upsert_photo(&old).unwrap();
        cat.upsert_photo(&new).unwrap();

        let names: Vec<_> = cat
            .list_photos()
            .unwrap()
            .into_iter()
            .map(|p| p.original_filename)
            .collect();
        assert_eq!(names, vec!["new.jpg", "old.jpg"]);
    }

    #[test]
    fn test_corrupt_row_fails_listing() {
        let cat = catalog();
        cat.upsert_photo(&photo("ok.jpg")).unwrap();
        cat.conn
            .lock()
            .execute(
                "INSERT INTO photos (id, data, date_added) VALUES ('x', X'00010203', '2020-01-01')",
                [],
            )
            .unwrap();

        assert!(matches!(cat.list_photos(), Err(VaultError::CatalogCorrupted(_))));
    }

    #[test]
    fn test_rows_are_sealed() {
        let cat = catalog();
        let p = photo("very-private-name.jpg");
        cat.upsert_photo(&p).unwrap();

        let raw: Vec<u8> = cat
            .conn
            .lock()
            .query_row("SELECT data FROM photos", [], |row| row.get(0))
            .unwrap();
        let needle = b"very-private-name";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_albums() {
        let cat = catalog();
        let album = Album::new("Trip");
        cat.upsert_album(&album).unwrap();

        assert_eq!(cat.find_album("trip").unwrap(), Some(album.clone()));
        assert_eq!(cat.list_albums().unwrap().len(), 1);
        assert!(cat.remove_album(&album).unwrap());
        assert!(cat.find_album("Trip").unwrap().is_none());
    }
}
