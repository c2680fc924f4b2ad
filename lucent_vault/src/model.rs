//! Lucent Vault - Catalog Data Model
//!
//! Photos, their metadata, and albums. Everything here is serialized into
//! sealed catalog rows; nothing in this module touches disk or keys.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable photo identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(Uuid);

impl PhotoId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PhotoId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for PhotoId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// GPS position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Camera fields. Import never fills these in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub gps: Option<GpsCoordinate>,
    pub iso: Option<u32>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
}

/// Photo metadata (stored sealed inside the catalog row)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    /// Plaintext size in bytes
    pub file_size: u64,
    /// MIME type sniffed from magic bytes
    pub mime_type: String,
    pub capture_date: Option<DateTime<Utc>>,
    pub dimensions: Option<Dimensions>,
    pub tags: Vec<String>,
    pub albums: Vec<String>,
    #[serde(default)]
    pub exif: ExifData,
    /// Keyed content fingerprint (hex), for duplicate detection
    pub fingerprint: Option<String>,
}

impl PhotoMetadata {
    /// Add a tag if absent. Returns true when the tag list changed.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        add_if_absent(&mut self.tags, tag, tag_eq)
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        remove_name(&mut self.tags, tag, tag_eq)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| tag_eq(t, tag.trim()))
    }

    /// Add album membership if absent. Album names compare case-insensitively,
    /// the same way album lookup does. Returns true when membership changed.
    pub fn add_album(&mut self, album: &str) -> bool {
        add_if_absent(&mut self.albums, album, album_eq)
    }

    pub fn remove_album(&mut self, album: &str) -> bool {
        remove_name(&mut self.albums, album, album_eq)
    }

    pub fn in_album(&self, album: &str) -> bool {
        self.albums.iter().any(|a| album_eq(a, album.trim()))
    }

    /// Trim names, drop empties and duplicates (first occurrence wins)
    pub fn normalize(&mut self) {
        self.tags = dedup_names(std::mem::take(&mut self.tags), tag_eq);
        self.albums = dedup_names(std::mem::take(&mut self.albums), album_eq);
    }
}

fn tag_eq(a: &str, b: &str) -> bool {
    a == b
}

fn album_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn add_if_absent(list: &mut Vec<String>, name: &str, eq: fn(&str, &str) -> bool) -> bool {
    let name = name.trim();
    if name.is_empty() || list.iter().any(|n| eq(n, name)) {
        return false;
    }
    list.push(name.to_string());
    true
}

fn remove_name(list: &mut Vec<String>, name: &str, eq: fn(&str, &str) -> bool) -> bool {
    let name = name.trim();
    let before = list.len();
    list.retain(|n| !eq(n, name));
    list.len() != before
}

fn dedup_names(names: Vec<String>, eq: fn(&str, &str) -> bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        add_if_absent(&mut out, &name, eq);
    }
    out
}

/// A photo as recorded in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPhoto {
    id: PhotoId,
    /// Vault-relative path of the primary blob
    blob_path: String,
    pub original_filename: String,
    /// Vault-relative path of the thumbnail blob
    pub thumbnail_path: Option<String>,
    pub metadata: PhotoMetadata,
    pub date_added: DateTime<Utc>,
    pub is_favorite: bool,
}

impl EncryptedPhoto {
    pub fn new(
        id: PhotoId,
        original_filename: impl Into<String>,
        blob_path: impl Into<String>,
        metadata: PhotoMetadata,
    ) -> Self {
        Self {
            id,
            blob_path: blob_path.into(),
            original_filename: original_filename.into(),
            thumbnail_path: None,
            metadata,
            date_added: Utc::now(),
            is_favorite: false,
        }
    }

    pub fn id(&self) -> PhotoId {
        self.id
    }

    pub fn blob_path(&self) -> &str {
        &self.blob_path
    }

    pub fn tags(&self) -> &[String] {
        &self.metadata.tags
    }

    pub fn albums(&self) -> &[String] {
        &self.metadata.albums
    }
}

/// How an album orders its photos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlbumSortOrder {
    #[default]
    DateAddedNewest,
    DateAddedOldest,
    CaptureDate,
    Filename,
}

impl AlbumSortOrder {
    pub fn sort(&self, photos: &mut [EncryptedPhoto]) {
        match self {
            AlbumSortOrder::DateAddedNewest => photos.sort_by(|a, b| b.date_added.cmp(&a.date_added)),
            AlbumSortOrder::DateAddedOldest => photos.sort_by(|a, b| a.date_added.cmp(&b.date_added)),
            AlbumSortOrder::CaptureDate => photos.sort_by(|a, b| {
                let ka = a.metadata.capture_date.unwrap_or(a.date_added);
                let kb = b.metadata.capture_date.unwrap_or(b.date_added);
                kb.cmp(&ka)
            }),
            AlbumSortOrder::Filename => photos.sort_by(|a, b| {
                a.original_filename
                    .to_lowercase()
                    .cmp(&b.original_filename.to_lowercase())
            }),
        }
    }
}

/// Virtual albums whose membership is computed from photo attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemAlbum {
    AllPhotos,
    Favorites,
    RecentlyAdded,
}

impl SystemAlbum {
    pub const ALL: [SystemAlbum; 3] = [
        SystemAlbum::AllPhotos,
        SystemAlbum::Favorites,
        SystemAlbum::RecentlyAdded,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SystemAlbum::AllPhotos => "All Photos",
            SystemAlbum::Favorites => "Favorites",
            SystemAlbum::RecentlyAdded => "Recently Added",
        }
    }

    /// Case-insensitive lookup by display name
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|album| album.name().eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, photo: &EncryptedPhoto, now: DateTime<Utc>, recent_days: i64) -> bool {
        match self {
            SystemAlbum::AllPhotos => true,
            SystemAlbum::Favorites => photo.is_favorite,
            SystemAlbum::RecentlyAdded => photo.date_added >= now - Duration::days(recent_days),
        }
    }

    fn stable_id(&self) -> Uuid {
        // Fixed ids so the UI can key on them across launches
        match self {
            SystemAlbum::AllPhotos => Uuid::from_u128(1),
            SystemAlbum::Favorites => Uuid::from_u128(2),
            SystemAlbum::RecentlyAdded => Uuid::from_u128(3),
        }
    }

    pub fn to_album(&self) -> Album {
        Album {
            id: self.stable_id(),
            name: self.name().to_string(),
            description: None,
            theme_color: None,
            sort_order: AlbumSortOrder::DateAddedNewest,
            is_system: true,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Album record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Hex color such as `#FF8800`
    pub theme_color: Option<String>,
    pub sort_order: AlbumSortOrder,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Album {
    /// New user album
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
            description: None,
            theme_color: None,
            sort_order: AlbumSortOrder::default(),
            is_system: false,
            created_at: Utc::now(),
        }
    }
}
