//! Lucent Vault - Blob File I/O
//!
//! Raw reads and writes of sealed blobs, addressed by vault-relative path.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Extension of a file between rename and unlink; swept as a temp file
const DOOMED_EXT: &str = "del.tmp";

/// Secure Filesystem Handler
pub struct SecureFs {
    root: PathBuf,
}

impl SecureFs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path, refusing anything that escapes the root
    fn full_path(&self, relative: &str) -> VaultResult<PathBuf> {
        let rel = Path::new(relative);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(VaultError::InvalidInput(format!("Bad blob path: {}", relative)));
        }
        Ok(self.root.join(rel))
    }

    /// Write a file atomically (temp file + rename)
    pub fn write_file(&self, relative_path: &str, data: &[u8]) -> VaultResult<()> {
        let path = self.full_path(relative_path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    pub fn read_file(&self, relative_path: &str) -> VaultResult<Vec<u8>> {
        let path = self.full_path(relative_path)?;
        if !path.is_file() {
            return Err(VaultError::BlobMissing(relative_path.to_string()));
        }
        Ok(fs::read(&path)?)
    }

    /// Delete a file that must exist
    pub fn remove_file(&self, relative_path: &str) -> VaultResult<()> {
        let path = self.full_path(relative_path)?;
        if !path.is_file() {
            return Err(VaultError::BlobMissing(relative_path.to_string()));
        }
        Self::scrub_and_remove(&path)
    }

    /// Delete a file if it is there. Returns whether anything was removed.
    pub fn remove_if_present(&self, relative_path: &str) -> VaultResult<bool> {
        let path = self.full_path(relative_path)?;
        if !path.is_file() {
            return Ok(false);
        }
        Self::scrub_and_remove(&path)?;
        Ok(true)
    }

    /// Move the file aside, overwrite it with zeros, then unlink it.
    /// A rename that fails leaves the original untouched.
    fn scrub_and_remove(path: &Path) -> VaultResult<()> {
        let doomed = path.with_extension(DOOMED_EXT);
        fs::rename(path, &doomed)?;

        if let Ok(metadata) = fs::metadata(&doomed) {
            let size = metadata.len() as usize;
            if size > 0 {
                if let Ok(mut file) = OpenOptions::new().write(true).open(&doomed) {
                    let zeros = vec![0u8; size.min(1024 * 1024)];
                    let mut remaining = size;
                    while remaining > 0 {
                        let to_write = remaining.min(zeros.len());
                        if file.write_all(&zeros[..to_write]).is_err() {
                            break;
                        }
                        remaining -= to_write;
                    }
                    let _ = file.sync_all();
                }
            }
        }

        fs::remove_file(&doomed)?;
        Ok(())
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.full_path(relative_path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// File names in a vault-relative directory (empty if the directory is absent)
    pub fn list_dir(&self, relative_path: &str) -> VaultResult<Vec<String>> {
        let path = self.full_path(relative_path)?;
        let mut files = Vec::new();

        if path.is_dir() {
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    files.push(name.to_string());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Total bytes under the vault root
    pub fn total_size(&self) -> VaultResult<u64> {
        let mut size = 0;
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| VaultError::IoError(e.into()))?;
            if entry.file_type().is_file() {
                size += entry.metadata().map_err(|e| VaultError::IoError(e.into()))?.len();
            }
        }
        Ok(size)
    }
}
