//! Lucent Vault - Configuration
//!
//! Non-secret tuning knobs, persisted as `lucent.json` in the vault root.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Config file name inside the vault root
pub const CONFIG_FILE: &str = "lucent.json";

/// Argon2id cost parameters for sealing the master key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Time cost (iterations)
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 2,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests only
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Square thumbnail edge in pixels
    pub thumb_size: u32,
    /// Max thumbnails held in memory
    pub cache_max_entries: usize,
    /// Max decrypted thumbnail bytes held in memory
    pub cache_max_bytes: usize,
    /// Items processed concurrently by a batch
    pub batch_concurrency: usize,
    /// Window for the Recently Added album
    pub recent_window_days: i64,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            thumb_size: 256,
            cache_max_entries: 512,
            cache_max_bytes: 64 * 1024 * 1024,
            batch_concurrency: 4,
            recent_window_days: 30,
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    /// Load from the vault root, falling back to defaults when absent
    pub fn load_or_default(root: &Path) -> VaultResult<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            return Ok(Self::default());
        }

        let data = std::fs::read(&path)?;
        let config: VaultConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> VaultResult<()> {
        self.validate()?;
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(root.join(CONFIG_FILE), data)?;
        Ok(())
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.thumb_size == 0 {
            return Err(VaultError::InvalidInput("thumb_size must be > 0".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(VaultError::InvalidInput("batch_concurrency must be > 0".into()));
        }
        if self.recent_window_days < 0 {
            return Err(VaultError::InvalidInput("recent_window_days must be >= 0".into()));
        }
        Ok(())
    }
}
