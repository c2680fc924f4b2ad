//! Lucent Vault - Batch Operations
//!
//! Applies one operation to many photos. Every distinct id is processed on
//! its own blocking worker, at most `batch_concurrency` at a time, and gets
//! exactly one outcome in the report. One failing item never stops the rest.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use zeroize::Zeroizing;

use crate::encryption::EncryptionManager;
use crate::error::{ErrorKind, VaultError, VaultResult};
use crate::model::PhotoId;
use crate::secure_fs::SecureFs;
use crate::storage::{validate_album_name, SecurePhotoStorage};
use crate::thumbs::ThumbnailCache;

/// Staging directory for prepared shares, inside the vault root
pub const SHARE_DIR: &str = "share";

/// Operation applied to every photo of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Delete,
    /// Add to a user album, created if it does not exist
    MoveToAlbum(String),
    SetFavorite(bool),
    AddTags(Vec<String>),
    RemoveTags(Vec<String>),
    /// Write decrypted copies into `destination`
    Export { destination: PathBuf },
    /// Write decrypted copies into the vault's share staging directory
    PrepareForShare,
}

impl BatchOperation {
    /// Past-tense verb for summaries
    pub fn verb(&self) -> &'static str {
        match self {
            BatchOperation::Delete => "deleted",
            BatchOperation::MoveToAlbum(_) => "moved",
            BatchOperation::SetFavorite(true) => "favorited",
            BatchOperation::SetFavorite(false) => "unfavorited",
            BatchOperation::AddTags(_) => "tagged",
            BatchOperation::RemoveTags(_) => "untagged",
            BatchOperation::Export { .. } => "exported",
            BatchOperation::PrepareForShare => "prepared for sharing",
        }
    }

    /// Reject unusable parameters before any item runs
    fn validate(self) -> VaultResult<Self> {
        match self {
            BatchOperation::MoveToAlbum(name) => match validate_album_name(&name) {
                Ok(name) => Ok(BatchOperation::MoveToAlbum(name.to_string())),
                Err(VaultError::SystemAlbum(name)) => Err(VaultError::InvalidInput(format!(
                    "Cannot move photos into system album {}",
                    name
                ))),
                Err(e) => Err(e),
            },
            BatchOperation::AddTags(tags) => Ok(BatchOperation::AddTags(clean_tags(tags)?)),
            BatchOperation::RemoveTags(tags) => Ok(BatchOperation::RemoveTags(clean_tags(tags)?)),
            BatchOperation::Export { destination } if destination.as_os_str().is_empty() => {
                Err(VaultError::InvalidInput("Export destination is empty".into()))
            }
            other => Ok(other),
        }
    }
}

fn clean_tags(tags: Vec<String>) -> VaultResult<Vec<String>> {
    let tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        return Err(VaultError::InvalidInput("No tags given".into()));
    }
    Ok(tags)
}

/// Why one item failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&VaultError> for ItemFailure {
    fn from(e: &VaultError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Result for one photo of a batch.
///
/// Failures carry the error of the storage or crypto call that failed, with
/// two exceptions produced by the coordinator itself: items skipped after
/// cancellation get kind `Cancelled`, and an item whose worker panicked gets
/// kind `Storage` with the message "worker aborted".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ItemOutcome {
    Succeeded {
        /// File written by export or share
        output: Option<PathBuf>,
    },
    Failed(ItemFailure),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }

    fn cancelled() -> Self {
        ItemOutcome::Failed(ItemFailure::from(&VaultError::Cancelled))
    }
}

impl From<VaultResult<Option<PathBuf>>> for ItemOutcome {
    fn from(result: VaultResult<Option<PathBuf>>) -> Self {
        match result {
            Ok(output) => ItemOutcome::Succeeded { output },
            Err(e) => ItemOutcome::Failed(ItemFailure::from(&e)),
        }
    }
}

/// Aggregate state of a finished batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchStatus {
    Complete,
    Partial { succeeded: usize, failed: usize },
}

/// Per-item results of a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    verb: &'static str,
    outcomes: HashMap<PhotoId, ItemOutcome>,
}

impl BatchReport {
    fn new(verb: &'static str) -> Self {
        Self {
            verb,
            outcomes: HashMap::new(),
        }
    }

    fn record(&mut self, id: PhotoId, outcome: ItemOutcome) {
        self.outcomes.insert(id, outcome);
    }

    /// Distinct ids in the request
    pub fn requested(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.requested() - self.succeeded()
    }

    pub fn status(&self) -> BatchStatus {
        let succeeded = self.succeeded();
        if succeeded == self.requested() {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial {
                succeeded,
                failed: self.requested() - succeeded,
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == BatchStatus::Complete
    }

    pub fn outcome(&self, id: PhotoId) -> Option<&ItemOutcome> {
        self.outcomes.get(&id)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (PhotoId, &ItemOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    pub fn failures(&self) -> Vec<(PhotoId, &ItemFailure)> {
        let mut failures: Vec<_> = self
            .outcomes()
            .filter_map(|(id, outcome)| match outcome {
                ItemOutcome::Failed(failure) => Some((id, failure)),
                ItemOutcome::Succeeded { .. } => None,
            })
            .collect();
        failures.sort_by_key(|(id, _)| *id);
        failures
    }

    /// Files written by an export or share batch
    pub fn outputs(&self) -> Vec<&Path> {
        let mut outputs: Vec<&Path> = self
            .outcomes
            .values()
            .filter_map(|o| match o {
                ItemOutcome::Succeeded { output: Some(path) } => Some(path.as_path()),
                _ => None,
            })
            .collect();
        outputs.sort();
        outputs
    }

    /// "3 photos deleted" or "2 photos deleted, 1 failed"
    pub fn summary(&self) -> String {
        let succeeded = self.succeeded();
        let noun = if succeeded == 1 { "photo" } else { "photos" };
        match self.status() {
            BatchStatus::Complete => format!("{} {} {}", succeeded, noun, self.verb),
            BatchStatus::Partial { failed, .. } => {
                format!("{} {} {}, {} failed", succeeded, noun, self.verb, failed)
            }
        }
    }
}

/// Cooperative cancellation, checked before each item starts
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a worker needs to apply an operation to one photo
#[derive(Clone)]
struct ItemWorker {
    storage: Arc<SecurePhotoStorage>,
    crypto: Arc<EncryptionManager>,
    cache: Arc<ThumbnailCache>,
    share_dir: PathBuf,
}

impl ItemWorker {
    fn apply(&self, operation: &BatchOperation, id: PhotoId) -> VaultResult<Option<PathBuf>> {
        match operation {
            BatchOperation::Delete => {
                self.storage.delete_photo(id)?;
                self.cache.remove(id);
            }
            BatchOperation::MoveToAlbum(album) => {
                self.storage.add_to_album(id, album)?;
            }
            BatchOperation::SetFavorite(favorite) => {
                self.storage.set_favorite(id, *favorite)?;
            }
            BatchOperation::AddTags(tags) => {
                self.storage.add_tags(id, tags)?;
            }
            BatchOperation::RemoveTags(tags) => {
                self.storage.remove_tags(id, tags)?;
            }
            BatchOperation::Export { destination } => {
                return self.export_to(id, destination).map(Some);
            }
            BatchOperation::PrepareForShare => {
                return self.export_to(id, &self.share_dir).map(Some);
            }
        }
        Ok(None)
    }

    fn export_to(&self, id: PhotoId, dir: &Path) -> VaultResult<PathBuf> {
        let photo = self.storage.get_photo(id)?;
        let sealed = self.storage.read_photo_blob(id)?;
        let plaintext = Zeroizing::new(self.crypto.open(&sealed)?);
        write_unique(dir, &photo.original_filename, &plaintext)
    }
}

/// Write `data` as `dir/filename`, adding " (n)" before the extension
/// until the name is free
fn write_unique(dir: &Path, filename: &str, data: &[u8]) -> VaultResult<PathBuf> {
    create_unique(dir, filename, |file| {
        file.write_all(data)?;
        file.sync_all()
    })
}

/// Create the first free name and fill it with `fill`. A file that could not
/// be filled is removed again.
fn create_unique<F>(dir: &Path, filename: &str, fill: F) -> VaultResult<PathBuf>
where
    F: Fn(&mut File) -> std::io::Result<()>,
{
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("photo");
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{} ({}){}", stem, n, ext))
        };

        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                if let Err(e) = fill(&mut file) {
                    drop(file);
                    if let Err(remove_err) = std::fs::remove_file(&candidate) {
                        log::warn!("Could not remove partial {}: {}", candidate.display(), remove_err);
                    }
                    return Err(e.into());
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Batch Operation Coordinator
pub struct BatchCoordinator {
    worker: ItemWorker,
    concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(
        storage: Arc<SecurePhotoStorage>,
        crypto: Arc<EncryptionManager>,
        cache: Arc<ThumbnailCache>,
        concurrency: usize,
    ) -> Self {
        let share_dir = storage.root().join(SHARE_DIR);
        Self {
            worker: ItemWorker {
                storage,
                crypto,
                cache,
                share_dir,
            },
            concurrency: concurrency.max(1),
        }
    }

    pub fn share_dir(&self) -> &Path {
        &self.worker.share_dir
    }

    pub async fn run(&self, ids: &[PhotoId], operation: BatchOperation) -> VaultResult<BatchReport> {
        self.run_with_cancel(ids, operation, &CancelFlag::new()).await
    }

    /// Apply `operation` to every distinct id in `ids`.
    ///
    /// Returns `Err` only when the operation itself is unusable; per-item
    /// failures land in the report.
    pub async fn run_with_cancel(
        &self,
        ids: &[PhotoId],
        operation: BatchOperation,
        cancel: &CancelFlag,
    ) -> VaultResult<BatchReport> {
        let operation = operation.validate()?;
        let mut report = BatchReport::new(operation.verb());

        let mut seen = HashSet::new();
        let unique: Vec<PhotoId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if unique.is_empty() {
            return Ok(report);
        }

        let operation = Arc::new(self.prepare(operation).await?);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for &id in &unique {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| VaultError::Cancelled)?;

            if cancel.is_cancelled() {
                report.record(id, ItemOutcome::cancelled());
                continue;
            }

            let worker = self.worker.clone();
            let operation = Arc::clone(&operation);
            workers.spawn_blocking(move || {
                let _permit = permit;
                (id, worker.apply(&operation, id))
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((id, result)) => {
                    match &result {
                        Err(e) if e.is_security_critical() => {
                            log::error!("Batch item {} failed integrity check: {}", id, e)
                        }
                        Err(e) => log::warn!("Batch item {} failed: {}", id, e),
                        Ok(_) => {}
                    }
                    report.record(id, result.into());
                }
                Err(e) => log::error!("Batch worker aborted: {}", e),
            }
        }

        // A worker that panicked never reported back
        for id in unique {
            if report.outcome(id).is_none() {
                report.record(
                    id,
                    ItemOutcome::Failed(ItemFailure {
                        kind: ErrorKind::Storage,
                        message: "worker aborted".into(),
                    }),
                );
            }
        }

        log::info!("Batch: {}", report.summary());
        Ok(report)
    }

    /// One-time setup that must happen before items run
    async fn prepare(&self, operation: BatchOperation) -> VaultResult<BatchOperation> {
        match operation {
            BatchOperation::MoveToAlbum(name) => {
                let storage = Arc::clone(&self.worker.storage);
                let album = tokio::task::spawn_blocking(move || storage.ensure_album(&name)).await??;
                Ok(BatchOperation::MoveToAlbum(album.name))
            }
            BatchOperation::Export { destination } => {
                tokio::fs::create_dir_all(&destination).await?;
                Ok(BatchOperation::Export { destination })
            }
            BatchOperation::PrepareForShare => {
                tokio::fs::create_dir_all(&self.worker.share_dir).await?;
                Ok(BatchOperation::PrepareForShare)
            }
            other => Ok(other),
        }
    }

    /// Scrub and remove everything in the share staging directory
    pub fn clear_share_staging(&self) -> VaultResult<usize> {
        let staging = SecureFs::new(&self.worker.share_dir);
        let mut removed = 0;
        for name in staging.list_dir(".")? {
            if staging.remove_if_present(&name)? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Cleared {} shared files", removed);
        }
        Ok(removed)
    }
}
