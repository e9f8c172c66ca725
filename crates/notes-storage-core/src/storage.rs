use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::backend::NoteBackend;
use crate::books::BookTable;
use crate::conflict::{ConflictResolver, NoteConflict};
use crate::device::DeviceId;
use crate::error::Result;
use crate::lock::{LeaseLockManager, LockResult, LockState};
use crate::note::{Note, NoteReference};
use crate::store::NoteStore;

/// Outcome of [`NoteStorage::write_note`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteResult {
    Success,
    /// The file has unresolved alternates; nothing was written.
    Conflict(NoteConflict),
    /// Another device holds a live lease; nothing was written.
    LockedByOther {
        holder: DeviceId,
        locked_at: DateTime<Utc>,
    },
}

/// The note capability surface used by the application.
///
/// Composes the backend adapter with the lease lock manager and the conflict
/// resolver; all three share one [`NoteBackend`].
#[derive(Debug)]
pub struct NoteStorage {
    backend: Arc<NoteBackend>,
    locks: LeaseLockManager,
    conflicts: ConflictResolver,
}

impl NoteStorage {
    pub fn new(store: Arc<dyn NoteStore>, books: Arc<BookTable>, device: DeviceId) -> Self {
        Self::from_backend(Arc::new(NoteBackend::new(store, books)), device)
    }

    pub fn from_backend(backend: Arc<NoteBackend>, device: DeviceId) -> Self {
        Self::with_lease_timeout(backend, device, crate::lock::DEFAULT_LEASE_TIMEOUT)
    }

    pub fn with_lease_timeout(
        backend: Arc<NoteBackend>,
        device: DeviceId,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            locks: LeaseLockManager::with_timeout(backend.clone(), device, lease_timeout),
            conflicts: ConflictResolver::new(backend.clone()),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<NoteBackend> {
        &self.backend
    }

    pub fn device(&self) -> &DeviceId {
        self.locks.device()
    }

    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    pub async fn read_note(&self, book: u32, chapter: u32) -> Result<Option<Note>> {
        self.backend.read_note(book, chapter).await
    }

    pub async fn note_exists(&self, book: u32, chapter: u32) -> Result<bool> {
        Ok(self.read_note(book, chapter).await?.is_some())
    }

    /// Save `note` unless its file is forked or leased by another device.
    ///
    /// `created` and the lease are carried over from the stored note, and
    /// `modified` is set to the current time. The caller's `lock` field is
    /// ignored: leases change only through the lock operations.
    #[instrument(skip(self, note), level = "debug", fields(book = note.book, chapter = note.chapter))]
    pub async fn write_note(&self, note: &Note) -> Result<WriteResult> {
        self.backend.ensure_available().await?;

        if let Some(conflict) = self
            .conflicts
            .check_note(note.book, note.chapter)
            .await?
            .into_iter()
            .next()
        {
            warn!(
                "Refusing to write {}: {} unresolved alternates",
                conflict.file_name,
                conflict.alternates.len()
            );
            return Ok(WriteResult::Conflict(conflict));
        }

        let existing = self.backend.read_note(note.book, note.chapter).await?;
        if let Some(existing) = &existing {
            if let LockState::LockedByOther { holder, locked_at } = self.locks.state_of(existing) {
                debug!("Write denied, lease held by {}", holder);
                return Ok(WriteResult::LockedByOther { holder, locked_at });
            }
        }

        let mut to_write = note.clone();
        to_write.modified = Utc::now();
        match existing {
            Some(existing) => {
                to_write.created = existing.created;
                to_write.lock = existing.lock;
            }
            None => to_write.lock = None,
        }
        to_write.content_length = to_write.content.len();

        self.backend.put_note(&to_write).await?;
        Ok(WriteResult::Success)
    }

    pub async fn delete_note(&self, book: u32, chapter: u32) -> Result<()> {
        self.backend.delete_note(book, chapter).await
    }

    pub async fn list_notes(&self) -> Result<Vec<NoteReference>> {
        self.backend.list_notes().await
    }

    pub async fn acquire_lock(&self, book: u32, chapter: u32) -> Result<LockResult> {
        self.locks.acquire(book, chapter).await
    }

    pub async fn release_lock(&self, book: u32, chapter: u32) -> Result<()> {
        self.locks.release(book, chapter).await
    }

    pub async fn refresh_lock(&self, book: u32, chapter: u32) -> Result<()> {
        self.locks.refresh(book, chapter).await
    }

    /// Lease state of the stored note as seen from this device.
    pub async fn lock_state(&self, book: u32, chapter: u32) -> Result<LockState> {
        Ok(match self.read_note(book, chapter).await? {
            Some(note) => self.locks.state_of(&note),
            None => LockState::Unlocked,
        })
    }

    pub async fn check_for_conflicts(&self) -> Result<Vec<NoteConflict>> {
        self.conflicts.check_all().await
    }

    pub async fn check_note_conflicts(&self, book: u32, chapter: u32) -> Result<Vec<NoteConflict>> {
        self.conflicts.check_note(book, chapter).await
    }

    pub async fn resolve_conflict(&self, conflict: &NoteConflict, keep_version_id: &str) -> Result<()> {
        self.conflicts.resolve(conflict, keep_version_id).await
    }

    pub fn book_name(&self, book: u32) -> Option<&str> {
        self.backend.books().name(book)
    }
}
