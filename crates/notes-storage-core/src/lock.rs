use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::backend::NoteBackend;
use crate::conflict::ConflictResolver;
use crate::device::DeviceId;
use crate::error::Result;
use crate::note::{Lease, Note};

/// Leases older than this are treated as abandoned.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Outcome of a lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LockResult {
    Acquired,
    AlreadyLockedByMe,
    LockedByOther {
        holder: DeviceId,
        locked_at: DateTime<Utc>,
    },
    /// The note's file has unresolved alternates; no lease was written.
    Conflicted { alternates: usize },
}

/// Lease state of a note as seen from one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No lease, or only a stale one.
    Unlocked,
    LockedByMe,
    LockedByOther {
        holder: DeviceId,
        locked_at: DateTime<Utc>,
    },
}

/// Advisory, lease-based locking of notes.
///
/// The lease lives in the note record itself, so taking it is an ordinary
/// coordinated write. There is no heartbeat: a holder that crashes or goes
/// offline loses the lease once it is older than the timeout.
///
/// Known race: two devices acquiring an unlocked note at the same moment can
/// both pass the re-read check on a weakly consistent folder. The fork that
/// results is reported later as a conflict.
///
/// Lease writes are refused while the note's file is forked, like any other
/// write: `acquire` reports [`LockResult::Conflicted`], while `release` and
/// `refresh` leave the file untouched.
#[derive(Debug)]
pub struct LeaseLockManager {
    backend: Arc<NoteBackend>,
    conflicts: ConflictResolver,
    device: DeviceId,
    timeout: Duration,
}

impl LeaseLockManager {
    pub fn new(backend: Arc<NoteBackend>, device: DeviceId) -> Self {
        Self::with_timeout(backend, device, DEFAULT_LEASE_TIMEOUT)
    }

    pub fn with_timeout(backend: Arc<NoteBackend>, device: DeviceId, timeout: Duration) -> Self {
        Self {
            conflicts: ConflictResolver::new(backend.clone()),
            backend,
            device,
            timeout,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a lease taken at `locked_at` has expired at `now`.
    pub fn is_stale(&self, locked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let timeout = TimeDelta::from_std(self.timeout).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(locked_at) > timeout
    }

    /// Classify the lease carried by `note`.
    pub fn state_of(&self, note: &Note) -> LockState {
        self.state_at(note, Utc::now())
    }

    fn state_at(&self, note: &Note, now: DateTime<Utc>) -> LockState {
        match &note.lock {
            None => LockState::Unlocked,
            Some(lease) if lease.holder == self.device => LockState::LockedByMe,
            Some(lease) if self.is_stale(lease.locked_at, now) => LockState::Unlocked,
            Some(lease) => LockState::LockedByOther {
                holder: lease.holder.clone(),
                locked_at: lease.locked_at,
            },
        }
    }

    #[instrument(skip(self), level = "debug", fields(device = %self.device))]
    pub async fn acquire(&self, book: u32, chapter: u32) -> Result<LockResult> {
        if let Some(alternates) = self.unresolved_alternates(book, chapter).await? {
            warn!(
                "Not locking {}:{}, {} unresolved alternates",
                book, chapter, alternates
            );
            return Ok(LockResult::Conflicted { alternates });
        }

        let now = Utc::now();
        let mut note = self
            .backend
            .read_note(book, chapter)
            .await?
            .unwrap_or_else(|| Note::new(book, chapter, ""));

        match self.state_at(&note, now) {
            LockState::LockedByOther { holder, locked_at } => {
                debug!(
                    "Note {}:{} locked by {} since {}",
                    book, chapter, holder, locked_at
                );
                return Ok(LockResult::LockedByOther { holder, locked_at });
            }
            LockState::LockedByMe => {
                note.lock = Some(self.lease(now));
                self.backend.put_note(&note).await?;
                debug!("Refreshed own lease on {}:{}", book, chapter);
                return Ok(LockResult::AlreadyLockedByMe);
            }
            LockState::Unlocked => {
                if let Some(stale) = &note.lock {
                    info!(
                        "Taking over stale lease on {}:{} held by {} since {}",
                        book, chapter, stale.holder, stale.locked_at
                    );
                }
            }
        }

        note.lock = Some(self.lease(now));
        self.backend.put_note(&note).await?;

        // Another device may have written its own lease between our read and write
        let verified = self.backend.read_note(book, chapter).await?;
        match verified.and_then(|n| n.lock) {
            Some(lease) if lease.holder != self.device => {
                warn!(
                    "Lost lock race on {}:{} to {}",
                    book, chapter, lease.holder
                );
                Ok(LockResult::LockedByOther {
                    holder: lease.holder,
                    locked_at: lease.locked_at,
                })
            }
            _ => {
                debug!("Acquired lease on {}:{}", book, chapter);
                Ok(LockResult::Acquired)
            }
        }
    }

    /// Clear the lease if this device holds it. Otherwise a no-op.
    #[instrument(skip(self), level = "debug", fields(device = %self.device))]
    pub async fn release(&self, book: u32, chapter: u32) -> Result<()> {
        let Some(mut note) = self.held_note(book, chapter).await? else {
            return Ok(());
        };
        note.lock = None;
        self.backend.put_note(&note).await?;
        debug!("Released lease on {}:{}", book, chapter);
        Ok(())
    }

    /// Bump the lease timestamp if this device holds it. Otherwise a no-op.
    #[instrument(skip(self), level = "debug", fields(device = %self.device))]
    pub async fn refresh(&self, book: u32, chapter: u32) -> Result<()> {
        let Some(mut note) = self.held_note(book, chapter).await? else {
            return Ok(());
        };
        note.lock = Some(self.lease(Utc::now()));
        self.backend.put_note(&note).await?;
        debug!("Refreshed lease on {}:{}", book, chapter);
        Ok(())
    }

    /// Number of unresolved alternates if the note's file is forked.
    async fn unresolved_alternates(&self, book: u32, chapter: u32) -> Result<Option<usize>> {
        Ok(self
            .conflicts
            .check_note(book, chapter)
            .await?
            .first()
            .map(|c| c.alternates.len()))
    }

    /// The stored note, if its lease names this device and its file is not forked.
    async fn held_note(&self, book: u32, chapter: u32) -> Result<Option<Note>> {
        if let Some(alternates) = self.unresolved_alternates(book, chapter).await? {
            warn!(
                "Leaving lease on {}:{} untouched, {} unresolved alternates",
                book, chapter, alternates
            );
            return Ok(None);
        }

        let note = self.backend.read_note(book, chapter).await?;
        Ok(note.filter(|n| {
            let mine = n.locked_by() == Some(&self.device);
            if !mine {
                debug!(
                    "Lease on {}:{} not held by {} (holder: {:?})",
                    book,
                    chapter,
                    self.device,
                    n.locked_by().map(DeviceId::as_str)
                );
            }
            mine
        }))
    }

    fn lease(&self, now: DateTime<Utc>) -> Lease {
        Lease {
            holder: self.device.clone(),
            locked_at: now,
        }
    }
}
