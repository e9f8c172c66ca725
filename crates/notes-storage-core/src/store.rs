use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Reachability of the synchronized folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    /// Reachable with a writable location resolved.
    Available,
    /// The sync service or volume cannot be reached (e.g. signed out, not mounted).
    Unreachable,
    /// Reachable, but no writable notes location could be resolved.
    Unconfigured,
}

/// A file visible in the notes folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// File name relative to the notes folder (e.g. `john-3.md`).
    pub name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// One version of a file as recorded by the substrate's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    /// Identity of the writer, when the substrate records one.
    pub device_name: Option<String>,
}

/// File access coordinated with every other participant using the same protocol.
///
/// Reads and writes of one file never interleave with another coordinated
/// access to that file. No ordering is promised across different files, and
/// remote devices writing while offline are not held back: that is what
/// produces the alternate versions surfaced by [`VersionHistory`].
///
/// All names are flat file names relative to the notes folder.
#[async_trait]
pub trait CoordinatedFileStore: Send + Sync {
    /// Returns the substrate identifier (e.g. "local", "memory").
    fn store_name(&self) -> &'static str;

    /// Probe reachability. Never fails; problems are reported as a status.
    async fn status(&self) -> StoreStatus;

    /// Make sure the notes folder exists.
    async fn ensure_root(&self) -> Result<(), StoreError>;

    async fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Coordinated read. `None` if the file does not exist.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Publish a new file atomically: written privately, then moved into place.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the file is already present.
    async fn create(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Coordinated replace of an existing file. Readers never see a partial write.
    async fn replace(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Coordinated delete. Returns whether a file was removed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Enumerate the notes folder (excluding private and alternate files).
    async fn list(&self) -> Result<Vec<StoredFile>, StoreError>;
}

/// Per-file version history kept by the substrate.
#[async_trait]
pub trait VersionHistory: Send + Sync {
    /// The version currently visible at `name`, if the file exists.
    async fn current_version(&self, name: &str) -> Result<Option<FileVersion>, StoreError>;

    /// Divergent versions recorded for `name` that nobody has resolved yet.
    async fn unresolved_versions(&self, name: &str) -> Result<Vec<FileVersion>, StoreError>;

    /// Content of a version (current or alternate).
    async fn read_version(&self, name: &str, version_id: &str) -> Result<Vec<u8>, StoreError>;

    /// Mark an alternate as resolved so it no longer counts as a conflict.
    async fn mark_resolved(&self, name: &str, version_id: &str) -> Result<(), StoreError>;

    /// Drop every version of `name` except the current one.
    async fn remove_other_versions(&self, name: &str) -> Result<(), StoreError>;
}

/// A substrate offering both coordinated access and version history.
pub trait NoteStore: CoordinatedFileStore + VersionHistory {}

impl<T: CoordinatedFileStore + VersionHistory> NoteStore for T {}
