//! In-memory substrate.
//!
//! Every access takes the store's lock, so same-file operations are trivially
//! coordinated. Use [`InMemoryStore::fork`] to simulate an offline device whose
//! write diverged from the current version, and [`InMemoryStore::set_status`]
//! to simulate a signed-out or unmounted folder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::{CoordinatedFileStore, FileVersion, StoreStatus, StoredFile, VersionHistory};

/// Version id reported for the visible copy of a file.
pub const CURRENT_VERSION_ID: &str = "current";

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Alternate {
    id: String,
    data: Vec<u8>,
    modified: DateTime<Utc>,
    device_name: Option<String>,
    resolved: bool,
}

#[derive(Debug)]
pub struct InMemoryStore {
    files: RwLock<HashMap<String, MemoryFile>>,
    versions: RwLock<HashMap<String, Vec<Alternate>>>,
    status: RwLock<StoreStatus>,
    next_version: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            status: RwLock::new(StoreStatus::Available),
            next_version: AtomicU64::new(1),
        }
    }

    pub fn set_status(&self, status: StoreStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Record an unresolved alternate for `name`, as if another device wrote
    /// `data` while disconnected. Returns the alternate's version id.
    pub fn fork(&self, name: &str, data: &[u8]) -> String {
        self.fork_from(name, data, None)
    }

    pub fn fork_from(&self, name: &str, data: &[u8], device_name: Option<&str>) -> String {
        let id = format!("alt-{}", self.next_version.fetch_add(1, Ordering::Relaxed));
        let alternate = Alternate {
            id: id.clone(),
            data: data.to_vec(),
            modified: Utc::now(),
            device_name: device_name.map(str::to_string),
            resolved: false,
        };
        self.versions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .push(alternate);
        id
    }

    /// Number of alternates still recorded for `name` (resolved or not).
    pub fn version_count(&self, name: &str) -> usize {
        self.versions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map_or(0, Vec::len)
    }

    fn files(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryFile>>, StoreError> {
        self.files
            .read()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".to_string()))
    }

    fn files_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryFile>>, StoreError> {
        self.files
            .write()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".to_string()))
    }

    fn versions(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<Alternate>>>, StoreError> {
        self.versions
            .read()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".to_string()))
    }

    fn versions_mut(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<Alternate>>>, StoreError> {
        self.versions
            .write()
            .map_err(|_| StoreError::Internal("memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinatedFileStore for InMemoryStore {
    fn store_name(&self) -> &'static str {
        "memory"
    }

    async fn status(&self) -> StoreStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.files()?.contains_key(name))
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.files()?.get(name).map(|f| f.data.clone()))
    }

    async fn create(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut files = self.files_mut()?;
        if files.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        files.insert(
            name.to_string(),
            MemoryFile {
                data: data.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn replace(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut files = self.files_mut()?;
        let file = files
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        file.data = data.to_vec();
        file.modified = Utc::now();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.files_mut()?.remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<StoredFile>, StoreError> {
        Ok(self
            .files()?
            .iter()
            .map(|(name, file)| StoredFile {
                name: name.clone(),
                modified: file.modified,
                size: file.data.len() as u64,
            })
            .collect())
    }
}

#[async_trait]
impl VersionHistory for InMemoryStore {
    async fn current_version(&self, name: &str) -> Result<Option<FileVersion>, StoreError> {
        Ok(self.files()?.get(name).map(|file| FileVersion {
            id: CURRENT_VERSION_ID.to_string(),
            modified: file.modified,
            size: file.data.len() as u64,
            device_name: None,
        }))
    }

    async fn unresolved_versions(&self, name: &str) -> Result<Vec<FileVersion>, StoreError> {
        Ok(self
            .versions()?
            .get(name)
            .map(|alternates| {
                alternates
                    .iter()
                    .filter(|a| !a.resolved)
                    .map(|a| FileVersion {
                        id: a.id.clone(),
                        modified: a.modified,
                        size: a.data.len() as u64,
                        device_name: a.device_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_version(&self, name: &str, version_id: &str) -> Result<Vec<u8>, StoreError> {
        if version_id == CURRENT_VERSION_ID {
            return self
                .files()?
                .get(name)
                .map(|f| f.data.clone())
                .ok_or_else(|| StoreError::NotFound(name.to_string()));
        }
        self.versions()?
            .get(name)
            .and_then(|alternates| alternates.iter().find(|a| a.id == version_id))
            .map(|a| a.data.clone())
            .ok_or_else(|| StoreError::Version(format!("{} has no version {}", name, version_id)))
    }

    async fn mark_resolved(&self, name: &str, version_id: &str) -> Result<(), StoreError> {
        let mut versions = self.versions_mut()?;
        let alternate = versions
            .get_mut(name)
            .and_then(|alternates| alternates.iter_mut().find(|a| a.id == version_id))
            .ok_or_else(|| StoreError::Version(format!("{} has no version {}", name, version_id)))?;
        alternate.resolved = true;
        Ok(())
    }

    async fn remove_other_versions(&self, name: &str) -> Result<(), StoreError> {
        self.versions_mut()?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_read_replace_delete() {
        let store = InMemoryStore::new();

        store.create("john-3.md", b"one").await.unwrap();
        assert_eq!(store.read("john-3.md").await.unwrap(), Some(b"one".to_vec()));

        let again = store.create("john-3.md", b"two").await;
        assert!(matches!(again, Err(StoreError::AlreadyExists(_))));

        store.replace("john-3.md", b"two").await.unwrap();
        assert_eq!(store.read("john-3.md").await.unwrap(), Some(b"two".to_vec()));

        assert!(store.delete("john-3.md").await.unwrap());
        assert!(!store.delete("john-3.md").await.unwrap());
        assert_eq!(store.read("john-3.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_missing_is_not_found() {
        let store = InMemoryStore::new();
        let result = store.replace("john-3.md", b"x").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fork_and_resolve() {
        let store = InMemoryStore::new();
        store.create("john-3.md", b"mine").await.unwrap();
        let id = store.fork_from("john-3.md", b"theirs", Some("phone"));

        let alternates = store.unresolved_versions("john-3.md").await.unwrap();
        assert_eq!(alternates.len(), 1);
        assert_eq!(alternates[0].id, id);
        assert_eq!(alternates[0].size, 6);
        assert_eq!(alternates[0].device_name.as_deref(), Some("phone"));
        assert_eq!(store.read_version("john-3.md", &id).await.unwrap(), b"theirs");

        store.mark_resolved("john-3.md", &id).await.unwrap();
        assert!(store.unresolved_versions("john-3.md").await.unwrap().is_empty());
        assert_eq!(store.version_count("john-3.md"), 1);

        store.remove_other_versions("john-3.md").await.unwrap();
        assert_eq!(store.version_count("john-3.md"), 0);
    }

    #[tokio::test]
    async fn test_status_is_settable() {
        let store = InMemoryStore::new();
        assert_eq!(store.status().await, StoreStatus::Available);
        store.set_status(StoreStatus::Unreachable);
        assert_eq!(store.status().await, StoreStatus::Unreachable);
    }
}
