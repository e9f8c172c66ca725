use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fs2::FileExt;
use notes_storage_core::{
    CoordinatedFileStore, FileVersion, StoreError, StoreStatus, StoredFile, VersionHistory,
    CURRENT_VERSION_ID,
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::version_log::{self, VERSIONS_DIR};

const COORDINATION_DIR: &str = ".coordination";
const TMP_DIR: &str = "tmp";

/// A notes folder on the local filesystem, typically one replicated by a
/// sync client (Syncthing, a cloud drive) running outside this process.
///
/// Access to one file is serialized twice over:
/// - in-process by an async mutex per file name
/// - across processes by an exclusive OS lock on
///   `{root}/.coordination/{file}.lock` (flock on Unix, LockFile on Windows)
///
/// New files and replacements are written under `{root}/.coordination/tmp/`
/// and renamed into place, so readers never observe a partial file.
/// Alternates come from the version log in `{root}/.versions/` and from
/// Syncthing conflict copies next to the file.
///
/// `.coordination/` is local to this machine and must not be replicated:
/// exclude it in the sync client (for Syncthing, a `.coordination` line in
/// `{root}/.stignore`). `.versions/` is meant to travel with the notes.
#[derive(Debug, Default)]
pub struct LocalDirStore {
    root: Option<PathBuf>,
    /// Per-file in-process locks: file name -> mutex. Entries live only while in use.
    file_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalDirStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            file_locks: DashMap::new(),
        }
    }

    /// A store with no folder resolved. Reports [`StoreStatus::Unconfigured`].
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn require_root(&self) -> Result<&Path, StoreError> {
        self.root
            .as_deref()
            .ok_or_else(|| StoreError::Internal("No notes folder configured".to_string()))
    }

    fn versions_dir(root: &Path, name: &str) -> PathBuf {
        root.join(VERSIONS_DIR).join(name)
    }

    fn file_mutex(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.file_locks.entry(name.to_string()).or_default())
    }

    /// Run `op` on the blocking pool while holding both locks for `name`.
    ///
    /// `op` receives the root and the file's path.
    async fn coordinated<T, F>(&self, name: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Path) -> Result<T, StoreError> + Send + 'static,
    {
        validate_name(name)?;
        let root = self.require_root()?.to_path_buf();
        let mutex = self.file_mutex(name);
        let guard = mutex.lock().await;
        let owned = name.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let lock_file = open_lock_file(&root, &owned)?;
            lock_file.lock_exclusive().map_err(|e| {
                StoreError::Coordination(format!("Failed to lock {}: {}", owned, e))
            })?;

            let result = op(&root, &root.join(&owned));

            if let Err(e) = FileExt::unlock(&lock_file) {
                warn!("Failed to unlock {}: {}", owned, e);
            }
            result
        })
        .await;

        drop(guard);
        drop(mutex);
        // Only the registry still holds the mutex once nobody else is waiting
        self.file_locks.remove_if(name, |_, m| Arc::strong_count(m) == 1);

        result.map_err(|e| StoreError::Internal(format!("Coordinated task failed: {}", e)))?
    }

    /// Append `data` to the version log of `name` as an unresolved alternate.
    ///
    /// Returns the new version id.
    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    pub async fn record_version(&self, name: &str, data: &[u8]) -> Result<String, StoreError> {
        let data = data.to_vec();
        let owned = name.to_string();

        let id = self
            .coordinated(name, move |root, _| {
                let id = version_log::version_id(&data, Utc::now());
                let dir = Self::versions_dir(root, &owned);
                fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;

                let dest = dir.join(version_log::entry_file_name(&owned, &id));
                let tmp = write_private(root, &owned, &data)?;
                publish(&tmp, &dest)?;
                Ok(id)
            })
            .await?;

        debug!("Recorded version {} of {}", id, name);
        Ok(id)
    }

    /// Files of `dir` with their metadata. A missing directory is empty.
    async fn scan_dir(dir: &Path) -> Result<Vec<(String, fs::Metadata)>, StoreError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("read", dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("read", dir, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Removed between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("stat", &entry.path(), e)),
            };
            if metadata.is_file() {
                files.push((entry.file_name().to_string_lossy().into_owned(), metadata));
            }
        }
        Ok(files)
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(StoreError::Internal(format!("Invalid note file name: {:?}", name)));
    }
    Ok(())
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("Failed to {} {}: {}", action, path.display(), e))
}

fn modified_at(metadata: &fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn open_lock_file(root: &Path, name: &str) -> Result<File, StoreError> {
    let dir = root.join(COORDINATION_DIR);
    fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;

    let path = dir.join(format!("{}.lock", name));
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| io_error("open", &path, e))
}

/// Write `data` to a fresh private file under the coordination directory.
fn write_private(root: &Path, name: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
    let dir = root.join(COORDINATION_DIR).join(TMP_DIR);
    fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;

    let path = dir.join(format!("{}-{}", Uuid::new_v4(), name));
    let mut file = File::create(&path).map_err(|e| io_error("create", &path, e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&path);
            io_error("write", &path, e)
        })?;
    Ok(path)
}

/// Move a private file into place, discarding it on failure.
fn publish(tmp: &Path, dest: &Path) -> Result<(), StoreError> {
    fs::rename(tmp, dest).map_err(|e| {
        let _ = fs::remove_file(tmp);
        io_error("publish", dest, e)
    })
}

fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("remove", path, e)),
    }
}

#[async_trait]
impl CoordinatedFileStore for LocalDirStore {
    fn store_name(&self) -> &'static str {
        "local"
    }

    async fn status(&self) -> StoreStatus {
        let Some(root) = &self.root else {
            return StoreStatus::Unconfigured;
        };

        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => StoreStatus::Available,
            Ok(_) => {
                debug!("{} is not a writable directory", root.display());
                StoreStatus::Unconfigured
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // The folder is created on first write if its parent is there
                let parent = match root.parent() {
                    Some(p) if p.as_os_str().is_empty() => Path::new("."),
                    Some(p) => p,
                    None => return StoreStatus::Unconfigured,
                };
                match tokio::fs::metadata(parent).await {
                    Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => {
                        StoreStatus::Available
                    }
                    Ok(_) => StoreStatus::Unconfigured,
                    Err(_) => {
                        debug!("{} is not reachable", parent.display());
                        StoreStatus::Unreachable
                    }
                }
            }
            Err(e) => {
                warn!("Cannot probe {}: {}", root.display(), e);
                StoreStatus::Unreachable
            }
        }
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        let root = self.require_root()?;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| io_error("create", root, e))
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        let path = self.require_root()?.join(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("stat", &path, e))
    }

    #[instrument(skip(self), level = "debug")]
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if !self.exists(name).await? {
            return Ok(None);
        }
        self.coordinated(name, |_, path| match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", path, e)),
        })
        .await
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn create(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let data = data.to_vec();
        let owned = name.to_string();
        self.coordinated(name, move |root, path| {
            if path.exists() {
                return Err(StoreError::AlreadyExists(owned));
            }
            let tmp = write_private(root, &owned, &data)?;
            publish(&tmp, path)
        })
        .await?;

        debug!("Created {}", name);
        Ok(())
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn replace(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let data = data.to_vec();
        let owned = name.to_string();
        self.coordinated(name, move |root, path| {
            if !path.exists() {
                return Err(StoreError::NotFound(owned));
            }
            let tmp = write_private(root, &owned, &data)?;
            publish(&tmp, path)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        if !self.exists(name).await? {
            return Ok(false);
        }
        self.coordinated(name, |_, path| remove_if_present(path)).await
    }

    async fn list(&self) -> Result<Vec<StoredFile>, StoreError> {
        let root = self.require_root()?;
        let files = Self::scan_dir(root)
            .await?
            .into_iter()
            .filter(|(name, _)| !name.starts_with('.') && !version_log::is_conflict_copy(name))
            .map(|(name, metadata)| StoredFile {
                modified: modified_at(&metadata),
                size: metadata.len(),
                name,
            })
            .collect();
        Ok(files)
    }
}

#[async_trait]
impl VersionHistory for LocalDirStore {
    async fn current_version(&self, name: &str) -> Result<Option<FileVersion>, StoreError> {
        validate_name(name)?;
        let path = self.require_root()?.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(FileVersion {
                id: CURRENT_VERSION_ID.to_string(),
                modified: modified_at(&metadata),
                size: metadata.len(),
                device_name: None,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("stat", &path, e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn unresolved_versions(&self, name: &str) -> Result<Vec<FileVersion>, StoreError> {
        validate_name(name)?;
        let root = self.require_root()?;
        let mut versions = Vec::new();

        for (file, metadata) in Self::scan_dir(&Self::versions_dir(root, name)).await? {
            if let Some(id) = version_log::parse_entry(name, &file) {
                versions.push(FileVersion {
                    id,
                    modified: modified_at(&metadata),
                    size: metadata.len(),
                    device_name: None,
                });
            }
        }

        for (file, metadata) in Self::scan_dir(root).await? {
            if version_log::is_conflict_copy_of(name, &file) {
                versions.push(FileVersion {
                    device_name: version_log::conflict_copy_device(&file),
                    modified: modified_at(&metadata),
                    size: metadata.len(),
                    id: file,
                });
            }
        }

        versions.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id)));
        debug!("{} has {} unresolved versions", name, versions.len());
        Ok(versions)
    }

    async fn read_version(&self, name: &str, version_id: &str) -> Result<Vec<u8>, StoreError> {
        if version_id == CURRENT_VERSION_ID {
            return self
                .read(name)
                .await?
                .ok_or_else(|| StoreError::NotFound(name.to_string()));
        }
        validate_name(name)?;
        if !version_log::is_valid_id(version_id) {
            return Err(StoreError::Version(format!("Invalid version id {:?}", version_id)));
        }

        let root = self.require_root()?;
        let path = if version_log::is_conflict_copy_of(name, version_id) {
            root.join(version_id)
        } else {
            Self::versions_dir(root, name).join(version_log::entry_file_name(name, version_id))
        };

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::Version(format!(
                "{} has no version {}",
                name, version_id
            ))),
            Err(e) => Err(io_error("read", &path, e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_resolved(&self, name: &str, version_id: &str) -> Result<(), StoreError> {
        if !version_log::is_valid_id(version_id) {
            return Err(StoreError::Version(format!("Invalid version id {:?}", version_id)));
        }
        let owned = name.to_string();
        let id = version_id.to_string();

        self.coordinated(name, move |root, _| {
            let dir = Self::versions_dir(root, &owned);
            let source = if version_log::is_conflict_copy_of(&owned, &id) {
                root.join(&id)
            } else {
                dir.join(version_log::entry_file_name(&owned, &id))
            };
            if !source.exists() {
                return Err(StoreError::Version(format!("{} has no version {}", owned, id)));
            }

            fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;
            let dest = dir.join(version_log::resolved_file_name(&id));
            fs::rename(&source, &dest).map_err(|e| io_error("move", &source, e))
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_other_versions(&self, name: &str) -> Result<(), StoreError> {
        let owned = name.to_string();
        let removed = self
            .coordinated(name, move |root, _| {
                let dir = Self::versions_dir(root, &owned);
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(io_error("remove", &dir, e)),
                }

                let mut removed = 0;
                let entries = fs::read_dir(root).map_err(|e| io_error("read", root, e))?;
                for entry in entries.flatten() {
                    let file = entry.file_name().to_string_lossy().into_owned();
                    if version_log::is_conflict_copy_of(&owned, &file)
                        && remove_if_present(&entry.path())?
                    {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await?;

        debug!("Purged versions of {} ({} stray conflict copies)", name, removed);
        Ok(())
    }
}
