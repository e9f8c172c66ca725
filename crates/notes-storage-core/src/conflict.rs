use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::backend::NoteBackend;
use crate::error::{NoteStorageError, Result};
use crate::note::Note;
use crate::store::FileVersion;

/// One version of a forked note file. Content is loaded on demand.
#[derive(Clone)]
pub struct NoteVersion {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub device_name: Option<String>,
    pub is_current: bool,
    book: u32,
    chapter: u32,
    file_name: String,
    backend: Arc<NoteBackend>,
}

impl std::fmt::Debug for NoteVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteVersion")
            .field("id", &self.id)
            .field("modified", &self.modified)
            .field("size", &self.size)
            .field("device_name", &self.device_name)
            .field("is_current", &self.is_current)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for NoteVersion {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.file_name == other.file_name && self.modified == other.modified
    }
}

impl NoteVersion {
    fn new(
        backend: &Arc<NoteBackend>,
        book: u32,
        chapter: u32,
        file_name: &str,
        version: FileVersion,
        is_current: bool,
    ) -> Self {
        Self {
            id: version.id,
            modified: version.modified,
            size: version.size,
            device_name: version.device_name,
            is_current,
            book,
            chapter,
            file_name: file_name.to_string(),
            backend: Arc::clone(backend),
        }
    }

    /// Raw file text of this version.
    pub async fn content(&self) -> Result<String> {
        let bytes = self.load().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// This version decoded as a note.
    pub async fn note(&self) -> Result<Note> {
        let bytes = self.load().await?;
        Ok(self.backend.decode(&bytes, self.book, self.chapter))
    }

    async fn load(&self) -> Result<Vec<u8>> {
        self.backend
            .store()
            .read_version(&self.file_name, &self.id)
            .await
            .map_err(NoteStorageError::ReadFailed)
    }
}

/// Divergent versions of one note awaiting a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteConflict {
    pub book: u32,
    pub chapter: u32,
    pub file_name: String,
    pub current: NoteVersion,
    pub alternates: Vec<NoteVersion>,
}

impl NoteConflict {
    /// Current version first, then alternates.
    pub fn versions(&self) -> impl Iterator<Item = &NoteVersion> {
        std::iter::once(&self.current).chain(self.alternates.iter())
    }

    pub fn version(&self, id: &str) -> Option<&NoteVersion> {
        self.versions().find(|v| v.id == id)
    }
}

/// Surfaces forks recorded by the folder's version history and settles them
/// by keeping exactly one whole version. Never merges text.
#[derive(Debug)]
pub struct ConflictResolver {
    backend: Arc<NoteBackend>,
}

impl ConflictResolver {
    pub fn new(backend: Arc<NoteBackend>) -> Self {
        Self { backend }
    }

    /// Conflicts across every note file in the folder.
    #[instrument(skip(self), level = "debug")]
    pub async fn check_all(&self) -> Result<Vec<NoteConflict>> {
        self.backend.ensure_available().await?;

        let mut files = self
            .backend
            .store()
            .list()
            .await
            .map_err(NoteStorageError::ReadFailed)?;
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let mut conflicts = Vec::new();
        for file in files {
            let Some((book, chapter)) = self.backend.parse_file_name(&file.name) else {
                continue;
            };
            if let Some(conflict) = self.conflict_for(book, chapter, &file.name).await? {
                conflicts.push(conflict);
            }
        }

        conflicts.sort_by_key(|c| (c.book, c.chapter));
        debug!("Found {} conflicted notes", conflicts.len());
        Ok(conflicts)
    }

    /// Conflicts for a single note: empty, or exactly one entry.
    #[instrument(skip(self), level = "debug")]
    pub async fn check_note(&self, book: u32, chapter: u32) -> Result<Vec<NoteConflict>> {
        self.backend.ensure_available().await?;
        let name = self.backend.file_name(book, chapter);
        Ok(self
            .conflict_for(book, chapter, &name)
            .await?
            .into_iter()
            .collect())
    }

    async fn conflict_for(
        &self,
        book: u32,
        chapter: u32,
        name: &str,
    ) -> Result<Option<NoteConflict>> {
        let store = self.backend.store();

        let alternates = store
            .unresolved_versions(name)
            .await
            .map_err(NoteStorageError::ReadFailed)?;
        if alternates.is_empty() {
            return Ok(None);
        }

        let Some(current) = store
            .current_version(name)
            .await
            .map_err(NoteStorageError::ReadFailed)?
        else {
            debug!("{} has alternates but no current version", name);
            return Ok(None);
        };

        debug!("{} has {} unresolved alternates", name, alternates.len());
        Ok(Some(NoteConflict {
            book,
            chapter,
            file_name: name.to_string(),
            current: NoteVersion::new(&self.backend, book, chapter, name, current, true),
            alternates: alternates
                .into_iter()
                .map(|v| NoteVersion::new(&self.backend, book, chapter, name, v, false))
                .collect(),
        }))
    }

    /// Keep `keep_version_id` and retire every alternate.
    ///
    /// Keeping an alternate copies its content over the current file first.
    /// Alternates are then marked resolved and purged from the history.
    #[instrument(skip(self, conflict), level = "debug", fields(file = %conflict.file_name))]
    pub async fn resolve(&self, conflict: &NoteConflict, keep_version_id: &str) -> Result<()> {
        self.backend.ensure_available().await?;
        let store = self.backend.store();
        let name = &conflict.file_name;

        let kept = conflict
            .version(keep_version_id)
            .ok_or_else(|| NoteStorageError::UnknownVersion(keep_version_id.to_string()))?;

        if !kept.is_current {
            let data = store
                .read_version(name, &kept.id)
                .await
                .map_err(NoteStorageError::ReadFailed)?;
            store
                .replace(name, &data)
                .await
                .map_err(NoteStorageError::WriteFailed)?;
            debug!("Promoted version {} of {}", kept.id, name);
        }

        for alternate in &conflict.alternates {
            store
                .mark_resolved(name, &alternate.id)
                .await
                .map_err(NoteStorageError::WriteFailed)?;
        }
        store
            .remove_other_versions(name)
            .await
            .map_err(NoteStorageError::WriteFailed)?;

        info!(
            "Resolved conflict on {} keeping {} ({} alternates retired)",
            name,
            kept.id,
            conflict.alternates.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::BookTable;
    use crate::codec;
    use crate::memory::{InMemoryStore, CURRENT_VERSION_ID};
    use crate::store::{CoordinatedFileStore, VersionHistory};

    fn setup() -> (Arc<InMemoryStore>, Arc<NoteBackend>, ConflictResolver) {
        let store = Arc::new(InMemoryStore::new());
        let backend = Arc::new(NoteBackend::new(
            store.clone(),
            Arc::new(BookTable::protestant_canon()),
        ));
        let resolver = ConflictResolver::new(backend.clone());
        (store, backend, resolver)
    }

    fn encoded(content: &str) -> Vec<u8> {
        codec::serialize(&Note::new(43, 3, content), Some("John")).into_bytes()
    }

    #[tokio::test]
    async fn test_no_conflicts_on_clean_store() {
        let (_store, backend, resolver) = setup();
        backend.put_note(&Note::new(43, 3, "mine")).await.unwrap();

        assert!(resolver.check_all().await.unwrap().is_empty());
        assert!(resolver.check_note(43, 3).await.unwrap().is_empty());
        assert!(resolver.check_note(1, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_lists_current_and_alternates() {
        let (store, backend, resolver) = setup();
        backend.put_note(&Note::new(43, 3, "mine")).await.unwrap();
        backend.put_note(&Note::new(1, 1, "untouched")).await.unwrap();
        let a = store.fork_from("john-3.md", &encoded("phone"), Some("phone"));
        let b = store.fork("john-3.md", &encoded("tablet"));

        let conflicts = resolver.check_all().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!((conflict.book, conflict.chapter), (43, 3));
        assert_eq!(conflict.current.id, CURRENT_VERSION_ID);
        assert!(conflict.current.is_current);
        let ids: Vec<&str> = conflict.alternates.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str()]);
        assert_eq!(conflict.alternates[0].device_name.as_deref(), Some("phone"));

        assert_eq!(conflict.current.note().await.unwrap().content, "mine");
        assert_eq!(conflict.alternates[1].note().await.unwrap().content, "tablet");
        assert!(conflict.alternates[0].content().await.unwrap().contains("book: John"));

        assert_eq!(resolver.check_note(43, 3).await.unwrap(), conflicts);
    }

    #[tokio::test]
    async fn test_resolve_keeping_alternate() {
        let (store, backend, resolver) = setup();
        backend.put_note(&Note::new(43, 3, "mine")).await.unwrap();
        let keep = store.fork("john-3.md", &encoded("theirs"));
        store.fork("john-3.md", &encoded("other"));

        let conflict = resolver.check_note(43, 3).await.unwrap().remove(0);
        resolver.resolve(&conflict, &keep).await.unwrap();

        assert_eq!(backend.read_note(43, 3).await.unwrap().unwrap().content, "theirs");
        assert!(store.unresolved_versions("john-3.md").await.unwrap().is_empty());
        assert_eq!(store.version_count("john-3.md"), 0);
        assert!(resolver.check_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_keeping_current_does_not_write() {
        let (store, backend, resolver) = setup();
        backend.put_note(&Note::new(43, 3, "mine")).await.unwrap();
        let before = store.current_version("john-3.md").await.unwrap().unwrap();
        store.fork("john-3.md", &encoded("theirs"));

        let conflict = resolver.check_note(43, 3).await.unwrap().remove(0);
        resolver.resolve(&conflict, CURRENT_VERSION_ID).await.unwrap();

        let after = store.current_version("john-3.md").await.unwrap().unwrap();
        assert_eq!(after.modified, before.modified);
        assert_eq!(backend.read_note(43, 3).await.unwrap().unwrap().content, "mine");
        assert_eq!(store.version_count("john-3.md"), 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_version() {
        let (store, backend, resolver) = setup();
        backend.put_note(&Note::new(43, 3, "mine")).await.unwrap();
        store.fork("john-3.md", &encoded("theirs"));

        let conflict = resolver.check_note(43, 3).await.unwrap().remove(0);
        let result = resolver.resolve(&conflict, "nope").await;
        assert!(matches!(result, Err(NoteStorageError::UnknownVersion(_))));
        assert_eq!(store.unresolved_versions("john-3.md").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_alternates_without_current_file_are_ignored() {
        let (store, _backend, resolver) = setup();
        store.fork("john-3.md", &encoded("orphan"));
        assert!(resolver.check_note(43, 3).await.unwrap().is_empty());
        assert!(!store.exists("john-3.md").await.unwrap());
    }
}
