use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::books::BookTable;
use crate::codec;
use crate::error::{NoteStorageError, Result, StoreError};
use crate::note::{Note, NoteReference};
use crate::store::{NoteStore, StoreStatus};

/// Default note file extension.
pub const DEFAULT_EXTENSION: &str = "md";

/// Maps (book, chapter) keys onto files of the synchronized folder.
///
/// Owns the on-disk representation: every other component reads and writes
/// notes through this adapter. Writes here are unconditional; conflict and
/// lease checks live in [`crate::NoteStorage`].
pub struct NoteBackend {
    store: Arc<dyn NoteStore>,
    books: Arc<BookTable>,
    extension: String,
}

impl std::fmt::Debug for NoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteBackend")
            .field("store", &self.store.store_name())
            .field("books", &self.books.len())
            .field("extension", &self.extension)
            .finish()
    }
}

impl NoteBackend {
    pub fn new(store: Arc<dyn NoteStore>, books: Arc<BookTable>) -> Self {
        Self::with_extension(store, books, DEFAULT_EXTENSION)
    }

    pub fn with_extension(
        store: Arc<dyn NoteStore>,
        books: Arc<BookTable>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            books,
            extension: extension.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }

    pub fn books(&self) -> &BookTable {
        &self.books
    }

    pub fn file_name(&self, book: u32, chapter: u32) -> String {
        self.books.file_name(book, chapter, &self.extension)
    }

    pub fn parse_file_name(&self, file_name: &str) -> Option<(u32, u32)> {
        self.books.parse_file_name(file_name, &self.extension)
    }

    pub async fn is_available(&self) -> bool {
        self.store.status().await == StoreStatus::Available
    }

    /// Fail fast before any I/O when the folder cannot be used.
    pub async fn ensure_available(&self) -> Result<()> {
        match self.store.status().await {
            StoreStatus::Available => Ok(()),
            StoreStatus::Unreachable => Err(NoteStorageError::NotAvailable),
            StoreStatus::Unconfigured => Err(NoteStorageError::NotConfigured),
        }
    }

    /// Decode file bytes for the given key.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD; saving the note back makes that permanent.
    pub fn decode(&self, data: &[u8], book: u32, chapter: u32) -> Note {
        match std::str::from_utf8(data) {
            Ok(text) => codec::parse(text, book, chapter),
            Err(e) => {
                warn!(
                    "Note {}:{} is not valid UTF-8 ({}), undecodable bytes replaced",
                    book, chapter, e
                );
                codec::parse(&String::from_utf8_lossy(data), book, chapter)
            }
        }
    }

    pub fn encode(&self, note: &Note) -> String {
        codec::serialize(note, self.books.name(note.book))
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn read_note(&self, book: u32, chapter: u32) -> Result<Option<Note>> {
        self.ensure_available().await?;
        let name = self.file_name(book, chapter);

        let data = self
            .store
            .read(&name)
            .await
            .map_err(NoteStorageError::ReadFailed)?;

        Ok(data.map(|bytes| {
            debug!("Read {} ({} bytes)", name, bytes.len());
            self.decode(&bytes, book, chapter)
        }))
    }

    /// Persist `note` as given.
    ///
    /// New files are published atomically; existing files get a coordinated replace.
    #[instrument(skip(self, note), level = "debug", fields(book = note.book, chapter = note.chapter))]
    pub async fn put_note(&self, note: &Note) -> Result<()> {
        self.ensure_available().await?;
        let name = self.file_name(note.book, note.chapter);
        let data = self.encode(note);

        self.store
            .ensure_root()
            .await
            .map_err(NoteStorageError::WriteFailed)?;

        let exists = self
            .store
            .exists(&name)
            .await
            .map_err(NoteStorageError::WriteFailed)?;

        if exists {
            self.store
                .replace(&name, data.as_bytes())
                .await
                .map_err(NoteStorageError::WriteFailed)?;
        } else {
            match self.store.create(&name, data.as_bytes()).await {
                Ok(()) => {}
                Err(StoreError::AlreadyExists(_)) => {
                    // Created by someone else since the existence check
                    debug!("{} appeared during create, replacing instead", name);
                    self.store
                        .replace(&name, data.as_bytes())
                        .await
                        .map_err(NoteStorageError::WriteFailed)?;
                }
                Err(e) => return Err(NoteStorageError::WriteFailed(e)),
            }
        }

        debug!("Wrote {} ({} bytes)", name, data.len());
        Ok(())
    }

    /// Remove the note's file. Absent notes are a no-op.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_note(&self, book: u32, chapter: u32) -> Result<()> {
        self.ensure_available().await?;
        let name = self.file_name(book, chapter);

        let removed = self
            .store
            .delete(&name)
            .await
            .map_err(NoteStorageError::DeleteFailed)?;

        if removed {
            debug!("Deleted {}", name);
        } else {
            debug!("Delete of {} skipped, no such note", name);
        }
        Ok(())
    }

    /// All notes in the folder, sorted by (book, chapter).
    #[instrument(skip(self), level = "debug")]
    pub async fn list_notes(&self) -> Result<Vec<NoteReference>> {
        self.ensure_available().await?;

        let files = self
            .store
            .list()
            .await
            .map_err(NoteStorageError::ReadFailed)?;

        let mut notes: Vec<NoteReference> = files
            .into_iter()
            .filter_map(|file| match self.parse_file_name(&file.name) {
                Some((book, chapter)) => Some(NoteReference {
                    book,
                    chapter,
                    modified: file.modified,
                }),
                None => {
                    warn!("Skipping unrecognized file in notes folder: {}", file.name);
                    None
                }
            })
            .collect();

        notes.sort_by_key(|n| (n.book, n.chapter));
        debug!("Listed {} notes", notes.len());
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::store::CoordinatedFileStore;

    fn setup() -> (Arc<InMemoryStore>, NoteBackend) {
        let store = Arc::new(InMemoryStore::new());
        let backend = NoteBackend::new(store.clone(), Arc::new(BookTable::protestant_canon()));
        (store, backend)
    }

    #[tokio::test]
    async fn test_put_then_read() {
        let (store, backend) = setup();

        backend.put_note(&Note::new(43, 3, "Test")).await.unwrap();
        assert!(store.exists("john-3.md").await.unwrap());

        let note = backend.read_note(43, 3).await.unwrap().unwrap();
        assert_eq!(note.content, "Test");
        assert_eq!(note.book, 43);
        assert_eq!(note.chapter, 3);

        let raw = String::from_utf8(store.read("john-3.md").await.unwrap().unwrap()).unwrap();
        assert!(raw.contains("book: John\n"));
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let (_store, backend) = setup();

        backend.put_note(&Note::new(1, 1, "first")).await.unwrap();
        backend.put_note(&Note::new(1, 1, "second")).await.unwrap();

        let note = backend.read_note(1, 1).await.unwrap().unwrap();
        assert_eq!(note.content, "second");
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let (_store, backend) = setup();
        assert!(backend.read_note(43, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let (_store, backend) = setup();
        backend.delete_note(43, 3).await.unwrap();

        backend.put_note(&Note::new(43, 3, "x")).await.unwrap();
        backend.delete_note(43, 3).await.unwrap();
        assert!(backend.read_note(43, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_and_skips_foreign_files() {
        let (store, backend) = setup();

        backend.put_note(&Note::new(43, 10, "")).await.unwrap();
        backend.put_note(&Note::new(1, 2, "")).await.unwrap();
        backend.put_note(&Note::new(43, 3, "")).await.unwrap();
        store.create("readme.txt", b"hello").await.unwrap();
        store.create("shopping-list.md", b"eggs").await.unwrap();
        store.create("9-4.md", b"legacy").await.unwrap();

        let keys: Vec<(u32, u32)> = backend
            .list_notes()
            .await
            .unwrap()
            .iter()
            .map(|n| (n.book, n.chapter))
            .collect();
        assert_eq!(keys, vec![(1, 2), (9, 4), (43, 3), (43, 10)]);
    }

    #[tokio::test]
    async fn test_unavailable_short_circuits() {
        let (store, backend) = setup();
        store.set_status(StoreStatus::Unreachable);

        assert!(!backend.is_available().await);
        assert!(matches!(
            backend.read_note(43, 3).await,
            Err(NoteStorageError::NotAvailable)
        ));
        assert!(matches!(
            backend.put_note(&Note::new(43, 3, "x")).await,
            Err(NoteStorageError::NotAvailable)
        ));
        assert!(!store.exists("john-3.md").await.unwrap());

        store.set_status(StoreStatus::Unconfigured);
        assert!(matches!(
            backend.list_notes().await,
            Err(NoteStorageError::NotConfigured)
        ));
        assert!(matches!(
            backend.delete_note(43, 3).await,
            Err(NoteStorageError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (store, backend) = setup();
        store
            .create("john-3.md", b"---\nchapter: 3\n---\n\nbad \xff byte")
            .await
            .unwrap();

        let note = backend.read_note(43, 3).await.unwrap().unwrap();
        assert_eq!(note.content, "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_unknown_book_uses_numeric_file_name() {
        let (store, backend) = setup();
        backend.put_note(&Note::new(70, 1, "apocrypha")).await.unwrap();
        assert!(store.exists("70-1.md").await.unwrap());
        assert_eq!(backend.read_note(70, 1).await.unwrap().unwrap().content, "apocrypha");
    }
}
