//! Core model and coordination engine for synchronized chapter notes.
//!
//! One Markdown file per (book, chapter) lives in a folder replicated between
//! devices by an external sync service. This crate defines:
//! - `CoordinatedFileStore` / `VersionHistory`: what a substrate must provide
//! - `NoteBackend`: maps notes onto files through the header codec
//! - `LeaseLockManager`: advisory, time-bounded leases stored in the note
//! - `ConflictResolver`: surfaces and settles divergent file versions
//! - `NoteStorage`: the combined surface used by applications

mod backend;
mod books;
pub mod codec;
mod conflict;
mod device;
mod error;
mod lock;
mod memory;
mod note;
mod storage;
mod store;

pub use backend::{NoteBackend, DEFAULT_EXTENSION};
pub use books::{slugify, BookTable};
pub use conflict::{ConflictResolver, NoteConflict, NoteVersion};
pub use device::{DeviceId, DeviceIdError};
pub use error::{NoteStorageError, Result, StoreError};
pub use lock::{LeaseLockManager, LockResult, LockState, DEFAULT_LEASE_TIMEOUT};
pub use memory::{InMemoryStore, CURRENT_VERSION_ID};
pub use note::{find_section, Lease, Note, NoteReference, NoteSection};
pub use storage::{NoteStorage, WriteResult};
pub use store::{CoordinatedFileStore, FileVersion, NoteStore, StoreStatus, StoredFile, VersionHistory};
