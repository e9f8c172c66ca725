use thiserror::Error;

/// Errors reported by a storage substrate (the synchronized folder itself).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("Version history error: {0}")]
    Version(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by the note storage engine to its callers.
///
/// Conflicts and lock denials are not errors: they come back as
/// [`crate::WriteResult`] and [`crate::LockResult`] values.
#[derive(Error, Debug)]
pub enum NoteStorageError {
    #[error("Notes storage is not available (sync service unreachable or signed out)")]
    NotAvailable,

    #[error("No writable notes location is configured")]
    NotConfigured,

    #[error("Failed to read note: {0}")]
    ReadFailed(#[source] StoreError),

    #[error("Failed to write note: {0}")]
    WriteFailed(#[source] StoreError),

    #[error("Failed to delete note: {0}")]
    DeleteFailed(#[source] StoreError),

    #[error("Failed to parse note: {0}")]
    ParseError(String),

    #[error("Unknown note version: {0}")]
    UnknownVersion(String),
}

impl NoteStorageError {
    /// Short description suitable for showing to a user.
    pub fn user_message(&self) -> &'static str {
        match self {
            NoteStorageError::NotAvailable => "Notes storage is unavailable. Check that you are signed in to sync.",
            NoteStorageError::NotConfigured => "No notes folder is configured.",
            NoteStorageError::ReadFailed(_) => "The note could not be read.",
            NoteStorageError::WriteFailed(_) => "The note could not be saved.",
            NoteStorageError::DeleteFailed(_) => "The note could not be deleted.",
            NoteStorageError::ParseError(_) => "The note file is damaged.",
            NoteStorageError::UnknownVersion(_) => "That version of the note no longer exists.",
        }
    }
}

pub type Result<T> = std::result::Result<T, NoteStorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_store_error_in_display() {
        let err = NoteStorageError::WriteFailed(StoreError::Io("disk full".to_string()));
        assert_eq!(err.to_string(), "Failed to write note: I/O error: disk full");
        assert_eq!(err.user_message(), "The note could not be saved.");
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error as _;

        let err = NoteStorageError::ReadFailed(StoreError::NotFound("john-3.md".to_string()));
        assert!(err.source().is_some());
        assert!(NoteStorageError::NotAvailable.source().is_none());
    }
}
