use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Configuration for the notes-storage-local command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "notes-storage-local")]
#[command(about = "Chapter notes kept in a synchronized local folder")]
pub struct Config {
    /// Notes folder (replicated by your sync client)
    #[arg(long, env = "NOTES_DIR")]
    pub notes_dir: Option<PathBuf>,

    /// File holding this device's id. Created on first use.
    #[arg(long, env = "NOTES_DEVICE_ID_FILE")]
    pub device_id_file: Option<PathBuf>,

    /// Note file extension
    #[arg(long, default_value = "md", env = "NOTES_EXTENSION")]
    pub extension: String,

    /// Seconds after which another device's lease counts as abandoned
    #[arg(long, default_value = "300", env = "NOTES_LEASE_TIMEOUT_SECS")]
    pub lease_timeout_secs: u64,

    /// JSON book table (`{"1": "Genesis", ...}`). Defaults to the 66-book canon.
    #[arg(long, env = "NOTES_BOOKS_FILE")]
    pub books: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Get the effective notes folder. `None` when no folder can be resolved.
    pub fn effective_notes_dir(&self) -> Option<PathBuf> {
        self.notes_dir
            .clone()
            .or_else(|| dirs::document_dir().map(|d| d.join("chapter-notes")))
    }

    /// Get the effective device id file.
    pub fn effective_device_id_file(&self) -> PathBuf {
        self.device_id_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chapter-notes")
                .join("device-id")
        })
    }
}

/// A note is addressed by book (id or slug, e.g. `43` or `john`) and chapter.
#[derive(clap::Args, Debug, Clone)]
pub struct NoteKey {
    pub book: String,
    pub chapter: u32,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show folder status and this device's id
    Status,
    /// List every note as JSON
    List,
    /// Print a note's content
    Read {
        #[command(flatten)]
        key: NoteKey,
    },
    /// Print a note's sections as JSON
    Sections {
        #[command(flatten)]
        key: NoteKey,
    },
    /// Save a note's content (from --content or stdin)
    Write {
        #[command(flatten)]
        key: NoteKey,
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete a note
    Delete {
        #[command(flatten)]
        key: NoteKey,
    },
    /// Take the edit lease on a note
    Lock {
        #[command(flatten)]
        key: NoteKey,
    },
    /// Give up the edit lease on a note
    Unlock {
        #[command(flatten)]
        key: NoteKey,
    },
    /// Renew the edit lease on a note
    Refresh {
        #[command(flatten)]
        key: NoteKey,
    },
    /// List unresolved conflicts as JSON, for one note or the whole folder
    Conflicts {
        book: Option<String>,
        chapter: Option<u32>,
    },
    /// Settle a note's conflict by keeping one version
    Resolve {
        #[command(flatten)]
        key: NoteKey,
        /// Version id to keep (see `conflicts`)
        #[arg(long)]
        keep: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["notes-storage-local", "status"]).unwrap();
        assert_eq!(config.extension, "md");
        assert_eq!(config.lease_timeout_secs, 300);
        assert!(matches!(config.command, Command::Status));
        assert!(config.effective_device_id_file().ends_with("chapter-notes/device-id"));
    }

    #[test]
    fn test_note_subcommands() {
        let config = Config::try_parse_from([
            "notes-storage-local",
            "--notes-dir",
            "/tmp/notes",
            "resolve",
            "john",
            "3",
            "--keep",
            "current",
        ])
        .unwrap();
        assert_eq!(config.effective_notes_dir(), Some(PathBuf::from("/tmp/notes")));
        match config.command {
            Command::Resolve { key, keep } => {
                assert_eq!(key.book, "john");
                assert_eq!(key.chapter, 3);
                assert_eq!(keep, "current");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
