mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use notes_storage_core::{
    BookTable, CoordinatedFileStore, NoteBackend, NoteConflict, NoteStorage, NoteStorageError,
    Note, WriteResult,
};
use notes_storage_local::{device, LocalDirStore};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Command, Config, NoteKey};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let result = run(config).await;
    if let Err(e) = &result {
        if let Some(storage_error) = e.downcast_ref::<NoteStorageError>() {
            eprintln!("{}", storage_error.user_message());
        }
    }
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    let books = match &config.books {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read book table {}", path.display()))?;
            BookTable::from_json(&json)
                .with_context(|| format!("Invalid book table {}", path.display()))?
        }
        None => BookTable::protestant_canon(),
    };

    let store = match config.effective_notes_dir() {
        Some(dir) => {
            info!("Notes folder: {}", dir.display());
            LocalDirStore::new(dir)
        }
        None => LocalDirStore::unconfigured(),
    };
    let store = Arc::new(store);

    let device_file = config.effective_device_id_file();
    let device = device::load_or_create(&device_file)
        .await
        .with_context(|| format!("Failed to load device id from {}", device_file.display()))?;

    let backend = Arc::new(NoteBackend::with_extension(
        store.clone(),
        Arc::new(books),
        config.extension.clone(),
    ));
    let storage = NoteStorage::with_lease_timeout(
        backend,
        device,
        Duration::from_secs(config.lease_timeout_secs),
    );

    match config.command {
        Command::Status => {
            let report = json!({
                "status": store.status().await,
                "notes_dir": store.root().map(|p| p.display().to_string()),
                "device": storage.device(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List => {
            let notes: Vec<_> = storage
                .list_notes()
                .await?
                .into_iter()
                .map(|n| {
                    json!({
                        "book": n.book,
                        "book_name": storage.book_name(n.book),
                        "chapter": n.chapter,
                        "modified": n.modified,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&notes)?);
        }
        Command::Read { key } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            let note = require_note(&storage, book, chapter).await?;
            println!("{}", note.content);
        }
        Command::Sections { key } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            let note = require_note(&storage, book, chapter).await?;
            println!("{}", serde_json::to_string_pretty(&note.sections())?);
        }
        Command::Write { key, content } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            let content = match content {
                Some(content) => content,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin().read_to_string(&mut buf).await?;
                    buf
                }
            };

            // Keep the stored lease and creation time
            let mut note = storage
                .read_note(book, chapter)
                .await?
                .unwrap_or_else(|| Note::new(book, chapter, ""));
            note.set_content(content);

            match storage.write_note(&note).await? {
                WriteResult::Success => info!("Saved {}:{}", book, chapter),
                WriteResult::Conflict(conflict) => {
                    println!("{}", serde_json::to_string_pretty(&conflict_json(&conflict))?);
                    bail!("Note has unresolved conflicts; resolve them before writing");
                }
                WriteResult::LockedByOther { holder, locked_at } => {
                    bail!("Note is being edited on {} (since {})", holder, locked_at);
                }
            }
        }
        Command::Delete { key } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            storage.delete_note(book, chapter).await?;
        }
        Command::Lock { key } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            let result = storage.acquire_lock(book, chapter).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Unlock { key } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            storage.release_lock(book, chapter).await?;
        }
        Command::Refresh { key } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            storage.refresh_lock(book, chapter).await?;
        }
        Command::Conflicts { book, chapter } => {
            let conflicts = match (book, chapter) {
                (Some(book), Some(chapter)) => {
                    let (book, chapter) =
                        resolve_key(&storage, &NoteKey { book, chapter })?;
                    storage.check_note_conflicts(book, chapter).await?
                }
                (None, None) => storage.check_for_conflicts().await?,
                _ => bail!("Give both book and chapter, or neither"),
            };
            let report: Vec<_> = conflicts.iter().map(conflict_json).collect();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Resolve { key, keep } => {
            let (book, chapter) = resolve_key(&storage, &key)?;
            let Some(conflict) = storage
                .check_note_conflicts(book, chapter)
                .await?
                .into_iter()
                .next()
            else {
                bail!("No conflict to resolve for {}:{}", book, chapter);
            };
            storage.resolve_conflict(&conflict, &keep).await?;
        }
    }

    Ok(())
}

/// Accept a numeric book id or a slug such as `1-john`.
fn resolve_key(storage: &NoteStorage, key: &NoteKey) -> anyhow::Result<(u32, u32)> {
    let book = match key.book.parse::<u32>() {
        Ok(id) => id,
        Err(_) => match storage.backend().books().id_for_slug(&key.book.to_lowercase()) {
            Some(id) => id,
            None => bail!("Unknown book {:?}", key.book),
        },
    };
    Ok((book, key.chapter))
}

async fn require_note(storage: &NoteStorage, book: u32, chapter: u32) -> anyhow::Result<Note> {
    match storage.read_note(book, chapter).await? {
        Some(note) => Ok(note),
        None => bail!("No note for {}:{}", book, chapter),
    }
}

fn conflict_json(conflict: &NoteConflict) -> serde_json::Value {
    json!({
        "book": conflict.book,
        "chapter": conflict.chapter,
        "file": conflict.file_name,
        "versions": conflict
            .versions()
            .map(|v| json!({
                "id": v.id,
                "current": v.is_current,
                "modified": v.modified,
                "size": v.size,
                "device": v.device_name,
            }))
            .collect::<Vec<_>>(),
    })
}
