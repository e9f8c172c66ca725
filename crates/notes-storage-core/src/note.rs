use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::device::DeviceId;

/// The advisory lease recorded inside a note.
///
/// Holder and timestamp always travel together, so a note either carries a
/// complete lease or none at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: DeviceId,
    pub locked_at: DateTime<Utc>,
}

/// The annotation attached to one (book, chapter) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub book: u32,
    pub chapter: u32,
    pub content: String,
    /// Set on first write and carried over on every later write.
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub lock: Option<Lease>,
    /// Byte length of `content` when the note was constructed. Cache only.
    pub content_length: usize,
}

impl Note {
    /// Create an unlocked note stamped with the current time.
    pub fn new(book: u32, chapter: u32, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::from_parts(book, chapter, content.into(), now, now, None)
    }

    /// Assemble a note from stored parts, recomputing the cached length.
    pub fn from_parts(
        book: u32,
        chapter: u32,
        content: String,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
        lock: Option<Lease>,
    ) -> Self {
        let content_length = content.len();
        Self {
            book,
            chapter,
            content,
            created,
            modified,
            lock,
            content_length,
        }
    }

    /// Replace the body and refresh the cached length.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_length = self.content.len();
    }

    pub fn locked_by(&self) -> Option<&DeviceId> {
        self.lock.as_ref().map(|l| &l.holder)
    }

    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.lock.as_ref().map(|l| l.locked_at)
    }

    /// The body split into its general and verse sections.
    pub fn sections(&self) -> Vec<NoteSection> {
        codec::parse_sections(&self.content)
    }

    /// Rebuild the body from sections.
    pub fn set_sections(&mut self, sections: &[NoteSection]) {
        self.set_content(codec::serialize_sections(sections));
    }
}

/// Listing entry produced by enumerating the notes folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteReference {
    pub book: u32,
    pub chapter: u32,
    pub modified: DateTime<Utc>,
}

/// A subdivision of a note body: the general section or one addressed by verse(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSection {
    pub verse_start: Option<u32>,
    pub verse_end: Option<u32>,
    pub content: String,
}

impl NoteSection {
    pub fn general(content: impl Into<String>) -> Self {
        Self {
            verse_start: None,
            verse_end: None,
            content: content.into(),
        }
    }

    pub fn verse(verse: u32, content: impl Into<String>) -> Self {
        Self {
            verse_start: Some(verse),
            verse_end: None,
            content: content.into(),
        }
    }

    pub fn range(start: u32, end: u32, content: impl Into<String>) -> Self {
        Self {
            verse_start: Some(start),
            verse_end: Some(end),
            content: content.into(),
        }
    }

    /// `general`, `v{n}` or `v{start}-{end}`.
    pub fn id(&self) -> String {
        match (self.verse_start, self.verse_end) {
            (Some(start), Some(end)) => format!("v{}-{}", start, end),
            (Some(start), None) => format!("v{}", start),
            _ => "general".to_string(),
        }
    }

    pub fn is_general(&self) -> bool {
        self.verse_start.is_none()
    }

    /// Whether this section is addressed to `verse`.
    pub fn covers(&self, verse: u32) -> bool {
        match (self.verse_start, self.verse_end) {
            (Some(start), Some(end)) => (start..=end).contains(&verse),
            (Some(start), None) => start == verse,
            _ => false,
        }
    }
}

/// First verse section addressed to `verse`.
pub fn find_section(sections: &[NoteSection], verse: u32) -> Option<&NoteSection> {
    sections.iter().find(|s| s.covers(verse))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_tracks_bytes() {
        let mut note = Note::new(43, 3, "Test");
        assert_eq!(note.content_length, 4);

        note.set_content("Grüße");
        assert_eq!(note.content_length, "Grüße".len());
        assert_eq!(note.content_length, 7);
    }

    #[test]
    fn test_new_note_is_unlocked() {
        let note = Note::new(1, 1, "");
        assert!(note.locked_by().is_none());
        assert!(note.locked_at().is_none());
        assert_eq!(note.created, note.modified);
    }

    #[test]
    fn test_section_ids() {
        assert_eq!(NoteSection::general("x").id(), "general");
        assert_eq!(NoteSection::verse(16, "x").id(), "v16");
        assert_eq!(NoteSection::range(1, 5, "x").id(), "v1-5");
    }

    #[test]
    fn test_find_section_by_verse() {
        let sections = vec![
            NoteSection::general("intro"),
            NoteSection::verse(3, "born again"),
            NoteSection::range(14, 17, "lifted up"),
        ];

        assert_eq!(find_section(&sections, 3).unwrap().id(), "v3");
        assert_eq!(find_section(&sections, 16).unwrap().id(), "v14-17");
        assert!(find_section(&sections, 4).is_none());
    }

    #[test]
    fn test_set_sections_rewrites_body() {
        let mut note = Note::new(43, 3, "old");
        note.set_sections(&[NoteSection::general("intro"), NoteSection::verse(16, "love")]);

        assert_eq!(note.content, "intro\n\n## v16\nlove");
        assert_eq!(note.content_length, note.content.len());
        assert_eq!(note.sections().len(), 2);
    }
}
