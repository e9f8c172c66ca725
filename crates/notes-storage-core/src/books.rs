//! Book id lookup table and the note file naming convention.
//!
//! Note files are named `{book-slug}-{chapter}.{ext}`, e.g. `1-john-4.md`.
//! The table is built once at startup and only read afterwards.

use std::collections::HashMap;

use serde::Deserialize;

/// Canonical 66-book order. Ids are 1-based positions.
const PROTESTANT_CANON: [&str; 66] = [
    "Genesis", "Exodus", "Leviticus", "Numbers", "Deuteronomy", "Joshua", "Judges", "Ruth",
    "1 Samuel", "2 Samuel", "1 Kings", "2 Kings", "1 Chronicles", "2 Chronicles", "Ezra",
    "Nehemiah", "Esther", "Job", "Psalms", "Proverbs", "Ecclesiastes", "Song of Solomon",
    "Isaiah", "Jeremiah", "Lamentations", "Ezekiel", "Daniel", "Hosea", "Joel", "Amos",
    "Obadiah", "Jonah", "Micah", "Nahum", "Habakkuk", "Zephaniah", "Haggai", "Zechariah",
    "Malachi", "Matthew", "Mark", "Luke", "John", "Acts", "Romans", "1 Corinthians",
    "2 Corinthians", "Galatians", "Ephesians", "Philippians", "Colossians", "1 Thessalonians",
    "2 Thessalonians", "1 Timothy", "2 Timothy", "Titus", "Philemon", "Hebrews", "James",
    "1 Peter", "2 Peter", "1 John", "2 John", "3 John", "Jude", "Revelation",
];

/// Mapping between book ids and their canonical names.
#[derive(Debug, Clone, Default)]
pub struct BookTable {
    names: HashMap<u32, String>,
    by_slug: HashMap<String, u32>,
}

impl BookTable {
    /// Build a table from `(id, name)` pairs supplied by the reference data.
    pub fn new<I, S>(books: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (id, name) in books {
            let name = name.into();
            table.by_slug.insert(slugify(&name), id);
            table.names.insert(id, name);
        }
        table
    }

    /// The 66-book canon (Genesis = 1, John = 43, Revelation = 66).
    pub fn protestant_canon() -> Self {
        Self::new(
            PROTESTANT_CANON
                .iter()
                .enumerate()
                .map(|(i, name)| (i as u32 + 1, *name)),
        )
    }

    /// Load a table from JSON shaped like `{"1": "Genesis", "2": "Exodus"}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(transparent)]
        struct Raw(HashMap<u32, String>);

        let Raw(map) = serde_json::from_str(json)?;
        Ok(Self::new(map))
    }

    pub fn name(&self, book: u32) -> Option<&str> {
        self.names.get(&book).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a file name slug back to its book id.
    pub fn id_for_slug(&self, slug: &str) -> Option<u32> {
        self.by_slug.get(&slug.to_lowercase()).copied()
    }

    /// `{book-slug}-{chapter}.{ext}`; books missing from the table use their numeric id.
    pub fn file_name(&self, book: u32, chapter: u32, extension: &str) -> String {
        let stem = match self.name(book) {
            Some(name) => slugify(name),
            None => book.to_string(),
        };
        format!("{}-{}.{}", stem, chapter, extension)
    }

    /// Decode a note file name into `(book, chapter)`.
    ///
    /// Splits at the last hyphen. Numeric book segments from earlier naming
    /// are accepted as ids.
    pub fn parse_file_name(&self, file_name: &str, extension: &str) -> Option<(u32, u32)> {
        let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
        let (book_part, chapter_part) = stem.rsplit_once('-')?;

        let chapter: u32 = chapter_part.parse().ok()?;
        if chapter == 0 || !chapter_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let book = self
            .id_for_slug(book_part)
            .or_else(|| book_part.parse().ok())?;
        Some((book, chapter))
    }
}

/// Lowercase, spaces to hyphens: `"Song of Solomon"` -> `"song-of-solomon"`.
pub fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canon_ids() {
        let books = BookTable::protestant_canon();
        assert_eq!(books.len(), 66);
        assert_eq!(books.name(1), Some("Genesis"));
        assert_eq!(books.name(43), Some("John"));
        assert_eq!(books.name(66), Some("Revelation"));
        assert_eq!(books.name(67), None);
    }

    #[test]
    fn test_file_name() {
        let books = BookTable::protestant_canon();
        assert_eq!(books.file_name(43, 3, "md"), "john-3.md");
        assert_eq!(books.file_name(22, 1, "md"), "song-of-solomon-1.md");
        assert_eq!(books.file_name(62, 4, "md"), "1-john-4.md");
        assert_eq!(books.file_name(99, 2, "md"), "99-2.md");
    }

    #[test]
    fn test_file_name_roundtrip_every_book() {
        let books = BookTable::protestant_canon();
        for book in 1..=66 {
            for chapter in [1, 2, 10, 150] {
                let name = books.file_name(book, chapter, "md");
                assert_eq!(
                    books.parse_file_name(&name, "md"),
                    Some((book, chapter)),
                    "file name {}",
                    name
                );
            }
        }
    }

    #[test]
    fn test_parse_legacy_numeric_name() {
        let books = BookTable::protestant_canon();
        assert_eq!(books.parse_file_name("43-3.md", "md"), Some((43, 3)));
        assert_eq!(books.parse_file_name("120-7.md", "md"), Some((120, 7)));
    }

    #[test]
    fn test_parse_rejects_unrecognized_names() {
        let books = BookTable::protestant_canon();
        assert_eq!(books.parse_file_name("john-3.txt", "md"), None);
        assert_eq!(books.parse_file_name("john.md", "md"), None);
        assert_eq!(books.parse_file_name("john-0.md", "md"), None);
        assert_eq!(books.parse_file_name("john-+3.md", "md"), None);
        assert_eq!(books.parse_file_name("narnia-3.md", "md"), None);
        assert_eq!(
            books.parse_file_name("john-3.sync-conflict-20261019-101010-ABC.md", "md"),
            None
        );
    }

    #[test]
    fn test_slug_lookup_ignores_case() {
        let books = BookTable::protestant_canon();
        assert_eq!(books.parse_file_name("John-3.md", "md"), Some((43, 3)));
    }

    #[test]
    fn test_from_json() {
        let books = BookTable::from_json(r#"{"1": "Genesis", "43": "John"}"#).unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books.file_name(43, 3, "md"), "john-3.md");
        assert!(BookTable::from_json("[1, 2]").is_err());
    }
}
