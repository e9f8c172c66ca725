//! Plain-text note format.
//!
//! A note file is a header block between two `---` marker lines, a blank
//! line, then the body:
//!
//! ```text
//! ---
//! book: John
//! chapter: 3
//! created: 2026-10-19T08:15:02.123Z
//! modified: 2026-10-19T08:20:44.907Z
//! locked_by: 5b0c6f0e-8a43-4a0c-9f57-0e6d3c1f7f11
//! locked_at: 2026-10-19T08:20:44.907Z
//! content_length: 4
//! ---
//!
//! Test
//! ```
//!
//! Parsing never fails: a missing or damaged header degrades to defaults so
//! the body is always readable.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::note::{Lease, Note, NoteSection};

const MARKER: &str = "---";
const VERSE_HEADING: &str = "##";

/// Encode a note. `book_name` replaces the numeric book id in the header when given.
pub fn serialize(note: &Note, book_name: Option<&str>) -> String {
    let mut out = String::with_capacity(note.content.len() + 256);
    out.push_str(MARKER);
    out.push('\n');

    // Writing into a String cannot fail
    let _ = match book_name {
        Some(name) => writeln!(out, "book: {}", name),
        None => writeln!(out, "book: {}", note.book),
    };
    let _ = writeln!(out, "chapter: {}", note.chapter);
    let _ = writeln!(out, "created: {}", format_timestamp(&note.created));
    let _ = writeln!(out, "modified: {}", format_timestamp(&note.modified));
    if let Some(lease) = &note.lock {
        let _ = writeln!(out, "locked_by: {}", lease.holder);
        let _ = writeln!(out, "locked_at: {}", format_timestamp(&lease.locked_at));
    }
    let _ = writeln!(out, "content_length: {}", note.content.len());

    out.push_str(MARKER);
    out.push_str("\n\n");
    out.push_str(&note.content);
    out
}

/// Decode a note file for the given key.
///
/// Input without a complete header is taken as body only, stamped with the
/// current time and unlocked.
pub fn parse(text: &str, book: u32, chapter: u32) -> Note {
    let now = Utc::now();

    let Some((header, body)) = split_header(text) else {
        return Note::from_parts(book, chapter, text.to_string(), now, now, None);
    };

    let mut created = None;
    let mut modified = None;
    let mut locked_by = None;
    let mut locked_at = None;

    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "created" => created = Some(parse_timestamp(value).unwrap_or(now)),
            "modified" => modified = Some(parse_timestamp(value).unwrap_or(now)),
            "locked_by" => locked_by = value.parse().ok(),
            "locked_at" => locked_at = parse_timestamp(value),
            // book, chapter and content_length are informational; unknown keys are ignored
            _ => {}
        }
    }

    let lock = match (locked_by, locked_at) {
        (Some(holder), Some(locked_at)) => Some(Lease { holder, locked_at }),
        _ => None,
    };

    Note::from_parts(
        book,
        chapter,
        body.to_string(),
        created.unwrap_or(now),
        modified.unwrap_or(now),
        lock,
    )
}

/// Split `text` into (header lines, body). `None` when no complete header is present.
fn split_header(text: &str) -> Option<(&str, &str)> {
    let rest = strip_line(text, MARKER)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == MARKER {
            let header = &rest[..offset];
            let after = &rest[offset + line.len()..];
            // Exactly one separating blank line belongs to the format
            let body = after
                .strip_prefix("\r\n")
                .or_else(|| after.strip_prefix('\n'))
                .unwrap_or(after);
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Strip a first line equal to `expected`, returning what follows it.
fn strip_line<'a>(text: &'a str, expected: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(expected)?;
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

/// Interchange format: RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 with or without fractional seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Split a body into sections.
///
/// Lines before the first verse heading form the general section, which is
/// always present and always first. Section content is trimmed.
pub fn parse_sections(body: &str) -> Vec<NoteSection> {
    let mut sections = Vec::new();
    let mut current = NoteSection::general(String::new());
    let mut lines: Vec<&str> = Vec::new();

    for line in body.lines() {
        if let Some((start, end)) = parse_verse_heading(line) {
            current.content = lines.join("\n").trim().to_string();
            sections.push(current);
            current = NoteSection {
                verse_start: Some(start),
                verse_end: end,
                content: String::new(),
            };
            lines.clear();
        } else {
            lines.push(line);
        }
    }

    current.content = lines.join("\n").trim().to_string();
    sections.push(current);
    sections
}

/// Inverse of [`parse_sections`].
pub fn serialize_sections(sections: &[NoteSection]) -> String {
    let mut parts = Vec::with_capacity(sections.len());

    for section in sections {
        let content = section.content.trim();
        if section.is_general() {
            if !content.is_empty() {
                parts.push(content.to_string());
            }
            continue;
        }

        let heading = format!("{} {}", VERSE_HEADING, section.id());
        if content.is_empty() {
            parts.push(heading);
        } else {
            parts.push(format!("{}\n{}", heading, content));
        }
    }

    parts.join("\n\n").trim_end().to_string()
}

/// `## v3` -> (3, None), `## v3-5` -> (3, Some(5)).
fn parse_verse_heading(line: &str) -> Option<(u32, Option<u32>)> {
    let rest = line.trim().strip_prefix(VERSE_HEADING)?;
    let rest = rest.trim_start().strip_prefix('v')?.trim_end();

    match rest.split_once('-') {
        Some((start, end)) => {
            let start: u32 = parse_verse_number(start)?;
            let end: u32 = parse_verse_number(end)?;
            (start <= end).then_some((start, Some(end)))
        }
        None => Some((parse_verse_number(rest)?, None)),
    }
}

fn parse_verse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
