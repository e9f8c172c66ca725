//! Naming rules for alternate versions kept beside a note file.
//!
//! Two sources of alternates exist in a local folder:
//! - the version log under `.versions/{file}/`, one `{id}.{ext}` per entry,
//!   renamed to `{id}.resolved` once settled
//! - conflict copies left next to the file by Syncthing, named
//!   `{stem}.sync-conflict-{date}-{time}-{device}.{ext}`

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub const VERSIONS_DIR: &str = ".versions";

const RESOLVED_EXTENSION: &str = "resolved";
const DEFAULT_ENTRY_EXTENSION: &str = "version";
const CONFLICT_MARKER: &str = ".sync-conflict-";

/// Split `john-3.md` into (`john-3`, Some(`md`)).
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Version id for `data` recorded at `at`: UTC stamp plus a content hash prefix.
pub fn version_id(data: &[u8], at: DateTime<Utc>) -> String {
    let digest = hex::encode(Sha256::digest(data));
    format!("{}-{}", at.format("%Y%m%dT%H%M%S%3fZ"), &digest[..12])
}

pub fn entry_file_name(name: &str, id: &str) -> String {
    let ext = split_name(name).1.unwrap_or(DEFAULT_ENTRY_EXTENSION);
    format!("{}.{}", id, ext)
}

pub fn resolved_file_name(id: &str) -> String {
    format!("{}.{}", id, RESOLVED_EXTENSION)
}

/// Id of an unresolved log entry, or `None` for resolved or foreign files.
pub fn parse_entry(name: &str, file: &str) -> Option<String> {
    let ext = split_name(name).1.unwrap_or(DEFAULT_ENTRY_EXTENSION);
    let id = file.strip_suffix(ext)?.strip_suffix('.')?;
    if id.is_empty() || id.starts_with('.') {
        return None;
    }
    Some(id.to_string())
}

pub fn is_conflict_copy(file: &str) -> bool {
    file.contains(CONFLICT_MARKER)
}

/// Whether `file` is a Syncthing conflict copy of `name`.
pub fn is_conflict_copy_of(name: &str, file: &str) -> bool {
    let (stem, ext) = split_name(name);
    let Some(rest) = file
        .strip_prefix(stem)
        .and_then(|r| r.strip_prefix(CONFLICT_MARKER))
    else {
        return false;
    };
    match ext {
        Some(ext) => rest
            .strip_suffix(ext)
            .and_then(|r| r.strip_suffix('.'))
            .is_some_and(|tag| !tag.is_empty() && !tag.contains('.')),
        None => !rest.is_empty() && !rest.contains('.'),
    }
}

/// Short device id Syncthing appends to a conflict copy name.
pub fn conflict_copy_device(file: &str) -> Option<String> {
    let (_, tag) = file.split_once(CONFLICT_MARKER)?;
    let tag = split_name(tag).0;
    let mut parts = tag.split('-');
    let (_date, _time, device) = (parts.next()?, parts.next()?, parts.next()?);
    if device.is_empty() || parts.next().is_some() {
        return None;
    }
    Some(device.to_string())
}

/// Ids become path components, so they must stay inside their directory.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\']) && !id.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_version_id_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let id = version_id(b"hello", at);
        // sha256("hello") = 2cf24dba5fb0a30e...
        assert_eq!(id, "20240301T123005000Z-2cf24dba5fb0");
        assert!(is_valid_id(&id));
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(entry_file_name("john-3.md", "abc"), "abc.md");
        assert_eq!(entry_file_name("notes", "abc"), "abc.version");
        assert_eq!(parse_entry("john-3.md", "abc.md").as_deref(), Some("abc"));
        assert_eq!(parse_entry("john-3.md", "abc.resolved"), None);
        assert_eq!(parse_entry("john-3.md", ".md"), None);
        assert_eq!(resolved_file_name("abc"), "abc.resolved");
    }

    #[test]
    fn test_conflict_copy_matching() {
        let copy = "john-3.sync-conflict-20240301-123005-ABCDEF7.md";
        assert!(is_conflict_copy(copy));
        assert!(is_conflict_copy_of("john-3.md", copy));
        assert!(!is_conflict_copy_of("john-30.md", copy));
        assert!(!is_conflict_copy_of("john-3.md", "john-3.md"));
        assert!(!is_conflict_copy_of("john-3.md", "john-3.sync-conflict-x.txt"));
        assert!(!is_conflict_copy("john-3.md"));
    }

    #[test]
    fn test_conflict_copy_device() {
        assert_eq!(
            conflict_copy_device("john-3.sync-conflict-20240301-123005-ABCDEF7.md").as_deref(),
            Some("ABCDEF7")
        );
        assert_eq!(conflict_copy_device("john-3.sync-conflict-oops.md"), None);
        assert_eq!(conflict_copy_device("john-3.md"), None);
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("john-3.sync-conflict-20240301-123005-ABCDEF7.md"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../escape"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id(".hidden"));
    }
}
