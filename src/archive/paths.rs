//! Conversion between stored media URLs and upload-root relative paths.
//!
//! Every path that reaches the filesystem or the archive's `media/` folder
//! goes through [`normalize_relative_path`]; nothing else in the crate is
//! allowed to build media paths from untrusted strings.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};

use super::schema::MEDIA_DIR_PREFIX;

pub const DEFAULT_PUBLIC_PREFIX: &str = "/uploads/";

const ENCODED_SEPARATORS: [&str; 2] = ["%5c", "%2f"];
const ENCODED_PARENTS: [&str; 3] = ["%2e%2e", ".%2e", "%2e."];

/// A traversal-free path relative to the upload root, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the zip entry holding this file's bytes.
    pub fn archive_entry_name(&self) -> String {
        format!("{MEDIA_DIR_PREFIX}{}", self.0)
    }

    /// Join onto a filesystem root one segment at a time.
    pub fn to_path_under(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        for segment in self.0.split('/') {
            full.push(segment);
        }
        full
    }

    pub fn parent(&self) -> Option<RelativePath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| RelativePath(parent.to_string()))
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RelativePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Map a stored public URL (e.g. `/uploads/trips/cover.jpg`) to its relative
/// path. Returns `None` for anything outside the prefix or unsafe.
pub fn to_relative_path(url: &str, public_prefix: &str) -> Option<RelativePath> {
    let stripped = url.strip_prefix(public_prefix)?;
    normalize_relative_path(stripped)
}

/// Inverse of [`to_relative_path`].
pub fn to_public_url(relative: &RelativePath, public_prefix: &str) -> String {
    if public_prefix.ends_with('/') {
        format!("{public_prefix}{}", relative.as_str())
    } else {
        format!("{public_prefix}/{}", relative.as_str())
    }
}

/// Validate and normalize an upload-root relative path.
pub fn normalize_relative_path(raw: &str) -> Option<RelativePath> {
    if raw.is_empty() || raw.contains('\\') || raw.contains('\0') {
        return None;
    }
    if raw.starts_with('/') || is_windows_drive(raw) {
        return None;
    }
    let lowered = raw.to_ascii_lowercase();
    if ENCODED_SEPARATORS.iter().any(|enc| lowered.contains(enc)) {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            other => {
                let lowered = other.to_ascii_lowercase();
                if ENCODED_PARENTS.contains(&lowered.as_str()) {
                    return None;
                }
                segments.push(other);
            }
        }
    }

    if segments.is_empty() {
        return None;
    }
    let normalized = segments.join("/");
    if normalized == ".." || normalized.starts_with("../") || is_windows_drive(&normalized) {
        return None;
    }
    Some(RelativePath(normalized))
}

fn is_windows_drive(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(raw: &str) -> Option<String> {
        normalize_relative_path(raw).map(|p| p.as_str().to_string())
    }

    #[test]
    fn accepts_plain_relative_paths_unchanged() {
        assert_eq!(rel("a/b/c.jpg").as_deref(), Some("a/b/c.jpg"));
        assert_eq!(rel("cover.png").as_deref(), Some("cover.png"));
    }

    #[test]
    fn collapses_empty_and_current_segments() {
        assert_eq!(rel("a//b/./c.jpg").as_deref(), Some("a/b/c.jpg"));
        assert_eq!(rel("./a.jpg").as_deref(), Some("a.jpg"));
    }

    #[test]
    fn rejects_traversal_and_absolute_forms() {
        for bad in [
            "../x",
            "..",
            "a/../../b",
            "a/b/..",
            "../../etc/passwd",
            "/abs/path",
            "a\\b",
            "..\\..\\windows",
            "C:/Windows/system.ini",
            "c:evil",
            "a/%2e%2e/b",
            "a/%2E%2E/b",
            "a%5c..%5cb",
            "a%2F..%2Fb",
            "nul\0byte",
            "",
            ".",
            "./",
        ] {
            assert!(rel(bad).is_none(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn url_must_carry_the_public_prefix() {
        let path = to_relative_path("/uploads/trips/cover.jpg", DEFAULT_PUBLIC_PREFIX).unwrap();
        assert_eq!(path.as_str(), "trips/cover.jpg");
        assert!(to_relative_path("/static/trips/cover.jpg", DEFAULT_PUBLIC_PREFIX).is_none());
        assert!(to_relative_path("https://cdn.example/a.jpg", DEFAULT_PUBLIC_PREFIX).is_none());
        assert!(to_relative_path("/uploads/../etc/passwd", DEFAULT_PUBLIC_PREFIX).is_none());
        assert!(to_relative_path("/uploads//etc/passwd", DEFAULT_PUBLIC_PREFIX).is_none());
        assert!(to_relative_path("/uploads/", DEFAULT_PUBLIC_PREFIX).is_none());
    }

    #[test]
    fn public_url_round_trips() {
        let path = normalize_relative_path("entries/e1/photo.jpg").unwrap();
        let url = to_public_url(&path, DEFAULT_PUBLIC_PREFIX);
        assert_eq!(url, "/uploads/entries/e1/photo.jpg");
        assert_eq!(to_relative_path(&url, DEFAULT_PUBLIC_PREFIX), Some(path.clone()));
        assert_eq!(to_public_url(&path, "/files"), "/files/entries/e1/photo.jpg");
    }

    #[test]
    fn archive_entry_lives_under_media() {
        let path = normalize_relative_path("trips/cover.jpg").unwrap();
        assert_eq!(path.archive_entry_name(), "media/trips/cover.jpg");
        assert_eq!(path.parent().unwrap().as_str(), "trips");
        assert!(normalize_relative_path("cover.jpg").unwrap().parent().is_none());
    }
}
