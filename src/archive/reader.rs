use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};

use tracing::{info, warn};
use zip::ZipArchive;

use super::paths::{normalize_relative_path, RelativePath};
use super::schema::{ENTRIES_FILE, MEDIA_DIR_PREFIX, META_FILE, TRIP_FILE};
use super::validator::{validate, ValidatedArchive, ValidationContext};
use crate::error::{ArchiveError, ArchiveResult, ErrorCode};

pub const DEFAULT_MAX_UNCOMPRESSED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Raw contents of an uploaded archive, before validation.
#[derive(Debug, Clone, Default)]
pub struct ArchiveContents {
    /// Every file entry name in the zip (directories excluded).
    pub file_list: Vec<String>,
    pub meta: Option<String>,
    pub trip: Option<String>,
    pub entries: Option<String>,
    /// Bytes of each `media/*` entry, keyed by its normalized path. Names
    /// that do not normalize are left to the validator.
    pub media: BTreeMap<RelativePath, Vec<u8>>,
}

/// Source of media bytes for the restore orchestrator.
pub trait MediaPayload {
    fn media_bytes(&self, path: &RelativePath) -> Option<&[u8]>;
}

impl ArchiveContents {
    pub fn validate(&self, ctx: &ValidationContext) -> ArchiveResult<ValidatedArchive> {
        validate(
            &self.file_list,
            self.meta.as_deref(),
            self.trip.as_deref(),
            self.entries.as_deref(),
            ctx,
        )
    }
}

impl MediaPayload for ArchiveContents {
    fn media_bytes(&self, path: &RelativePath) -> Option<&[u8]> {
        self.media.get(path).map(|bytes| bytes.as_slice())
    }
}

/// Unpack an archive into memory. Documents that are not valid UTF-8 are
/// left as `None` so the validator reports them against the right file.
pub fn read_archive(bytes: &[u8], max_uncompressed_bytes: u64) -> ArchiveResult<ArchiveContents> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))?;

    let mut declared: u64 = 0;
    for i in 0..zip.len() {
        let file = zip.by_index_raw(i)?;
        declared = declared.saturating_add(file.size());
    }
    if declared > max_uncompressed_bytes {
        return Err(ArchiveError::new(
            ErrorCode::ArchiveTooLarge,
            format!("Archive expands to {declared} bytes, above the {max_uncompressed_bytes} byte limit"),
        ));
    }

    let mut contents = ArchiveContents::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut extracted: u64 = 0;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if !seen.insert(name.clone()) {
            warn!(target: "waymark", event = "archive_duplicate_entry", index = i);
            return Err(ArchiveError::new(
                ErrorCode::InvalidArchive,
                format!("Archive contains the entry {name} more than once"),
            ));
        }
        let mut buf = Vec::with_capacity(file.size() as usize);
        // Declared sizes can lie; cap the actual read as well.
        let remaining = max_uncompressed_bytes.saturating_sub(extracted);
        (&mut file)
            .take(remaining.saturating_add(1))
            .read_to_end(&mut buf)
            .map_err(|err| {
                ArchiveError::new(ErrorCode::InvalidArchive, "Archive entry could not be decompressed")
                    .with_context("entry", name.clone())
                    .with_context("detail", err.to_string())
            })?;
        extracted = extracted.saturating_add(buf.len() as u64);
        if extracted > max_uncompressed_bytes {
            return Err(ArchiveError::new(
                ErrorCode::ArchiveTooLarge,
                format!("Archive expands beyond the {max_uncompressed_bytes} byte limit"),
            ));
        }

        match name.as_str() {
            META_FILE => contents.meta = String::from_utf8(buf).ok(),
            TRIP_FILE => contents.trip = String::from_utf8(buf).ok(),
            ENTRIES_FILE => contents.entries = String::from_utf8(buf).ok(),
            other if other.starts_with(MEDIA_DIR_PREFIX) => {
                if let Some(path) = normalize_relative_path(&other[MEDIA_DIR_PREFIX.len()..]) {
                    if contents.media.contains_key(&path) {
                        return Err(ArchiveError::new(
                            ErrorCode::InvalidMediaPath,
                            format!("Archive contains media path {path} more than once"),
                        )
                        .with_context("entry", name.clone()));
                    }
                    contents.media.insert(path, buf);
                }
            }
            _ => {}
        }
        contents.file_list.push(name);
    }

    info!(
        target: "waymark",
        event = "archive_read",
        files = contents.file_list.len(),
        media_files = contents.media.len(),
        bytes = extracted
    );
    Ok(contents)
}
