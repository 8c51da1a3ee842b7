use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::paths::{normalize_relative_path, to_relative_path, RelativePath, DEFAULT_PUBLIC_PREFIX};
use super::schema::{
    EntriesDocument, Entry, ExportMeta, Tag, Trip, TripDocument, MEDIA_DIR_PREFIX,
    REQUIRED_FILES, SCHEMA_VERSION,
};
use super::version;
use crate::error::{ArchiveError, ArchiveResult, ErrorCode};

#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Version of the running application, compared against `meta.appVersion`.
    pub current_app_version: String,
    pub public_prefix: String,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            current_app_version: env!("CARGO_PKG_VERSION").to_string(),
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
        }
    }
}

impl ValidationContext {
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.current_app_version = version.into();
        self
    }
}

/// A fully parsed and cross-checked archive, ready for the restore
/// orchestrator.
#[derive(Debug, Clone)]
pub struct RestoreArchive {
    pub meta: ExportMeta,
    pub trip: Trip,
    /// Trip-level tags followed by entry-embedded tags not declared there.
    pub tags: Vec<Tag>,
    pub entries: Vec<Entry>,
    /// Media paths referenced by the trip and its entries.
    pub media_paths: BTreeSet<RelativePath>,
    /// Files under `media/` that nothing references.
    pub unexpected_media: Vec<RelativePath>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub trip: u32,
    pub entries: u64,
    pub tags: u64,
    pub media: u64,
}

/// IDs and URLs that appear more than once inside the archive itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryConflicts {
    pub entries: Vec<String>,
    pub tags: Vec<String>,
    pub media: Vec<String>,
    pub media_urls: Vec<String>,
}

impl SummaryConflicts {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
            && self.tags.is_empty()
            && self.media.is_empty()
            && self.media_urls.is_empty()
    }

    /// One human readable line per non-empty conflict class.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (label, ids) in [
            ("entry IDs", &self.entries),
            ("tag IDs", &self.tags),
            ("media IDs", &self.media),
            ("media URLs", &self.media_urls),
        ] {
            if !ids.is_empty() {
                lines.push(format!("Duplicate {label} in archive: {}", ids.join(", ")));
            }
        }
        lines
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub trip_id: String,
    pub counts: SummaryCounts,
    pub conflicts: SummaryConflicts,
    pub unexpected_media: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidatedArchive {
    pub data: RestoreArchive,
    pub summary: Summary,
}

/// Parse and cross-check raw archive contents. Checks run in a fixed order
/// and the first failure is returned.
pub fn validate(
    file_list: &[String],
    raw_meta: Option<&str>,
    raw_trip: Option<&str>,
    raw_entries: Option<&str>,
    ctx: &ValidationContext,
) -> ArchiveResult<ValidatedArchive> {
    let result = validate_inner(file_list, raw_meta, raw_trip, raw_entries, ctx);
    if let Err(err) = &result {
        warn!(
            target: "waymark",
            event = "archive_validation_failed",
            code = err.code().as_str(),
            message = err.message()
        );
    }
    result
}

fn validate_inner(
    file_list: &[String],
    raw_meta: Option<&str>,
    raw_trip: Option<&str>,
    raw_entries: Option<&str>,
    ctx: &ValidationContext,
) -> ArchiveResult<ValidatedArchive> {
    let meta = parse_meta(raw_meta)?;
    check_required_files(file_list, &meta)?;

    if meta.schema_version != SCHEMA_VERSION {
        return Err(ArchiveError::new(
            ErrorCode::UnsupportedSchema,
            format!(
                "Archive schema version {} is not supported (expected {SCHEMA_VERSION})",
                meta.schema_version
            ),
        ));
    }
    if !version::is_compatible(&meta.app_version, &ctx.current_app_version) {
        return Err(ArchiveError::new(
            ErrorCode::UnsupportedAppVersion,
            format!(
                "Archive was exported by version {} which cannot be restored by version {}",
                meta.app_version, ctx.current_app_version
            ),
        ));
    }

    let trip_doc: TripDocument = parse_document(raw_trip, ErrorCode::InvalidTrip, "trip.json")?;
    let entries_doc: EntriesDocument =
        parse_document(raw_entries, ErrorCode::InvalidEntries, "entries.json")?;

    if trip_doc.trip.id != meta.trip_id {
        return Err(ArchiveError::new(
            ErrorCode::TripIdMismatch,
            "Trip ID in trip.json does not match meta.json",
        )
        .with_context("trip_id", trip_doc.trip.id.clone())
        .with_context("meta_trip_id", meta.trip_id.clone()));
    }
    if let Some(entry) = entries_doc
        .entries
        .iter()
        .find(|entry| entry.trip_id != meta.trip_id)
    {
        return Err(ArchiveError::new(
            ErrorCode::EntryTripMismatch,
            format!("Entry {} belongs to a different trip", entry.id),
        )
        .with_context("entry_id", entry.id.clone()));
    }

    let archive_paths = archive_media_paths(file_list)?;
    let expected_paths = expected_media_paths(&trip_doc.trip, &entries_doc.entries, ctx)?;
    let unexpected_media: Vec<RelativePath> =
        archive_paths.difference(&expected_paths).cloned().collect();
    let missing: Vec<&RelativePath> = expected_paths.difference(&archive_paths).collect();
    if !missing.is_empty() {
        let listed = missing
            .iter()
            .map(|path| path.archive_entry_name())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ArchiveError::new(
            ErrorCode::MissingMedia,
            format!("Archive is missing referenced media: {listed}"),
        ));
    }

    let (tags, duplicate_tag_ids) = collect_tag_set(&trip_doc.tags, &entries_doc.entries);
    check_tag_names(&tags)?;
    check_entry_tags(&entries_doc.entries)?;

    let conflicts = SummaryConflicts {
        entries: duplicates(entries_doc.entries.iter().map(|entry| entry.id.as_str())),
        tags: duplicate_tag_ids,
        media: duplicates(
            entries_doc
                .entries
                .iter()
                .flat_map(|entry| entry.media.iter().map(|media| media.id.as_str())),
        ),
        media_urls: duplicates(
            entries_doc
                .entries
                .iter()
                .flat_map(|entry| entry.media.iter().map(|media| media.url.as_str())),
        ),
    };

    let summary = Summary {
        trip_id: meta.trip_id.clone(),
        counts: SummaryCounts {
            trip: 1,
            entries: entries_doc.entries.len() as u64,
            tags: tags.len() as u64,
            media: expected_paths.len() as u64,
        },
        conflicts,
        unexpected_media: unexpected_media.iter().map(|p| p.to_string()).collect(),
    };

    debug!(
        target: "waymark",
        event = "archive_validated",
        trip_id = meta.trip_id.as_str(),
        entries = summary.counts.entries,
        media = summary.counts.media,
        unexpected_media = summary.unexpected_media.len()
    );

    Ok(ValidatedArchive {
        data: RestoreArchive {
            meta,
            trip: trip_doc.trip,
            tags,
            entries: entries_doc.entries,
            media_paths: expected_paths,
            unexpected_media,
        },
        summary,
    })
}

fn parse_meta(raw: Option<&str>) -> ArchiveResult<ExportMeta> {
    let raw = raw.ok_or_else(|| {
        ArchiveError::new(ErrorCode::InvalidMeta, "meta.json is missing from the archive")
    })?;
    serde_json::from_str(raw).map_err(|err| {
        ArchiveError::new(ErrorCode::InvalidMeta, "meta.json is malformed")
            .with_context("detail", err.to_string())
    })
}

fn check_required_files(file_list: &[String], meta: &ExportMeta) -> ArchiveResult<()> {
    for required in REQUIRED_FILES {
        if !file_list.iter().any(|name| name == required) {
            return Err(ArchiveError::new(
                ErrorCode::MissingFile,
                format!("Archive is missing {required}"),
            ));
        }
    }
    if meta.counts.media > 0 && !file_list.iter().any(|name| is_media_file(name)) {
        return Err(ArchiveError::new(
            ErrorCode::MissingMedia,
            format!(
                "meta.json declares {} media files but the archive has none",
                meta.counts.media
            ),
        ));
    }
    Ok(())
}

fn parse_document<T: for<'de> Deserialize<'de>>(
    raw: Option<&str>,
    code: ErrorCode,
    name: &str,
) -> ArchiveResult<T> {
    let raw = raw.ok_or_else(|| ArchiveError::new(code, format!("{name} could not be read")))?;
    serde_json::from_str(raw).map_err(|err| {
        ArchiveError::new(code, format!("{name} is malformed"))
            .with_context("detail", err.to_string())
    })
}

fn is_media_file(name: &str) -> bool {
    name.len() > MEDIA_DIR_PREFIX.len() && name.starts_with(MEDIA_DIR_PREFIX) && !name.ends_with('/')
}

fn archive_media_paths(file_list: &[String]) -> ArchiveResult<BTreeSet<RelativePath>> {
    let mut paths = BTreeSet::new();
    for name in file_list.iter().filter(|name| is_media_file(name)) {
        let raw = &name[MEDIA_DIR_PREFIX.len()..];
        let path = normalize_relative_path(raw).ok_or_else(|| {
            ArchiveError::new(
                ErrorCode::InvalidMediaPath,
                format!("Archive contains an unsafe media path: {name}"),
            )
        })?;
        paths.insert(path);
    }
    Ok(paths)
}

fn expected_media_paths(
    trip: &Trip,
    entries: &[Entry],
    ctx: &ValidationContext,
) -> ArchiveResult<BTreeSet<RelativePath>> {
    let mut urls: Vec<&str> = Vec::new();
    urls.extend(trip.cover_image_url.as_deref());
    for entry in entries {
        urls.extend(entry.cover_image_url.as_deref());
        urls.extend(entry.media.iter().map(|media| media.url.as_str()));
    }

    let mut paths = BTreeSet::new();
    for url in urls.into_iter().filter(|url| !url.trim().is_empty()) {
        let path = to_relative_path(url, &ctx.public_prefix).ok_or_else(|| {
            ArchiveError::new(
                ErrorCode::InvalidMediaPath,
                format!("Media URL cannot be mapped to a safe path: {url}"),
            )
        })?;
        paths.insert(path);
    }
    Ok(paths)
}

/// Build the trip's tag set; returns it with the trip-level tag IDs that
/// were declared more than once.
fn collect_tag_set(trip_tags: &[Tag], entries: &[Entry]) -> (Vec<Tag>, Vec<String>) {
    let duplicate_ids = duplicates(trip_tags.iter().map(|tag| tag.id.as_str()));
    let mut seen: HashSet<&str> = HashSet::new();
    let mut tags = Vec::new();
    for tag in trip_tags
        .iter()
        .chain(entries.iter().flat_map(|entry| entry.tags.iter()))
    {
        if seen.insert(tag.id.as_str()) {
            tags.push(tag.clone());
        }
    }
    (tags, duplicate_ids)
}

fn check_tag_names(tags: &[Tag]) -> ArchiveResult<()> {
    let mut by_name: HashMap<String, &str> = HashMap::new();
    for tag in tags {
        if let Some(existing) = by_name.insert(tag.name_key(), tag.id.as_str()) {
            return Err(ArchiveError::new(
                ErrorCode::DuplicateTagName,
                format!("Tag name \"{}\" is used by more than one tag", tag.name),
            )
            .with_context("tag_id", tag.id.clone())
            .with_context("other_tag_id", existing.to_string()));
        }
    }
    Ok(())
}

fn check_entry_tags(entries: &[Entry]) -> ArchiveResult<()> {
    let mut seen_entries: HashSet<&str> = HashSet::new();
    for entry in entries {
        // A repeated entry ID is reported as a conflict, not a link error.
        if !seen_entries.insert(entry.id.as_str()) {
            continue;
        }
        let mut tag_ids: HashSet<&str> = HashSet::new();
        for tag in &entry.tags {
            if !tag_ids.insert(tag.id.as_str()) {
                return Err(ArchiveError::new(
                    ErrorCode::DuplicateEntryTag,
                    format!("Entry {} is linked to tag {} more than once", entry.id, tag.id),
                ));
            }
        }
    }
    Ok(())
}

/// Values that occur more than once, each listed once in first-seen order.
fn duplicates<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut order = Vec::new();
    for value in values {
        let count = counts.entry(value).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(value.to_string());
        }
    }
    order
}
