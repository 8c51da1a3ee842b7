use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::paths::{to_relative_path, RelativePath, DEFAULT_PUBLIC_PREFIX};
use super::schema::{
    EntriesDocument, ExportCounts, ExportMeta, TripDocument, TripSnapshot, ENTRIES_FILE,
    MEDIA_DIR_PREFIX, META_FILE, SCHEMA_VERSION, TRIP_FILE,
};
use crate::error::{ArchiveError, ArchiveResult, ErrorCode};
use crate::media_store::MediaStore;
use crate::security::hash_path;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub app_version: String,
    pub public_prefix: String,
    /// Fixed export timestamp; defaults to now.
    pub exported_at: Option<DateTime<Utc>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
            exported_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaManifestEntry {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub bytes: Vec<u8>,
    pub meta: ExportMeta,
    pub media: Vec<MediaManifestEntry>,
}

/// Serialize a trip and copy every referenced media file into a zip. Media
/// are read before the zip is started so a missing file fails the export
/// without producing anything.
pub fn build<M: MediaStore + ?Sized>(
    snapshot: &TripSnapshot,
    media_store: &M,
    opts: &BuildOptions,
) -> ArchiveResult<BuiltArchive> {
    let start = Instant::now();
    let trip_id = snapshot.trip.id.as_str();

    let paths = referenced_paths(snapshot, &opts.public_prefix)?;
    let mut payload: BTreeMap<RelativePath, Vec<u8>> = BTreeMap::new();
    for path in paths {
        let bytes = media_store.read(&path).map_err(|err| {
            error!(
                target: "waymark",
                event = "export_media_unreadable",
                trip_id,
                path_hash = %hash_path(Path::new(path.as_str())),
                error = %err
            );
            ArchiveError::new(
                ErrorCode::MediaReadFailed,
                format!("Media file {path} could not be read"),
            )
            .with_context("detail", err.to_string())
        })?;
        payload.insert(path, bytes);
    }

    let meta = ExportMeta {
        schema_version: SCHEMA_VERSION,
        trip_id: trip_id.to_string(),
        app_version: opts.app_version.clone(),
        exported_at: opts.exported_at.unwrap_or_else(Utc::now),
        counts: ExportCounts {
            trip: 1,
            entries: snapshot.entries.len() as u64,
            media: payload.len() as u64,
        },
    };
    let trip_doc = TripDocument {
        trip: snapshot.trip.clone(),
        tags: snapshot.tags.clone(),
    };
    let entries_doc = EntriesDocument {
        entries: snapshot.entries.clone(),
    };

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in [
        (META_FILE, serde_json::to_vec_pretty(&meta)?),
        (TRIP_FILE, serde_json::to_vec_pretty(&trip_doc)?),
        (ENTRIES_FILE, serde_json::to_vec_pretty(&entries_doc)?),
    ] {
        writer.start_file(name, options)?;
        writer.write_all(&body)?;
    }

    let mut manifest = Vec::with_capacity(payload.len());
    if !payload.is_empty() {
        writer.add_directory(MEDIA_DIR_PREFIX, options)?;
    }
    for (path, bytes) in &payload {
        writer.start_file(path.archive_entry_name(), options)?;
        writer.write_all(bytes)?;
        manifest.push(MediaManifestEntry {
            path: path.archive_entry_name(),
            bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(bytes)),
        });
    }
    let bytes = writer.finish()?.into_inner();

    info!(
        target: "waymark",
        event = "export_built",
        trip_id,
        entries = meta.counts.entries,
        media = meta.counts.media,
        bytes = bytes.len() as u64,
        ms = start.elapsed().as_millis() as u64
    );

    Ok(BuiltArchive {
        bytes,
        meta,
        media: manifest,
    })
}

fn referenced_paths(
    snapshot: &TripSnapshot,
    public_prefix: &str,
) -> ArchiveResult<Vec<RelativePath>> {
    let mut urls: Vec<&str> = Vec::new();
    urls.extend(snapshot.trip.cover_image_url.as_deref());
    for entry in &snapshot.entries {
        urls.extend(entry.cover_image_url.as_deref());
        urls.extend(entry.media.iter().map(|media| media.url.as_str()));
    }

    let mut paths = Vec::new();
    for url in urls.into_iter().filter(|url| !url.trim().is_empty()) {
        let path = to_relative_path(url, public_prefix).ok_or_else(|| {
            ArchiveError::new(
                ErrorCode::InvalidMediaPath,
                format!("Media URL cannot be exported: {url}"),
            )
        })?;
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    Ok(paths)
}
