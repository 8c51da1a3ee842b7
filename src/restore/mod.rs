//! Restore orchestration: conflict checks against the live stores, media
//! writes, one database transaction, and compensation when a later phase
//! fails.
//!
//! Files are written before the transaction commits. A process crash between
//! the two phases leaves orphaned files under the upload root; the database
//! never references media that were not written.

mod lock;
mod rows;

pub use lock::TripLock;
pub use rows::restore_rows;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::paths::RelativePath;
use crate::archive::reader::MediaPayload;
use crate::archive::validator::{RestoreArchive, Summary};
use crate::error::{ArchiveError, ArchiveResult, ErrorCode};
use crate::media_store::{MediaStore, MediaStoreError};
use crate::security::hash_path;
use crate::store::DataStore;

/// The live stores a restore writes into.
#[derive(Debug, Clone)]
pub struct RestoreContext<D, M> {
    pub store: D,
    pub media: M,
}

impl<D, M> RestoreContext<D, M> {
    pub fn new(store: D, media: M) -> Self {
        Self { store, media }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RestoreOutcome {
    DryRun {
        summary: Summary,
        warnings: Vec<String>,
    },
    Restored {
        summary: Summary,
        #[serde(rename = "tripId")]
        trip_id: String,
    },
}

impl RestoreOutcome {
    pub fn summary(&self) -> &Summary {
        match self {
            RestoreOutcome::DryRun { summary, .. } | RestoreOutcome::Restored { summary, .. } => {
                summary
            }
        }
    }
}

/// Admit a validated archive into the live stores, or report what would
/// happen when `dry_run` is set. Dry runs never touch either store.
pub async fn restore<D, M, P>(
    ctx: &RestoreContext<D, M>,
    archive: &RestoreArchive,
    summary: &Summary,
    payload: &P,
    dry_run: bool,
) -> ArchiveResult<RestoreOutcome>
where
    D: DataStore,
    M: MediaStore,
    P: MediaPayload + ?Sized,
{
    let span = info_span!(
        target: "waymark",
        "restore",
        restore_id = %Uuid::now_v7(),
        trip_id = archive.trip.id.as_str(),
        dry_run
    );
    async move {
        let start = Instant::now();
        let result = if dry_run {
            Ok(dry_run_report(archive, summary))
        } else {
            restore_live(ctx, archive, summary, payload).await
        };
        match &result {
            Ok(_) => info!(
                target: "waymark",
                event = "restore_finished",
                ms = start.elapsed().as_millis() as u64
            ),
            Err(err) => warn!(
                target: "waymark",
                event = "restore_failed",
                code = err.code().as_str(),
                message = err.message(),
                ms = start.elapsed().as_millis() as u64
            ),
        }
        result
    }
    .instrument(span)
    .await
}

fn dry_run_report(archive: &RestoreArchive, summary: &Summary) -> RestoreOutcome {
    let mut warnings = summary.conflicts.describe();
    if !archive.unexpected_media.is_empty() {
        warnings.push(unreferenced_message(&archive.unexpected_media));
    }
    info!(
        target: "waymark",
        event = "restore_dry_run",
        warnings = warnings.len()
    );
    RestoreOutcome::DryRun {
        summary: summary.clone(),
        warnings,
    }
}

async fn restore_live<D, M, P>(
    ctx: &RestoreContext<D, M>,
    archive: &RestoreArchive,
    summary: &Summary,
    payload: &P,
) -> ArchiveResult<RestoreOutcome>
where
    D: DataStore,
    M: MediaStore,
    P: MediaPayload + ?Sized,
{
    let trip_id = archive.trip.id.as_str();

    if !summary.conflicts.is_empty() {
        return Err(ArchiveError::new(
            ErrorCode::Conflict,
            summary.conflicts.describe().join("; "),
        ));
    }
    if !archive.unexpected_media.is_empty() {
        return Err(ArchiveError::new(
            ErrorCode::UnreferencedMedia,
            unreferenced_message(&archive.unexpected_media),
        ));
    }

    let _lock = TripLock::try_acquire(trip_id).ok_or_else(|| {
        ArchiveError::new(
            ErrorCode::Conflict,
            format!("A restore of trip {trip_id} is already in progress"),
        )
    })?;

    check_store_conflicts(&ctx.store, archive).await?;
    check_media_conflicts(&ctx.media, &archive.media_paths)?;
    info!(target: "waymark", event = "restore_conflict_check_passed");

    let written = write_media(&ctx.media, &archive.media_paths, payload)?;

    let rows = restore_rows(archive, Utc::now());
    if let Err(err) = ctx.store.insert_archive(&rows).await {
        error!(
            target: "waymark",
            event = "restore_commit_failed",
            error = %err,
            unique_violation = err.is_unique_violation()
        );
        compensate(&ctx.media, &written);
        return Err(ArchiveError::from(err).with_context("phase", "commit"));
    }

    info!(
        target: "waymark",
        event = "restore_committed",
        entries = rows.entries.len(),
        tags = rows.tags.len(),
        media_files = written.len()
    );
    Ok(RestoreOutcome::Restored {
        summary: summary.clone(),
        trip_id: trip_id.to_string(),
    })
}

async fn check_store_conflicts<D: DataStore>(
    store: &D,
    archive: &RestoreArchive,
) -> ArchiveResult<()> {
    let trip_id = archive.trip.id.as_str();
    if store.find_trip_by_id(trip_id).await?.is_some() {
        return Err(ArchiveError::new(
            ErrorCode::Conflict,
            format!("Trip {trip_id} already exists"),
        ));
    }

    let entry_ids: Vec<String> = archive.entries.iter().map(|e| e.id.clone()).collect();
    let tag_ids: Vec<String> = archive.tags.iter().map(|t| t.id.clone()).collect();
    let media_ids: Vec<String> = archive
        .entries
        .iter()
        .flat_map(|e| e.media.iter().map(|m| m.id.clone()))
        .collect();

    let mut messages = Vec::new();
    for (label, existing) in [
        ("Entries", store.find_entries_by_ids(&entry_ids).await?),
        ("Tags", store.find_tags_by_ids(&tag_ids).await?),
        ("Media", store.find_media_by_ids(&media_ids).await?),
    ] {
        if !existing.is_empty() {
            messages.push(format!("{label} already exist: {}", existing.join(", ")));
        }
    }
    if messages.is_empty() {
        Ok(())
    } else {
        Err(ArchiveError::new(ErrorCode::Conflict, messages.join("; ")))
    }
}

fn check_media_conflicts<M: MediaStore>(
    media: &M,
    paths: &BTreeSet<RelativePath>,
) -> ArchiveResult<()> {
    let mut existing = Vec::new();
    for path in paths {
        if media.exists(path).map_err(|err| media_error(path, err))? {
            existing.push(path.to_string());
        }
    }
    if existing.is_empty() {
        Ok(())
    } else {
        Err(ArchiveError::new(
            ErrorCode::Conflict,
            format!("Media files already exist: {}", existing.join(", ")),
        ))
    }
}

fn write_media<M, P>(
    media: &M,
    paths: &BTreeSet<RelativePath>,
    payload: &P,
) -> ArchiveResult<Vec<RelativePath>>
where
    M: MediaStore,
    P: MediaPayload + ?Sized,
{
    let mut written: Vec<RelativePath> = Vec::new();
    for path in paths {
        if let Err(detail) = write_one(media, path, payload) {
            error!(
                target: "waymark",
                event = "restore_media_write_failed",
                path_hash = %hash_path(Path::new(path.as_str())),
                written = written.len(),
                error = %detail
            );
            compensate(media, &written);
            return Err(ArchiveError::new(
                ErrorCode::MediaWriteFailed,
                format!("Failed to write media file {path}"),
            )
            .with_context("detail", detail));
        }
        written.push(path.clone());
    }
    info!(target: "waymark", event = "restore_media_written", files = written.len());
    Ok(written)
}

fn write_one<M, P>(media: &M, path: &RelativePath, payload: &P) -> Result<(), String>
where
    M: MediaStore,
    P: MediaPayload + ?Sized,
{
    let bytes = payload
        .media_bytes(path)
        .ok_or_else(|| "archive payload is missing the file".to_string())?;
    if let Some(parent) = path.parent() {
        media.create_dir_all(&parent).map_err(|e| e.to_string())?;
    }
    media.write(path, bytes).map_err(|e| e.to_string())
}

/// Delete every file this restore wrote. Failures are logged and skipped.
fn compensate<M: MediaStore>(media: &M, written: &[RelativePath]) {
    let mut failed = 0usize;
    for path in written {
        if let Err(err) = media.delete(path) {
            failed += 1;
            warn!(
                target: "waymark",
                event = "restore_compensation_delete_failed",
                path_hash = %hash_path(Path::new(path.as_str())),
                error = %err
            );
        }
    }
    warn!(
        target: "waymark",
        event = "restore_compensated",
        deleted = written.len() - failed,
        failed
    );
}

fn media_error(path: &RelativePath, err: MediaStoreError) -> ArchiveError {
    match err {
        MediaStoreError::OutsideRoot | MediaStoreError::SymlinkDenied => ArchiveError::new(
            ErrorCode::InvalidMediaPath,
            format!("Media path {path} cannot be used under the upload root"),
        ),
        other => ArchiveError::internal(&other),
    }
}

fn unreferenced_message(paths: &[RelativePath]) -> String {
    let listed: Vec<&str> = paths.iter().map(RelativePath::as_str).collect();
    format!("Archive contains unreferenced media: {}", listed.join(", "))
}
