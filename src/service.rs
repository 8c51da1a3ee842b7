use tracing::{info, warn};

use crate::archive::builder::{build, BuildOptions, BuiltArchive};
use crate::archive::reader::{read_archive, DEFAULT_MAX_UNCOMPRESSED_BYTES};
use crate::archive::validator::ValidationContext;
use crate::error::{ArchiveError, ArchiveResult, Envelope, ErrorCode};
use crate::media_store::MediaStore;
use crate::restore::{restore, RestoreContext, RestoreOutcome};
use crate::store::DataStore;

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub validation: ValidationContext,
    pub max_uncompressed_bytes: u64,
    pub dry_run: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            validation: ValidationContext::default(),
            max_uncompressed_bytes: DEFAULT_MAX_UNCOMPRESSED_BYTES,
            dry_run: false,
        }
    }
}

/// Load a trip and package it with its media.
pub async fn export_trip<D, M>(
    store: &D,
    media: &M,
    trip_id: &str,
    opts: &BuildOptions,
) -> ArchiveResult<BuiltArchive>
where
    D: DataStore,
    M: MediaStore,
{
    let snapshot = store.load_trip_snapshot(trip_id).await?.ok_or_else(|| {
        warn!(target: "waymark", event = "export_trip_missing", trip_id);
        ArchiveError::new(ErrorCode::TripNotFound, format!("Trip {trip_id} not found"))
    })?;
    info!(
        target: "waymark",
        event = "export_started",
        trip_id,
        entries = snapshot.entries.len(),
        tags = snapshot.tags.len()
    );
    build(&snapshot, media, opts)
}

/// Read, validate and restore an uploaded archive.
pub async fn restore_archive<D, M>(
    ctx: &RestoreContext<D, M>,
    bytes: &[u8],
    opts: &RestoreOptions,
) -> ArchiveResult<RestoreOutcome>
where
    D: DataStore,
    M: MediaStore,
{
    let contents = read_archive(bytes, opts.max_uncompressed_bytes)?;
    let validated = contents.validate(&opts.validation)?;
    restore(
        ctx,
        &validated.data,
        &validated.summary,
        &contents,
        opts.dry_run,
    )
    .await
}

/// [`restore_archive`] wrapped in the caller-facing envelope.
pub async fn restore_archive_bytes<D, M>(
    ctx: &RestoreContext<D, M>,
    bytes: &[u8],
    opts: &RestoreOptions,
) -> Envelope<RestoreOutcome>
where
    D: DataStore,
    M: MediaStore,
{
    restore_archive(ctx, bytes, opts).await.into()
}
