#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use serde_json::{json, Value};
use waymark_lib::restore::{RestoreOutcome, TripLock};
use waymark_lib::service::{restore_archive, restore_archive_bytes, RestoreOptions};
use waymark_lib::store::DataStore;
use waymark_lib::ErrorCode;

use util::{archive_for, list_files, target, zip_from};

#[tokio::test]
async fn restoring_the_same_archive_twice_conflicts() {
    let archive = archive_for("twice-trip");
    assert_eq!(archive.meta.counts.media, 3);
    let target = target().await;

    let first = restore_archive_bytes(&target.ctx, &archive.bytes, &RestoreOptions::default()).await;
    assert!(first.error.is_none(), "first restore failed: {:?}", first.error);
    assert_eq!(first.status(), 200);
    let files_after_first = list_files(target.uploads.path());
    assert_eq!(files_after_first.len(), 3);

    let second = restore_archive_bytes(&target.ctx, &archive.bytes, &RestoreOptions::default()).await;
    let error = second.error.as_ref().expect("second restore must fail");
    assert_eq!(error.code, ErrorCode::Conflict);
    assert_eq!(error.message, "Trip twice-trip already exists");
    assert_eq!(second.status(), 409);
    assert!(second.data.is_none());

    assert_eq!(list_files(target.uploads.path()), files_after_first);
}

#[tokio::test]
async fn existing_media_file_blocks_restore_before_any_write() {
    let archive = archive_for("clash-trip");
    let target = target().await;
    let clash = target.uploads.path().join("entries/e1/photo-1.jpg");
    std::fs::create_dir_all(clash.parent().unwrap()).unwrap();
    std::fs::write(&clash, b"someone else's photo").unwrap();

    let err = restore_archive(&target.ctx, &archive.bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert!(err.message().contains("entries/e1/photo-1.jpg"));

    assert_eq!(list_files(target.uploads.path()), vec!["entries/e1/photo-1.jpg".to_string()]);
    assert_eq!(std::fs::read(&clash).unwrap(), b"someone else's photo");
    assert!(target.ctx.store.find_trip_by_id("clash-trip").await.unwrap().is_none());
}

#[tokio::test]
async fn restore_in_flight_for_same_trip_conflicts() {
    let archive = archive_for("locked-trip");
    let target = target().await;

    let held = TripLock::try_acquire("locked-trip").unwrap();
    let err = restore_archive(&target.ctx, &archive.bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert!(err.message().contains("already in progress"));
    drop(held);

    restore_archive(&target.ctx, &archive.bytes, &RestoreOptions::default())
        .await
        .unwrap();
}

fn documents(entries: Value) -> Vec<u8> {
    documents_with("trip-9", json!([]), entries, &[])
}

/// A two-entry trip with the given trip-level tags and media files.
fn documents_with(
    trip_id: &str,
    tags: Value,
    mut entries: Value,
    media: &[(&str, Vec<u8>)],
) -> Vec<u8> {
    if let Some(list) = entries.as_array_mut() {
        for entry in list {
            entry["tripId"] = json!(trip_id);
        }
    }
    let meta = json!({
        "schemaVersion": 1,
        "tripId": trip_id,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": "2024-08-01T00:00:00.000Z",
        "counts": {"trip": 1, "entries": 2, "media": media.len()}
    });
    let trip = json!({
        "trip": {
            "id": trip_id,
            "title": "Weekend",
            "startDate": "2024-08-01T00:00:00.000Z",
            "endDate": "2024-08-03T00:00:00.000Z",
            "ownerId": "user-1",
            "createdAt": "2024-07-01T00:00:00.000Z",
            "updatedAt": "2024-07-01T00:00:00.000Z"
        },
        "tags": tags
    });
    let mut files = vec![
        ("meta.json", serde_json::to_vec(&meta).unwrap()),
        ("trip.json", serde_json::to_vec(&trip).unwrap()),
        ("entries.json", serde_json::to_vec(&json!({ "entries": entries })).unwrap()),
    ];
    files.extend(media.iter().cloned());
    zip_from(&files)
}

fn entry(id: &str) -> Value {
    json!({
        "id": id,
        "tripId": "trip-9",
        "title": "Note",
        "text": "{}",
        "createdAt": "2024-08-01T10:00:00.000Z"
    })
}

#[tokio::test]
async fn duplicate_ids_inside_archive_warn_in_dry_run_and_conflict_live() {
    let bytes = documents(json!([entry("dup"), entry("dup")]));
    let target = target().await;

    let dry = restore_archive(
        &target.ctx,
        &bytes,
        &RestoreOptions {
            dry_run: true,
            ..RestoreOptions::default()
        },
    )
    .await
    .unwrap();
    match dry {
        RestoreOutcome::DryRun { summary, warnings } => {
            assert_eq!(summary.conflicts.entries, vec!["dup".to_string()]);
            assert_eq!(warnings, vec!["Duplicate entry IDs in archive: dup".to_string()]);
        }
        other => panic!("expected a dry run, got {other:?}"),
    }

    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.message(), "Duplicate entry IDs in archive: dup");
    assert!(target.ctx.store.find_trip_by_id("trip-9").await.unwrap().is_none());
}

#[tokio::test]
async fn entry_ids_already_in_store_conflict() {
    let target = target().await;
    restore_archive(&target.ctx, &archive_for("first-trip").bytes, &RestoreOptions::default())
        .await
        .unwrap();

    // A different trip that reuses an entry ID from the first one.
    let bytes = documents(json!([entry("e1"), entry("fresh")]));
    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.message(), "Entries already exist: e1");
    assert!(target.ctx.store.find_trip_by_id("trip-9").await.unwrap().is_none());
}

#[tokio::test]
async fn tag_ids_already_in_store_conflict() {
    let target = target().await;
    restore_archive(&target.ctx, &archive_for("tag-owner-trip").bytes, &RestoreOptions::default())
        .await
        .unwrap();
    let files_before = list_files(target.uploads.path());

    let tags = json!([{
        "id": "tag-1",
        "name": "Beach",
        "normalizedName": "beach",
        "createdAt": "2024-08-01T09:00:00.000Z"
    }]);
    let bytes = documents_with("beach-trip", tags, json!([entry("t1"), entry("t2")]), &[]);
    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.message(), "Tags already exist: tag-1");
    assert!(target.ctx.store.find_trip_by_id("beach-trip").await.unwrap().is_none());
    assert_eq!(list_files(target.uploads.path()), files_before);
}

#[tokio::test]
async fn media_ids_already_in_store_conflict() {
    let target = target().await;
    restore_archive(&target.ctx, &archive_for("media-owner-trip").bytes, &RestoreOptions::default())
        .await
        .unwrap();
    let files_before = list_files(target.uploads.path());

    let mut with_photo = entry("p1");
    with_photo["media"] = json!([{
        "id": "m1",
        "url": "/uploads/weekend/photo.jpg",
        "createdAt": "2024-08-01T11:00:00.000Z"
    }]);
    let bytes = documents_with(
        "weekend-trip",
        json!([]),
        json!([with_photo, entry("p2")]),
        &[("media/weekend/photo.jpg", b"weekend photo".to_vec())],
    );
    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.message(), "Media already exist: m1");
    assert!(target.ctx.store.find_trip_by_id("weekend-trip").await.unwrap().is_none());
    assert_eq!(list_files(target.uploads.path()), files_before);
    assert!(!target.uploads.path().join("weekend").exists());
}
