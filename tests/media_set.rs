#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use waymark_lib::archive::read_archive;
use waymark_lib::archive::reader::DEFAULT_MAX_UNCOMPRESSED_BYTES;
use waymark_lib::restore::RestoreOutcome;
use waymark_lib::service::{restore_archive, RestoreOptions};
use waymark_lib::ErrorCode;

use util::{archive_for, list_files, media_bytes, target, zip_from, ENTRY_COVER};

/// Re-pack an exported archive with its file set edited.
fn repack(trip_id: &str, edit: impl FnOnce(&mut Vec<(String, Vec<u8>)>)) -> Vec<u8> {
    let built = archive_for(trip_id);
    let contents = read_archive(&built.bytes, DEFAULT_MAX_UNCOMPRESSED_BYTES).unwrap();
    let mut files: Vec<(String, Vec<u8>)> = vec![
        ("meta.json".into(), contents.meta.unwrap().into_bytes()),
        ("trip.json".into(), contents.trip.unwrap().into_bytes()),
        ("entries.json".into(), contents.entries.unwrap().into_bytes()),
    ];
    files.extend(
        contents
            .media
            .into_iter()
            .map(|(path, body)| (path.archive_entry_name(), body)),
    );
    edit(&mut files);
    let borrowed: Vec<(&str, Vec<u8>)> = files
        .iter()
        .map(|(name, body)| (name.as_str(), body.clone()))
        .collect();
    zip_from(&borrowed)
}

#[tokio::test]
async fn missing_referenced_file_names_every_gap() {
    let bytes = repack("missing-trip", |files| {
        files.retain(|(name, _)| {
            name != "media/entries/e1/photo-1.jpg" && name != "media/trips/trip-1/cover.jpg"
        })
    });
    let target = target().await;

    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingMedia);
    assert!(err.message().contains("entries/e1/photo-1.jpg"), "{}", err.message());
    assert!(err.message().contains("trips/trip-1/cover.jpg"), "{}", err.message());
    assert!(list_files(target.uploads.path()).is_empty());
}

#[tokio::test]
async fn declared_media_without_any_file_is_missing_media() {
    let bytes = repack("no-media-trip", |files| {
        files.retain(|(name, _)| !name.starts_with("media/"))
    });
    let target = target().await;
    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingMedia);
}

#[tokio::test]
async fn unreferenced_file_warns_in_dry_run_and_fails_live() {
    let bytes = repack("extra-trip", |files| {
        files.push(("media/stray/readme.txt".into(), b"not referenced".to_vec()))
    });
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
            assert_eq!(summary.unexpected_media, vec!["stray/readme.txt".to_string()]);
            assert_eq!(
                warnings,
                vec!["Archive contains unreferenced media: stray/readme.txt".to_string()]
            );
        }
        other => panic!("expected a dry run, got {other:?}"),
    }

    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnreferencedMedia);
    assert_eq!(err.code().http_status(), 409);
    assert!(list_files(target.uploads.path()).is_empty());
}

#[tokio::test]
async fn non_canonical_media_names_restore_under_their_normalized_paths() {
    let bytes = repack("dotted-trip", |files| {
        for (name, _) in files.iter_mut() {
            let renamed = name.strip_prefix("media/").map(|rest| format!("media/./{rest}"));
            if let Some(renamed) = renamed {
                *name = renamed;
            }
        }
    });
    let target = target().await;

    let outcome = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
    assert_eq!(
        list_files(target.uploads.path()),
        vec![
            "entries/e1/cover.jpg".to_string(),
            "entries/e1/photo-1.jpg".to_string(),
            "trips/trip-1/cover.jpg".to_string(),
        ]
    );
    let cover = std::fs::read(target.uploads.path().join("entries/e1/cover.jpg")).unwrap();
    assert_eq!(cover, media_bytes(ENTRY_COVER));
}

#[tokio::test]
async fn two_names_for_one_media_path_are_rejected_before_any_write() {
    let bytes = repack("aliased-trip", |files| {
        files.push(("media/entries//e1/cover.jpg".into(), b"other bytes".to_vec()))
    });
    let target = target().await;

    let err = restore_archive(&target.ctx, &bytes, &RestoreOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMediaPath);
    assert_eq!(err.code().http_status(), 400);
    assert!(list_files(target.uploads.path()).is_empty());
}
