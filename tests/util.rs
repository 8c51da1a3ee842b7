#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use waymark_lib::archive::builder::{build, BuildOptions, BuiltArchive};
use waymark_lib::archive::paths::RelativePath;
use waymark_lib::archive::schema::{Entry, Media, Tag, Trip, TripSnapshot};
use waymark_lib::db::open_memory_pool;
use waymark_lib::media_store::{FsMediaStore, MediaStore, MediaStoreError};
use waymark_lib::migrate::apply_migrations;
use waymark_lib::restore::RestoreContext;
use waymark_lib::store::SqliteTripStore;

pub const TRIP_COVER: &str = "/uploads/trips/trip-1/cover.jpg";
pub const ENTRY_COVER: &str = "/uploads/entries/e1/cover.jpg";
pub const ENTRY_PHOTO: &str = "/uploads/entries/e1/photo-1.jpg";

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

pub async fn memory_store() -> SqliteTripStore {
    let pool = open_memory_pool().await.expect("open in-memory pool");
    apply_migrations(&pool).await.expect("apply migrations");
    SqliteTripStore::new(pool)
}

/// A fresh database plus an empty upload root.
pub struct Target {
    pub uploads: TempDir,
    pub ctx: RestoreContext<SqliteTripStore, FsMediaStore>,
}

pub async fn target() -> Target {
    let uploads = TempDir::new().unwrap();
    let media = FsMediaStore::new(uploads.path());
    Target {
        ctx: RestoreContext::new(memory_store().await, media),
        uploads,
    }
}

fn tag(id: &str, name: &str, created: &str) -> Tag {
    Tag {
        id: id.into(),
        name: name.into(),
        normalized_name: name.to_lowercase(),
        created_at: ts(created),
    }
}

/// One trip, two tags, two entries and three distinct media files.
pub fn sample_snapshot() -> TripSnapshot {
    trip_snapshot("trip-1")
}

/// The sample trip under another ID. Restores hold a process-wide lock per
/// trip ID, so tests running in parallel use distinct IDs.
pub fn trip_snapshot(trip_id: &str) -> TripSnapshot {
    let mut snapshot = base_snapshot();
    snapshot.trip.id = trip_id.to_string();
    for entry in &mut snapshot.entries {
        entry.trip_id = trip_id.to_string();
    }
    snapshot
}

fn base_snapshot() -> TripSnapshot {
    let food = tag("tag-1", "Food", "2024-04-01T09:00:00.000Z");
    let hike = tag("tag-2", "Hike", "2024-04-01T09:05:00.000Z");
    TripSnapshot {
        trip: Trip {
            id: "trip-1".into(),
            title: "Dolomites".into(),
            description: Some("Hut to hut".into()),
            start_date: ts("2024-07-01T00:00:00.000Z"),
            end_date: ts("2024-07-09T00:00:00.000Z"),
            cover_image_url: Some(TRIP_COVER.into()),
            owner_id: "user-1".into(),
            created_at: ts("2024-04-01T08:00:00.000Z"),
            updated_at: ts("2024-04-02T08:00:00.000Z"),
        },
        tags: vec![food.clone(), hike.clone()],
        entries: vec![
            Entry {
                id: "e1".into(),
                trip_id: "trip-1".into(),
                title: "Seceda ridge".into(),
                text: "{\"ops\":[{\"insert\":\"Windy\\n\"}]}".into(),
                entry_date: Some(ts("2024-07-02T00:00:00.000Z")),
                cover_image_url: Some(ENTRY_COVER.into()),
                tags: vec![food.clone(), hike.clone()],
                media: vec![Media {
                    id: "m1".into(),
                    url: ENTRY_PHOTO.into(),
                    created_at: ts("2024-07-02T10:00:00.000Z"),
                }],
                latitude: Some(46.6),
                longitude: Some(11.72),
                location_name: Some("Seceda".into()),
                weather_condition: Some("Clouds".into()),
                weather_temperature: Some(14.5),
                weather_icon_code: Some("03d".into()),
                created_at: Some(ts("2024-07-02T18:00:00.000Z")),
                updated_at: Some(ts("2024-07-02T19:00:00.000Z")),
            },
            Entry {
                id: "e2".into(),
                trip_id: "trip-1".into(),
                title: "Rifugio dinner".into(),
                text: "{}".into(),
                entry_date: None,
                cover_image_url: None,
                tags: vec![food],
                media: vec![],
                latitude: None,
                longitude: None,
                location_name: None,
                weather_condition: None,
                weather_temperature: None,
                weather_icon_code: None,
                created_at: Some(ts("2024-07-03T20:00:00.000Z")),
                updated_at: Some(ts("2024-07-03T20:00:00.000Z")),
            },
        ],
    }
}

pub fn media_bytes(url: &str) -> Vec<u8> {
    format!("bytes of {url}").into_bytes()
}

/// Upload root populated with every file the sample snapshot references.
pub fn seeded_uploads() -> (TempDir, FsMediaStore) {
    let dir = TempDir::new().unwrap();
    for url in [TRIP_COVER, ENTRY_COVER, ENTRY_PHOTO] {
        let path = dir.path().join(url.trim_start_matches("/uploads/"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, media_bytes(url)).unwrap();
    }
    let store = FsMediaStore::new(dir.path());
    (dir, store)
}

pub fn sample_archive() -> BuiltArchive {
    archive_for("trip-1")
}

pub fn archive_for(trip_id: &str) -> BuiltArchive {
    let (_dir, store) = seeded_uploads();
    build(&trip_snapshot(trip_id), &store, &BuildOptions::default()).expect("build sample archive")
}

/// Hand-assemble a zip; used for archives the builder would never produce.
pub fn zip_from(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Every regular file under `root`, as sorted root-relative paths.
pub fn list_files(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path: PathBuf = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap();
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    if root.exists() {
        walk(root, root, &mut out);
    }
    out.sort();
    out
}

/// Delegates to a filesystem store but fails the write numbered `fail_on`
/// (1-based).
pub struct FailingMediaStore {
    pub inner: FsMediaStore,
    pub fail_on: usize,
    writes: AtomicUsize,
}

impl FailingMediaStore {
    pub fn new(inner: FsMediaStore, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            writes: AtomicUsize::new(0),
        }
    }
}

impl MediaStore for FailingMediaStore {
    fn exists(&self, path: &RelativePath) -> Result<bool, MediaStoreError> {
        self.inner.exists(path)
    }

    fn read(&self, path: &RelativePath) -> Result<Vec<u8>, MediaStoreError> {
        self.inner.read(path)
    }

    fn create_dir_all(&self, path: &RelativePath) -> Result<(), MediaStoreError> {
        self.inner.create_dir_all(path)
    }

    fn write(&self, path: &RelativePath, bytes: &[u8]) -> Result<(), MediaStoreError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(MediaStoreError::Io {
                operation: "write",
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.write(path, bytes)
    }

    fn delete(&self, path: &RelativePath) -> Result<(), MediaStoreError> {
        self.inner.delete(path)
    }
}
