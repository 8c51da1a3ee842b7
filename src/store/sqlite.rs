use std::collections::HashMap;

use futures::FutureExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::info;

use super::{DataStore, RestoreRows, StoreError};
use crate::archive::schema::{Entry, Media, Tag, Trip, TripSnapshot};
use crate::db::run_in_tx;
use crate::time::from_ms;

const ID_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct SqliteTripStore {
    pool: SqlitePool,
}

impl SqliteTripStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn existing_ids(&self, table: &'static str, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let mut found = Vec::new();
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("SELECT id FROM {table} WHERE id IN ({placeholders}) ORDER BY id");
            let mut query = sqlx::query_scalar::<_, String>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            found.extend(query.fetch_all(&self.pool).await?);
        }
        Ok(found)
    }
}

impl DataStore for SqliteTripStore {
    async fn find_trip_by_id(&self, id: &str) -> Result<Option<String>, StoreError> {
        let found = sqlx::query_scalar::<_, String>("SELECT id FROM trips WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found)
    }

    async fn find_entries_by_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        self.existing_ids("entries", ids).await
    }

    async fn find_tags_by_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        self.existing_ids("tags", ids).await
    }

    async fn find_media_by_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        self.existing_ids("media", ids).await
    }

    async fn insert_archive(&self, rows: &RestoreRows) -> Result<(), StoreError> {
        let trip_id = rows.trip.id.clone();
        let (tags, entries, media) = (rows.tags.len(), rows.entries.len(), rows.media.len());
        let rows = rows.clone();
        run_in_tx(&self.pool, move |tx| {
            async move { insert_rows(tx, &rows).await }.boxed()
        })
        .await?;
        info!(
            target: "waymark",
            event = "archive_rows_inserted",
            trip_id = trip_id.as_str(),
            tags,
            entries,
            media
        );
        Ok(())
    }

    async fn load_trip_snapshot(&self, trip_id: &str) -> Result<Option<TripSnapshot>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT id, title, description, start_date, end_date, cover_image_url, owner_id, \
             created_at, updated_at FROM trips WHERE id = ?",
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let trip = Trip {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            start_date: ts("trips", row.try_get("start_date")?)?,
            end_date: ts("trips", row.try_get("end_date")?)?,
            cover_image_url: row.try_get("cover_image_url")?,
            owner_id: row.try_get("owner_id")?,
            created_at: ts("trips", row.try_get("created_at")?)?,
            updated_at: ts("trips", row.try_get("updated_at")?)?,
        };

        let tags = sqlx::query(
            "SELECT id, name, normalized_name, created_at FROM tags \
             WHERE trip_id = ? ORDER BY created_at, id",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(tag_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let mut media_by_entry: HashMap<String, Vec<Media>> = HashMap::new();
        for row in sqlx::query(
            "SELECT m.id, m.entry_id, m.url, m.created_at FROM media m \
             JOIN entries e ON e.id = m.entry_id \
             WHERE e.trip_id = ? ORDER BY m.created_at, m.id",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?
        {
            let entry_id: String = row.try_get("entry_id")?;
            media_by_entry.entry(entry_id).or_default().push(Media {
                id: row.try_get("id")?,
                url: row.try_get("url")?,
                created_at: ts("media", row.try_get("created_at")?)?,
            });
        }

        let mut tags_by_entry: HashMap<String, Vec<Tag>> = HashMap::new();
        for row in sqlx::query(
            "SELECT et.entry_id, t.id, t.name, t.normalized_name, t.created_at FROM entry_tags et \
             JOIN tags t ON t.id = et.tag_id \
             JOIN entries e ON e.id = et.entry_id \
             WHERE e.trip_id = ? ORDER BY t.normalized_name, t.id",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?
        {
            let entry_id: String = row.try_get("entry_id")?;
            tags_by_entry
                .entry(entry_id)
                .or_default()
                .push(tag_from_row(&row)?);
        }

        let mut entries = Vec::new();
        for row in sqlx::query(
            "SELECT id, trip_id, title, text, entry_date, cover_image_url, latitude, longitude, \
             location_name, weather_condition, weather_temperature, weather_icon_code, \
             created_at, updated_at FROM entries WHERE trip_id = ? ORDER BY created_at, id",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?
        {
            let id: String = row.try_get("id")?;
            let entry_date = match row.try_get::<Option<i64>, _>("entry_date")? {
                Some(ms) => Some(ts("entries", ms)?),
                None => None,
            };
            entries.push(Entry {
                trip_id: row.try_get("trip_id")?,
                title: row.try_get("title")?,
                text: row.try_get("text")?,
                entry_date,
                cover_image_url: row.try_get("cover_image_url")?,
                tags: tags_by_entry.remove(&id).unwrap_or_default(),
                media: media_by_entry.remove(&id).unwrap_or_default(),
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
                location_name: row.try_get("location_name")?,
                weather_condition: row.try_get("weather_condition")?,
                weather_temperature: row.try_get("weather_temperature")?,
                weather_icon_code: row.try_get("weather_icon_code")?,
                created_at: Some(ts("entries", row.try_get("created_at")?)?),
                updated_at: Some(ts("entries", row.try_get("updated_at")?)?),
                id,
            });
        }

        Ok(Some(TripSnapshot {
            trip,
            tags,
            entries,
        }))
    }
}

async fn insert_rows(tx: &mut Transaction<'static, Sqlite>, rows: &RestoreRows) -> Result<(), StoreError> {
    let conn: &mut SqliteConnection = tx;
    let trip = &rows.trip;
    sqlx::query(
        "INSERT INTO trips (id, title, description, start_date, end_date, cover_image_url, \
         owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&trip.id)
    .bind(&trip.title)
    .bind(&trip.description)
    .bind(trip.start_date)
    .bind(trip.end_date)
    .bind(&trip.cover_image_url)
    .bind(&trip.owner_id)
    .bind(trip.created_at)
    .bind(trip.updated_at)
    .execute(&mut *conn)
    .await?;

    for tag in &rows.tags {
        sqlx::query(
            "INSERT INTO tags (id, trip_id, name, normalized_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&tag.id)
        .bind(&tag.trip_id)
        .bind(&tag.name)
        .bind(&tag.normalized_name)
        .bind(tag.created_at)
        .execute(&mut *conn)
        .await?;
    }

    for entry in &rows.entries {
        sqlx::query(
            "INSERT INTO entries (id, trip_id, title, text, entry_date, cover_image_url, latitude, \
             longitude, location_name, weather_condition, weather_temperature, weather_icon_code, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.trip_id)
        .bind(&entry.title)
        .bind(&entry.text)
        .bind(entry.entry_date)
        .bind(&entry.cover_image_url)
        .bind(entry.latitude)
        .bind(entry.longitude)
        .bind(&entry.location_name)
        .bind(&entry.weather_condition)
        .bind(entry.weather_temperature)
        .bind(&entry.weather_icon_code)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *conn)
        .await?;
    }

    for media in &rows.media {
        sqlx::query("INSERT INTO media (id, entry_id, url, created_at) VALUES (?, ?, ?, ?)")
            .bind(&media.id)
            .bind(&media.entry_id)
            .bind(&media.url)
            .bind(media.created_at)
            .execute(&mut *conn)
            .await?;
    }

    for link in &rows.entry_tags {
        sqlx::query("INSERT INTO entry_tags (entry_id, tag_id) VALUES (?, ?)")
            .bind(&link.entry_id)
            .bind(&link.tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn tag_from_row(row: &SqliteRow) -> Result<Tag, StoreError> {
    Ok(Tag {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        normalized_name: row.try_get("normalized_name")?,
        created_at: ts("tags", row.try_get("created_at")?)?,
    })
}

fn ts(table: &'static str, ms: i64) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    from_ms(ms).ok_or_else(|| StoreError::Corrupt {
        table,
        detail: format!("timestamp {ms} out of range"),
    })
}
