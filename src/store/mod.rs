//! Relational persistence for trips. The restore orchestrator and the export
//! service only talk to the [`DataStore`] trait; [`SqliteTripStore`] is the
//! `sqlx` implementation.

mod sqlite;

pub use sqlite::SqliteTripStore;

use thiserror::Error;

use crate::archive::schema::TripSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored row in {table} is unreadable: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: i64,
    pub end_date: i64,
    pub cover_image_url: Option<String>,
    pub owner_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagRow {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    pub normalized_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryRow {
    pub id: String,
    pub trip_id: String,
    pub title: String,
    pub text: String,
    pub entry_date: Option<i64>,
    pub cover_image_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub weather_condition: Option<String>,
    pub weather_temperature: Option<f64>,
    pub weather_icon_code: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRow {
    pub id: String,
    pub entry_id: String,
    pub url: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTagRow {
    pub entry_id: String,
    pub tag_id: String,
}

/// Every row a restore inserts, written in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRows {
    pub trip: TripRow,
    pub tags: Vec<TagRow>,
    pub entries: Vec<EntryRow>,
    pub media: Vec<MediaRow>,
    pub entry_tags: Vec<EntryTagRow>,
}

/// Lookups answer with the subset of the requested IDs that already exist.
#[allow(async_fn_in_trait)]
pub trait DataStore {
    async fn find_trip_by_id(&self, id: &str) -> Result<Option<String>, StoreError>;
    async fn find_entries_by_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;
    async fn find_tags_by_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;
    async fn find_media_by_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;
    /// Insert all rows atomically; nothing is visible unless everything is.
    async fn insert_archive(&self, rows: &RestoreRows) -> Result<(), StoreError>;
    async fn load_trip_snapshot(&self, trip_id: &str) -> Result<Option<TripSnapshot>, StoreError>;
}
