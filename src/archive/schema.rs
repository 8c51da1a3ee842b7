//! Document shapes stored inside a trip archive.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Archive layout version understood by this build. Restore requires an
/// exact match.
pub const SCHEMA_VERSION: u32 = 1;

pub const META_FILE: &str = "meta.json";
pub const TRIP_FILE: &str = "trip.json";
pub const ENTRIES_FILE: &str = "entries.json";
pub const MEDIA_DIR_PREFIX: &str = "media/";

pub const REQUIRED_FILES: [&str; 3] = [META_FILE, TRIP_FILE, ENTRIES_FILE];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportCounts {
    pub trip: u32,
    pub entries: u64,
    pub media: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub schema_version: u32,
    pub trip_id: String,
    pub app_version: String,
    #[serde(with = "iso_millis")]
    pub exported_at: DateTime<Utc>,
    pub counts: ExportCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "iso_millis")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    pub owner_id: String,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// Canonical key used for name uniqueness within a trip.
    pub fn name_key(&self) -> String {
        normalize_tag_name(&self.normalized_name)
    }
}

pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: String,
    pub url: String,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub trip_id: String,
    pub title: String,
    /// Rich-text payload, carried through untouched.
    pub text: String,
    #[serde(default, with = "iso_millis_opt")]
    pub entry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub weather_condition: Option<String>,
    #[serde(default)]
    pub weather_temperature: Option<f64>,
    #[serde(default)]
    pub weather_icon_code: Option<String>,
    #[serde(default, with = "iso_millis_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "iso_millis_opt")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `trip.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripDocument {
    pub trip: Trip,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// `entries.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntriesDocument {
    pub entries: Vec<Entry>,
}

/// Everything the builder needs about one trip, as read from the live store.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSnapshot {
    pub trip: Trip,
    pub tags: Vec<Tag>,
    /// Entries with their `tags` and `media` already resolved.
    pub entries: Vec<Entry>,
}

pub(crate) mod iso_millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod iso_millis_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => iso_millis::serialize(dt, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
