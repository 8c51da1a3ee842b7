use chrono::{DateTime, Utc};

use crate::archive::validator::RestoreArchive;
use crate::store::{EntryRow, EntryTagRow, MediaRow, RestoreRows, TagRow, TripRow};
use crate::time::to_ms;

/// Map a validated archive onto the rows a restore inserts. Entries without
/// their own timestamps fall back to the entry date and then to `now`.
pub fn restore_rows(archive: &RestoreArchive, now: DateTime<Utc>) -> RestoreRows {
    let trip = &archive.trip;
    let trip_row = TripRow {
        id: trip.id.clone(),
        title: trip.title.clone(),
        description: trip.description.clone(),
        start_date: to_ms(&trip.start_date),
        end_date: to_ms(&trip.end_date),
        cover_image_url: trip.cover_image_url.clone(),
        owner_id: trip.owner_id.clone(),
        created_at: to_ms(&trip.created_at),
        updated_at: to_ms(&trip.updated_at),
    };

    let tags = archive
        .tags
        .iter()
        .map(|tag| TagRow {
            id: tag.id.clone(),
            trip_id: trip.id.clone(),
            name: tag.name.clone(),
            normalized_name: tag.normalized_name.clone(),
            created_at: to_ms(&tag.created_at),
        })
        .collect();

    let mut entries = Vec::with_capacity(archive.entries.len());
    let mut media = Vec::new();
    let mut entry_tags = Vec::new();
    for entry in &archive.entries {
        let created_at = entry.created_at.or(entry.entry_date).unwrap_or(now);
        let updated_at = entry.updated_at.unwrap_or(created_at);
        entries.push(EntryRow {
            id: entry.id.clone(),
            trip_id: entry.trip_id.clone(),
            title: entry.title.clone(),
            text: entry.text.clone(),
            entry_date: entry.entry_date.as_ref().map(to_ms),
            cover_image_url: entry.cover_image_url.clone(),
            latitude: entry.latitude,
            longitude: entry.longitude,
            location_name: entry.location_name.clone(),
            weather_condition: entry.weather_condition.clone(),
            weather_temperature: entry.weather_temperature,
            weather_icon_code: entry.weather_icon_code.clone(),
            created_at: to_ms(&created_at),
            updated_at: to_ms(&updated_at),
        });
        media.extend(entry.media.iter().map(|item| MediaRow {
            id: item.id.clone(),
            entry_id: entry.id.clone(),
            url: item.url.clone(),
            created_at: to_ms(&item.created_at),
        }));
        entry_tags.extend(entry.tags.iter().map(|tag| EntryTagRow {
            entry_id: entry.id.clone(),
            tag_id: tag.id.clone(),
        }));
    }

    RestoreRows {
        trip: trip_row,
        tags,
        entries,
        media,
        entry_tags,
    }
}
