// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::FeedError;
use crate::feed::FeedEntry;
use crate::model::{NewEpisode, Podcast};

/// Formats that carry an explicit offset
const ZONED_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Formats without an offset, taken as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
];

/// Turn a feed entry into an episode candidate for `podcast`
///
/// Returns `Ok(None)` when the entry has no audio enclosure, since there is
/// nothing to download. A missing or unreadable date is an error for the
/// entry only.
pub fn resolve_entry(
    entry: &FeedEntry,
    podcast: &Podcast,
) -> Result<Option<NewEpisode>, FeedError> {
    let Some(audio) = entry.enclosures.iter().find(|e| e.is_audio()) else {
        return Ok(None);
    };

    let published = entry
        .published
        .as_deref()
        .ok_or_else(|| FeedError::MissingDate {
            entry_id: entry.id.clone(),
        })?;
    let published_at = normalize_timestamp(published)?;

    Ok(Some(NewEpisode {
        episode_id: entry.id.clone(),
        podcast: podcast.name.clone(),
        title: entry.title.clone(),
        author: entry
            .author
            .clone()
            .unwrap_or_else(|| podcast.name.clone()),
        link: audio.url.clone(),
        image: entry.image.clone(),
        published_at,
    }))
}

/// Parse a feed timestamp into UTC
///
/// Values with an offset are converted; values without one are UTC already.
pub fn normalize_timestamp(date_str: &str) -> Result<DateTime<Utc>, FeedError> {
    let trimmed = date_str.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc());
    }

    Err(FeedError::InvalidDate {
        date_str: date_str.to_string(),
        reason: "no known date format matched".to_string(),
    })
}
