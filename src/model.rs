// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A podcast subscription with its retention window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Podcast {
    /// Unique name, also used for the directory on disk
    pub name: String,
    pub feed_url: String,
    /// Cover image that takes precedence over anything from the feed
    #[serde(default, rename = "image", skip_serializing_if = "Option::is_none")]
    pub image_override: Option<String>,
    /// Retention age in humantime syntax ("7d", "12h"), parsed per cycle
    pub max_age: String,
    pub max_episodes: u32,
}

/// Lifecycle of an episode. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Pending,
    Downloaded,
    Removed,
}

impl EpisodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Downloaded => "downloaded",
            EpisodeStatus::Removed => "removed",
        }
    }

    /// Whether `self -> next` is a legal step of the lifecycle
    pub fn can_advance_to(self, next: EpisodeStatus) -> bool {
        matches!(
            (self, next),
            (EpisodeStatus::Pending, EpisodeStatus::Downloaded)
                | (EpisodeStatus::Downloaded, EpisodeStatus::Removed)
        )
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EpisodeStatus::Pending),
            "downloaded" => Ok(EpisodeStatus::Downloaded),
            "removed" => Ok(EpisodeStatus::Removed),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// An episode candidate produced from a feed entry, not yet stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpisode {
    pub episode_id: String,
    pub podcast: String,
    pub title: String,
    pub author: String,
    /// Audio enclosure URL
    pub link: String,
    pub image: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl NewEpisode {
    /// Turn the candidate into a fresh `Pending` episode
    pub fn into_pending(self) -> Episode {
        Episode {
            episode_id: self.episode_id,
            podcast: self.podcast,
            title: self.title,
            author: self.author,
            link: self.link,
            image: self.image,
            published_at: self.published_at,
            status: EpisodeStatus::Pending,
            local_path: None,
            downloaded_at: None,
        }
    }
}

/// A stored episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Feed-supplied identifier, unique across the whole store
    pub episode_id: String,
    /// Name of the owning podcast
    pub podcast: String,
    pub title: String,
    pub author: String,
    pub link: String,
    pub image: Option<String>,
    pub published_at: DateTime<Utc>,
    pub status: EpisodeStatus,
    pub local_path: Option<PathBuf>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

/// Number of episodes per status for one podcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub downloaded: usize,
    pub removed: usize,
}
