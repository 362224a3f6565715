// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Age and count based retention
//!
//! For a podcast keeping at most `N` episodes no older than `A`:
//!
//! - episodes are ordered by publication time (ties by id) and the most
//!   recent `N` form the *tail*
//! - pending episodes in the tail that are younger than `A` are downloaded,
//!   oldest first
//! - downloaded episodes older than `A`, or outside the tail, are expired

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::error::ConfigError;
use crate::model::{Episode, EpisodeStatus, Podcast};

/// Parsed retention window of one podcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_episodes: usize,
}

impl RetentionPolicy {
    /// Parse the podcast's retention settings
    ///
    /// An unparseable age or a cap of zero is a configuration error, never a
    /// fallback to an unbounded window.
    pub fn for_podcast(podcast: &Podcast) -> Result<Self, ConfigError> {
        let parsed = humantime::parse_duration(podcast.max_age.trim()).map_err(|e| {
            ConfigError::InvalidMaxAge {
                podcast: podcast.name.clone(),
                value: podcast.max_age.clone(),
                source: e,
            }
        })?;

        let max_age = Duration::from_std(parsed).map_err(|_| ConfigError::MaxAgeOutOfRange {
            podcast: podcast.name.clone(),
            value: podcast.max_age.clone(),
        })?;

        if podcast.max_episodes == 0 {
            return Err(ConfigError::InvalidMaxEpisodes {
                podcast: podcast.name.clone(),
                value: podcast.max_episodes,
            });
        }

        Ok(Self {
            max_age,
            max_episodes: podcast.max_episodes as usize,
        })
    }

    /// Publication time before which an episode is too old
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Sort episodes oldest first, breaking ties on the id
pub fn sort_by_published(episodes: &mut [Episode]) {
    episodes.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.episode_id.cmp(&b.episode_id))
    });
}

/// Episodes from the tail that should be downloaded
pub fn download_set(
    episodes: &[Episode],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<Episode> {
    let sorted = sorted(episodes);
    let cutoff = policy.cutoff(now);
    let tail_start = sorted.len().saturating_sub(policy.max_episodes);

    sorted[tail_start..]
        .iter()
        .filter(|e| e.status == EpisodeStatus::Pending && e.published_at > cutoff)
        .cloned()
        .collect()
}

/// Downloaded episodes that are too old or have fallen out of the tail
pub fn expiry_set(
    episodes: &[Episode],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<Episode> {
    let sorted = sorted(episodes);
    let cutoff = policy.cutoff(now);
    // Shorter than the cap: nothing is outside the tail
    let tail_start = sorted.len().saturating_sub(policy.max_episodes);

    let mut seen = HashSet::new();
    let aged = sorted
        .iter()
        .filter(|e| e.status == EpisodeStatus::Downloaded && e.published_at < cutoff);
    let evicted = sorted[..tail_start]
        .iter()
        .filter(|e| e.status == EpisodeStatus::Downloaded);

    let mut expire: Vec<Episode> = aged
        .chain(evicted)
        .filter(|e| seen.insert(e.episode_id.as_str()))
        .cloned()
        .collect();
    sort_by_published(&mut expire);
    expire
}

fn sorted(episodes: &[Episode]) -> Vec<Episode> {
    let mut sorted = episodes.to_vec();
    sort_by_published(&mut sorted);
    sorted
}
