// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::model::{Episode, EpisodeStatus, Podcast, StatusCounts};

/// Keyed storage for podcasts and their episodes
///
/// Implementations must make `insert_episode` an atomic check-and-insert on
/// `episode_id` and `update_episode` a compare-and-swap on the status.
pub trait EpisodeStore: Send + Sync {
    /// Podcasts that are currently subscribed, by name
    fn list_podcasts(&self) -> Result<Vec<Podcast>, StoreError>;

    /// Create or replace a podcast record by name and mark it subscribed
    fn upsert_podcast(&self, podcast: &Podcast) -> Result<(), StoreError>;

    /// Unsubscribe every podcast whose name is not in `keep`
    ///
    /// The records and their episodes stay in storage; they are only left
    /// out of [`EpisodeStore::list_podcasts`]. Returns the affected names.
    fn deactivate_podcasts_except(&self, keep: &[&str]) -> Result<Vec<String>, StoreError>;

    fn find_episode(&self, episode_id: &str) -> Result<Option<Episode>, StoreError>;

    /// Insert a new episode; fails with [`StoreError::DuplicateKey`] if the id exists
    fn insert_episode(&self, episode: &Episode) -> Result<(), StoreError>;

    /// Persist `episode` if the stored row still has status `expected`
    ///
    /// Fails with [`StoreError::IllegalTransition`] when `expected -> episode.status`
    /// is not a forward step, and with [`StoreError::StatusConflict`] when the
    /// stored status is no longer `expected`.
    fn update_episode(&self, episode: &Episode, expected: EpisodeStatus) -> Result<(), StoreError>;

    /// All episodes of a podcast, oldest first
    fn list_episodes_for_podcast(&self, podcast: &str) -> Result<Vec<Episode>, StoreError>;

    fn status_counts(&self, podcast: &str) -> Result<StatusCounts, StoreError>;
}

/// Validate a status change before it reaches storage
pub(crate) fn check_transition(
    episode: &Episode,
    expected: EpisodeStatus,
) -> Result<(), StoreError> {
    if episode.status == expected || expected.can_advance_to(episode.status) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            episode_id: episode.episode_id.clone(),
            from: expected,
            to: episode.status,
        })
    }
}
