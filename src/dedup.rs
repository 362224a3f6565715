use tracing::debug;

use crate::error::StoreError;
use crate::model::NewEpisode;
use crate::store::EpisodeStore;

/// What happened to a candidate at the dedup gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Inserted,
    AlreadyKnown,
}

/// Insert `candidate` as a pending episode unless its id is already stored
///
/// A lost insert race surfaces as [`StoreError::DuplicateKey`] from the store
/// and is reported as [`Admission::AlreadyKnown`]. Episodes in any status,
/// including `Removed`, count as known.
pub fn admit(store: &dyn EpisodeStore, candidate: NewEpisode) -> Result<Admission, StoreError> {
    if store.find_episode(&candidate.episode_id)?.is_some() {
        return Ok(Admission::AlreadyKnown);
    }

    let episode = candidate.into_pending();
    match store.insert_episode(&episode) {
        Ok(()) => {
            debug!(podcast = %episode.podcast, episode_id = %episode.episode_id, "New episode");
            Ok(Admission::Inserted)
        }
        Err(StoreError::DuplicateKey(_)) => Ok(Admission::AlreadyKnown),
        Err(e) => Err(e),
    }
}

/// Run every candidate through [`admit`], returning how many were inserted
pub fn admit_all<I>(store: &dyn EpisodeStore, candidates: I) -> Result<usize, StoreError>
where
    I: IntoIterator<Item = NewEpisode>,
{
    let mut added = 0;
    for candidate in candidates {
        if admit(store, candidate)? == Admission::Inserted {
            added += 1;
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Episode, EpisodeStatus, Podcast, StatusCounts};
    use crate::store::SqliteStore;
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str) -> NewEpisode {
        NewEpisode {
            episode_id: id.to_string(),
            podcast: "show".to_string(),
            title: format!("Episode {id}"),
            author: "Host".to_string(),
            link: format!("https://example.com/{id}.mp3"),
            image: None,
            published_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn second_pass_adds_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let feed = || vec![candidate("a"), candidate("b"), candidate("c")];

        assert_eq!(admit_all(&store, feed()).unwrap(), 3);
        assert_eq!(admit_all(&store, feed()).unwrap(), 0);
        assert_eq!(store.list_episodes_for_podcast("show").unwrap().len(), 3);
    }

    #[test]
    fn duplicates_within_one_feed_are_admitted_once() {
        let store = SqliteStore::open_in_memory().unwrap();

        let added = admit_all(&store, vec![candidate("a"), candidate("a")]).unwrap();
        assert_eq!(added, 1);
    }

    #[test]
    fn removed_episode_is_not_recreated() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut removed = candidate("gone").into_pending();
        removed.status = EpisodeStatus::Removed;
        store.insert_episode(&removed).unwrap();

        assert_eq!(admit(&store, candidate("gone")).unwrap(), Admission::AlreadyKnown);
        assert_eq!(
            store.find_episode("gone").unwrap().unwrap().status,
            EpisodeStatus::Removed
        );
    }

    /// Store whose lookup always misses, like a concurrent writer winning the race
    struct RacingStore(SqliteStore);

    impl EpisodeStore for RacingStore {
        fn list_podcasts(&self) -> Result<Vec<Podcast>, StoreError> {
            self.0.list_podcasts()
        }

        fn upsert_podcast(&self, podcast: &Podcast) -> Result<(), StoreError> {
            self.0.upsert_podcast(podcast)
        }

        fn deactivate_podcasts_except(&self, keep: &[&str]) -> Result<Vec<String>, StoreError> {
            self.0.deactivate_podcasts_except(keep)
        }

        fn find_episode(&self, _episode_id: &str) -> Result<Option<Episode>, StoreError> {
            Ok(None)
        }

        fn insert_episode(&self, episode: &Episode) -> Result<(), StoreError> {
            self.0.insert_episode(episode)
        }

        fn update_episode(
            &self,
            episode: &Episode,
            expected: EpisodeStatus,
        ) -> Result<(), StoreError> {
            self.0.update_episode(episode, expected)
        }

        fn list_episodes_for_podcast(&self, podcast: &str) -> Result<Vec<Episode>, StoreError> {
            self.0.list_episodes_for_podcast(podcast)
        }

        fn status_counts(&self, podcast: &str) -> Result<StatusCounts, StoreError> {
            self.0.status_counts(podcast)
        }
    }

    #[test]
    fn lost_insert_race_counts_as_known() {
        let store = RacingStore(SqliteStore::open_in_memory().unwrap());

        assert_eq!(admit(&store, candidate("a")).unwrap(), Admission::Inserted);
        assert_eq!(admit(&store, candidate("a")).unwrap(), Admission::AlreadyKnown);
    }
}
