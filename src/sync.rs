// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::dedup::admit_all;
use crate::episode::{
    CoverSource, DEFAULT_COVER_SOURCES, DownloadContext, Id3TagWriter, Pipeline, TagWriter,
    clean_partial_files, expire_episode, podcast_dir, resolve_entry,
};
use crate::error::{PodcastSyncFailure, SyncError};
use crate::feed::FeedSource;
use crate::http::HttpClient;
use crate::model::Podcast;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::retention::{RetentionPolicy, download_set, expiry_set};
use crate::store::EpisodeStore;

/// Aggregate counts of one cycle across all podcasts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Episodes newly admitted from feeds
    pub added: usize,
    /// Episodes downloaded and tagged
    pub downloaded: usize,
    /// Episodes expired by retention
    pub removed: usize,
    /// Downloads that failed and stay pending
    pub failed_downloads: usize,
    /// Podcasts skipped because of a feed, config or store error
    pub failed_podcasts: usize,
}

impl CycleSummary {
    fn absorb(&mut self, other: CycleSummary) {
        self.added += other.added;
        self.downloaded += other.downloaded;
        self.removed += other.removed;
        self.failed_downloads += other.failed_downloads;
        self.failed_podcasts += other.failed_podcasts;
    }
}

/// One async mutex per podcast name
///
/// Two cycles touching the same podcast run one after the other; different
/// podcasts do not wait on each other.
#[derive(Default)]
struct PodcastLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PodcastLocks {
    fn lock_for(&self, podcast: &str) -> Arc<tokio::sync::Mutex<()>> {
        // The map only ever grows, so a poisoned guard is still consistent
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(podcast.to_string()).or_default().clone()
    }
}

/// Runs sync cycles: ingest, download and expire for every podcast
pub struct Syncer<C> {
    store: Arc<dyn EpisodeStore>,
    feeds: Arc<dyn FeedSource>,
    client: C,
    tagger: Arc<dyn TagWriter>,
    base_dir: PathBuf,
    cover_sources: Vec<CoverSource>,
    reporter: SharedProgressReporter,
    locks: PodcastLocks,
}

impl<C: HttpClient> Syncer<C> {
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        feeds: Arc<dyn FeedSource>,
        client: C,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            feeds,
            client,
            tagger: Arc::new(Id3TagWriter),
            base_dir: base_dir.into(),
            cover_sources: DEFAULT_COVER_SOURCES.to_vec(),
            reporter: NoopReporter::shared(),
            locks: PodcastLocks::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn TagWriter>) -> Self {
        self.tagger = tagger;
        self
    }

    /// Replace the order in which cover images are looked up
    pub fn with_cover_sources(mut self, sources: Vec<CoverSource>) -> Self {
        self.cover_sources = sources;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Run one cycle over all podcasts
    pub async fn run_cycle(&self) -> CycleSummary {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with `now` as the reference time for retention
    ///
    /// Errors are contained per podcast and counted; the cycle itself always
    /// produces a summary.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let podcasts = self.store.list_podcasts().unwrap_or_else(|e| {
            error!(error = %e, "Failed to list podcasts");
            Vec::new()
        });

        for podcast in &podcasts {
            match self.sync_podcast(podcast, now).await {
                Ok(outcome) => summary.absorb(outcome),
                Err(failure) => {
                    match &failure.source {
                        SyncError::Feed(e) if e.is_fetch_error() => {
                            warn!(
                                podcast = %podcast.name,
                                error = %e,
                                "Feed unreachable, retrying next cycle"
                            );
                        }
                        e => {
                            error!(podcast = %podcast.name, error = %e, "Podcast sync stopped");
                        }
                    }
                    self.reporter.report(ProgressEvent::PodcastFailed {
                        podcast: podcast.name.clone(),
                        error: failure.source.to_string(),
                    });
                    summary.absorb(failure.completed);
                    summary.failed_podcasts += 1;
                }
            }
        }

        info!(
            "Added: {}, Downloaded: {}, Removed: {}",
            summary.added, summary.downloaded, summary.removed
        );
        self.reporter.report(ProgressEvent::CycleCompleted {
            added: summary.added,
            downloaded: summary.downloaded,
            removed: summary.removed,
            failed_downloads: summary.failed_downloads,
            failed_podcasts: summary.failed_podcasts,
        });

        summary
    }

    /// Ingest, download and expire one podcast while holding its lock
    ///
    /// On error the counts of the steps that did finish are returned with it.
    pub async fn sync_podcast(
        &self,
        podcast: &Podcast,
        now: DateTime<Utc>,
    ) -> Result<CycleSummary, PodcastSyncFailure> {
        let lock = self.locks.lock_for(&podcast.name);
        let _guard = lock.lock().await;

        let mut outcome = CycleSummary::default();
        match self.sync_locked(podcast, now, &mut outcome).await {
            Ok(()) => {
                debug!(
                    podcast = %podcast.name,
                    added = outcome.added,
                    downloaded = outcome.downloaded,
                    removed = outcome.removed,
                    "Podcast synced"
                );
                Ok(outcome)
            }
            Err(source) => Err(PodcastSyncFailure {
                completed: outcome,
                source,
            }),
        }
    }

    async fn sync_locked(
        &self,
        podcast: &Podcast,
        now: DateTime<Utc>,
        outcome: &mut CycleSummary,
    ) -> Result<(), SyncError> {
        let policy = RetentionPolicy::for_podcast(podcast)?;

        let cleaned = clean_partial_files(&podcast_dir(&self.base_dir, &podcast.name));
        if cleaned > 0 {
            debug!(podcast = %podcast.name, cleaned, "Removed stale partial downloads");
        }

        // Ingest
        self.reporter.report(ProgressEvent::FetchingFeed {
            podcast: podcast.name.clone(),
            url: podcast.feed_url.clone(),
        });
        let entries = self.feeds.fetch(&podcast.feed_url).await?;
        let candidates = entries.iter().filter_map(|entry| match resolve_entry(entry, podcast) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(
                    podcast = %podcast.name,
                    entry_id = %entry.id,
                    error = %e,
                    "Skipping feed entry"
                );
                None
            }
        });
        outcome.added = admit_all(self.store.as_ref(), candidates)?;
        self.reporter.report(ProgressEvent::FeedParsed {
            podcast: podcast.name.clone(),
            total_entries: entries.len(),
            added: outcome.added,
        });

        // Downloads
        let episodes = self.store.list_episodes_for_podcast(&podcast.name)?;
        let to_download = download_set(&episodes, &policy, now);
        let pipeline = Pipeline {
            client: &self.client,
            store: self.store.as_ref(),
            tagger: self.tagger.as_ref(),
            base_dir: &self.base_dir,
            cover_sources: &self.cover_sources,
            reporter: &self.reporter,
        };

        let total_to_download = to_download.len();
        for (episode_index, episode) in to_download.iter().enumerate() {
            let context = DownloadContext {
                episode_index,
                total_to_download,
            };
            match pipeline.download_and_tag(podcast, episode, &context, now).await {
                Ok(_) => outcome.downloaded += 1,
                Err(e) => {
                    warn!(
                        podcast = %podcast.name,
                        episode_id = %episode.episode_id,
                        error = %e,
                        "Download failed"
                    );
                    self.reporter.report(ProgressEvent::DownloadFailed {
                        episode_title: episode.title.clone(),
                        error: e.to_string(),
                    });
                    outcome.failed_downloads += 1;
                }
            }
        }

        // Expiries, against the state the downloads left behind
        let episodes = self.store.list_episodes_for_podcast(&podcast.name)?;
        for episode in expiry_set(&episodes, &policy, now) {
            match expire_episode(self.store.as_ref(), &episode).await {
                Ok(true) => {
                    outcome.removed += 1;
                    self.reporter.report(ProgressEvent::EpisodeExpired {
                        episode_title: episode.title.clone(),
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        podcast = %podcast.name,
                        episode_id = %episode.episode_id,
                        error = %e,
                        "Failed to expire episode"
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FeedError, StoreError};
    use crate::feed::{Enclosure, FeedEntry};
    use crate::http::{ByteStream, HttpBytes, HttpResponse};
    use crate::model::{Episode, EpisodeStatus, StatusCounts};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    const FEED_URL: &str = "https://example.com/show.xml";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn audio_url(id: &str) -> String {
        format!("https://cdn.example.com/{id}.mp3")
    }

    fn entry(id: &str, published: DateTime<Utc>) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            title: format!("Episode {id}"),
            author: None,
            published: Some(published.to_rfc2822()),
            enclosures: vec![Enclosure {
                url: audio_url(id),
                mime_type: Some("audio/mpeg".to_string()),
            }],
            image: None,
        }
    }

    fn entry_days_ago(id: &str, days: i64) -> FeedEntry {
        entry(id, now() - Duration::days(days))
    }

    #[derive(Default)]
    struct MockFeeds {
        feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
    }

    impl MockFeeds {
        fn set(&self, url: &str, entries: Vec<FeedEntry>) {
            self.feeds.lock().unwrap().insert(url.to_string(), entries);
        }
    }

    #[async_trait]
    impl FeedSource for MockFeeds {
        async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
            self.feeds
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| FeedError::HttpStatus {
                    url: url.to_string(),
                    status: 503,
                })
        }
    }

    /// Serves a small audio body for every URL except those marked as failing,
    /// which break off mid-transfer
    #[derive(Clone, Default)]
    struct MockHttpClient {
        failing: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<HttpBytes, reqwest::Error> {
            Ok(HttpBytes {
                status: 404,
                body: Bytes::new(),
            })
        }

        async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            let fails = self.failing.lock().unwrap().contains(url);
            let items: Vec<Result<Bytes, std::io::Error>> = if fails {
                vec![
                    Ok(Bytes::from_static(b"first half")),
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    )),
                ]
            } else {
                vec![Ok(Bytes::from_static(b"fake audio data"))]
            };
            let body: ByteStream = Box::pin(futures::stream::iter(items));
            Ok(HttpResponse {
                status: 200,
                content_length: None,
                body,
            })
        }
    }

    struct Harness {
        dir: TempDir,
        store: Arc<SqliteStore>,
        feeds: Arc<MockFeeds>,
        client: MockHttpClient,
        syncer: Syncer<MockHttpClient>,
    }

    fn show(max_age: &str, max_episodes: u32) -> Podcast {
        Podcast {
            name: "Show".to_string(),
            feed_url: FEED_URL.to_string(),
            image_override: None,
            max_age: max_age.to_string(),
            max_episodes,
        }
    }

    fn harness(podcasts: &[Podcast]) -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for podcast in podcasts {
            store.upsert_podcast(podcast).unwrap();
        }
        let feeds = Arc::new(MockFeeds::default());
        let client = MockHttpClient::default();
        let syncer = Syncer::new(store.clone(), feeds.clone(), client.clone(), dir.path());
        Harness {
            dir,
            store,
            feeds,
            client,
            syncer,
        }
    }

    fn with_status(store: &SqliteStore, podcast: &str, status: EpisodeStatus) -> Vec<Episode> {
        store
            .list_episodes_for_podcast(podcast)
            .unwrap()
            .into_iter()
            .filter(|e| e.status == status)
            .collect()
    }

    fn ids(episodes: &[Episode]) -> Vec<&str> {
        episodes.iter().map(|e| e.episode_id.as_str()).collect()
    }

    fn episode_file(h: &Harness, id: &str) -> PathBuf {
        h.dir.path().join("Show").join(format!("Episode {id}.mp3"))
    }

    /// Cap and age hold for every podcast after a cycle at `at`
    fn assert_retention_holds(h: &Harness, at: DateTime<Utc>) {
        for podcast in h.store.list_podcasts().unwrap() {
            let Ok(policy) = RetentionPolicy::for_podcast(&podcast) else {
                continue;
            };
            let downloaded = with_status(&h.store, &podcast.name, EpisodeStatus::Downloaded);
            assert!(downloaded.len() <= policy.max_episodes);
            for episode in &downloaded {
                assert!(episode.published_at >= policy.cutoff(at));
                assert!(episode.local_path.as_ref().is_some_and(|p| p.exists()));
            }
        }
    }

    fn five_entries() -> Vec<FeedEntry> {
        // Feed order, newest first
        vec![
            entry_days_ago("d1", 1),
            entry_days_ago("d3", 3),
            entry_days_ago("d5", 5),
            entry_days_ago("d8", 8),
            entry_days_ago("d10", 10),
        ]
    }

    #[tokio::test]
    async fn first_cycle_downloads_recent_tail() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());

        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(
            summary,
            CycleSummary {
                added: 5,
                downloaded: 3,
                removed: 0,
                failed_downloads: 0,
                failed_podcasts: 0,
            }
        );
        let downloaded = with_status(&h.store, "Show", EpisodeStatus::Downloaded);
        assert_eq!(ids(&downloaded), vec!["d5", "d3", "d1"]);
        let pending = with_status(&h.store, "Show", EpisodeStatus::Pending);
        assert_eq!(ids(&pending), vec!["d10", "d8"]);
        for id in ["d5", "d3", "d1"] {
            assert!(episode_file(&h, id).exists());
        }
        assert_retention_holds(&h, now());
    }

    #[tokio::test]
    async fn second_identical_cycle_adds_nothing() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());

        h.syncer.run_cycle_at(now()).await;
        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(summary, CycleSummary::default());
        // Entries outside the tail stay pending for good
        let pending = with_status(&h.store, "Show", EpisodeStatus::Pending);
        assert_eq!(ids(&pending), vec!["d10", "d8"]);
    }

    #[tokio::test]
    async fn aged_downloads_are_all_removed() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());
        h.syncer.run_cycle_at(now()).await;

        let later = now() + Duration::days(8);
        let summary = h.syncer.run_cycle_at(later).await;

        assert_eq!(summary.removed, 3);
        assert_eq!(summary.downloaded, 0);
        let removed = with_status(&h.store, "Show", EpisodeStatus::Removed);
        assert_eq!(ids(&removed), vec!["d5", "d3", "d1"]);
        for episode in &removed {
            assert_eq!(episode.local_path, None);
        }
        for id in ["d5", "d3", "d1"] {
            assert!(!episode_file(&h, id).exists());
        }
        assert_retention_holds(&h, later);
    }

    #[tokio::test]
    async fn newer_episode_evicts_oldest_by_count() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());
        h.syncer.run_cycle_at(now()).await;

        let mut entries = five_entries();
        entries.insert(0, entry("fresh", now()));
        h.feeds.set(FEED_URL, entries);
        let later = now() + Duration::hours(1);
        let summary = h.syncer.run_cycle_at(later).await;

        assert_eq!(summary.added, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.removed, 1);
        let downloaded = with_status(&h.store, "Show", EpisodeStatus::Downloaded);
        assert_eq!(ids(&downloaded), vec!["d3", "d1", "fresh"]);
        let removed = with_status(&h.store, "Show", EpisodeStatus::Removed);
        assert_eq!(ids(&removed), vec!["d5"]);
        assert!(!episode_file(&h, "d5").exists());
        assert_retention_holds(&h, later);
    }

    #[tokio::test]
    async fn interrupted_download_is_retried_next_cycle() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());
        h.client.failing.lock().unwrap().insert(audio_url("d3"));

        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed_downloads, 1);
        assert_eq!(
            h.store.find_episode("d3").unwrap().unwrap().status,
            EpisodeStatus::Pending
        );
        assert!(!episode_file(&h, "d3").exists());

        h.client.failing.lock().unwrap().clear();
        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed_downloads, 0);
        assert!(episode_file(&h, "d3").exists());
        assert_retention_holds(&h, now());
    }

    #[tokio::test]
    async fn removed_episode_reappearing_in_feed_stays_removed() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());
        h.syncer.run_cycle_at(now()).await;
        let later = now() + Duration::days(8);
        h.syncer.run_cycle_at(later).await;

        let summary = h.syncer.run_cycle_at(later).await;

        assert_eq!(summary, CycleSummary::default());
        assert_eq!(with_status(&h.store, "Show", EpisodeStatus::Removed).len(), 3);
    }

    #[tokio::test]
    async fn failing_feed_does_not_stop_other_podcasts() {
        let broken = Podcast {
            name: "Broken".to_string(),
            feed_url: "https://example.com/down.xml".to_string(),
            ..show("7d", 3)
        };
        let h = harness(&[broken, show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());

        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(summary.failed_podcasts, 1);
        assert_eq!(summary.added, 5);
        assert_eq!(summary.downloaded, 3);
    }

    #[tokio::test]
    async fn invalid_max_age_skips_the_podcast() {
        let h = harness(&[show("whenever", 3)]);
        h.feeds.set(FEED_URL, five_entries());

        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(summary.failed_podcasts, 1);
        assert_eq!(summary.added, 0);
        assert!(h.store.list_episodes_for_podcast("Show").unwrap().is_empty());
    }

    #[tokio::test]
    async fn undated_entries_are_skipped() {
        let h = harness(&[show("7d", 3)]);
        let mut undated = entry_days_ago("undated", 1);
        undated.published = None;
        let mut garbled = entry_days_ago("garbled", 1);
        garbled.published = Some("last tuesday".to_string());
        h.feeds
            .set(FEED_URL, vec![undated, garbled, entry_days_ago("ok", 2)]);

        let summary = h.syncer.run_cycle_at(now()).await;

        assert_eq!(summary.added, 1);
        assert_eq!(summary.failed_podcasts, 0);
    }

    #[tokio::test]
    async fn concurrent_cycles_do_not_double_process() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, five_entries());

        let (a, b) = tokio::join!(h.syncer.run_cycle_at(now()), h.syncer.run_cycle_at(now()));

        assert_eq!(a.added + b.added, 5);
        assert_eq!(a.downloaded + b.downloaded, 3);
        assert_eq!(a.failed_downloads + b.failed_downloads, 0);
        assert_retention_holds(&h, now());
    }

    #[tokio::test]
    async fn stale_partial_files_are_cleaned() {
        let h = harness(&[show("7d", 3)]);
        h.feeds.set(FEED_URL, Vec::new());
        let dir = h.dir.path().join("Show");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Episode x.mp3.partial"), b"half").unwrap();

        h.syncer.run_cycle_at(now()).await;

        assert!(!dir.join("Episode x.mp3.partial").exists());
    }

    /// Admits episodes but cannot read them back
    struct UnlistableStore(SqliteStore);

    impl EpisodeStore for UnlistableStore {
        fn list_podcasts(&self) -> Result<Vec<Podcast>, StoreError> {
            self.0.list_podcasts()
        }

        fn upsert_podcast(&self, podcast: &Podcast) -> Result<(), StoreError> {
            self.0.upsert_podcast(podcast)
        }

        fn deactivate_podcasts_except(&self, keep: &[&str]) -> Result<Vec<String>, StoreError> {
            self.0.deactivate_podcasts_except(keep)
        }

        fn find_episode(&self, episode_id: &str) -> Result<Option<Episode>, StoreError> {
            self.0.find_episode(episode_id)
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

        fn list_episodes_for_podcast(&self, _podcast: &str) -> Result<Vec<Episode>, StoreError> {
            Err(StoreError::LockPoisoned)
        }

        fn status_counts(&self, podcast: &str) -> Result<StatusCounts, StoreError> {
            self.0.status_counts(podcast)
        }
    }

    #[tokio::test]
    async fn store_failure_keeps_counts_already_earned() {
        let dir = tempdir().unwrap();
        let store = Arc::new(UnlistableStore(SqliteStore::open_in_memory().unwrap()));
        store.upsert_podcast(&show("7d", 3)).unwrap();
        let feeds = Arc::new(MockFeeds::default());
        feeds.set(FEED_URL, five_entries());
        let syncer = Syncer::new(store.clone(), feeds, MockHttpClient::default(), dir.path());

        let summary = syncer.run_cycle_at(now()).await;

        assert_eq!(summary.added, 5);
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.failed_podcasts, 1);

        let failure = syncer.sync_podcast(&show("7d", 3), now()).await.unwrap_err();
        assert_eq!(failure.completed, CycleSummary::default());
        assert!(matches!(
            failure.source,
            SyncError::Store(StoreError::LockPoisoned)
        ));
    }
}
