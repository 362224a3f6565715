pub mod api;
pub mod config;
pub mod dedup;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod model;
pub mod notify;
pub mod progress;
pub mod retention;
pub mod store;
pub mod sync;
pub mod worker;

// Re-export main types for convenience
pub use api::ApiState;
pub use config::Config;
pub use episode::{CoverSource, Id3TagWriter, TagWriter, TrackTags};
pub use error::{
    ArtworkError, ConfigError, DownloadError, FeedError, FinalizeError, PipelineError,
    PodcastSyncFailure, StoreError, SyncError, TagError,
};
pub use feed::{Enclosure, FeedEntry, FeedSource, HttpFeedSource};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use model::{Episode, EpisodeStatus, NewEpisode, Podcast, StatusCounts};
pub use notify::{CycleNotifier, WebhookNotifier};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use retention::RetentionPolicy;
pub use store::{EpisodeStore, SqliteStore};
pub use sync::{CycleSummary, Syncer};
pub use worker::{CycleTrigger, CycleWorker, TriggerOutcome};
