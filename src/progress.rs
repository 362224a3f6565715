use std::sync::Arc;

/// Events emitted during a sync cycle for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A podcast's feed is being fetched
    FetchingFeed { podcast: String, url: String },

    /// Feed has been parsed and new entries admitted
    FeedParsed {
        podcast: String,
        total_entries: usize,
        added: usize,
    },

    /// A download is starting
    DownloadStarting {
        episode_title: String,
        /// Index of this episode in the podcast's download queue
        episode_index: usize,
        /// Total number of episodes to download for the podcast
        total_to_download: usize,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        episode_title: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// The audio transfer finished and the file is in place
    DownloadCompleted {
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download failed; the episode stays pending
    DownloadFailed { episode_title: String, error: String },

    /// A downloaded episode was deleted by retention
    EpisodeExpired { episode_title: String },

    /// A podcast was skipped for the rest of the cycle
    PodcastFailed { podcast: String, error: String },

    /// The cycle is over
    CycleCompleted {
        added: usize,
        downloaded: usize,
        removed: usize,
        failed_downloads: usize,
        failed_podcasts: usize,
    },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Used by the daemon, which relies on logs instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
