// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::EpisodeStatus;
use crate::sync::CycleSummary;

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for feed {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Entry '{entry_id}' has no publication date")]
    MissingDate { entry_id: String },

    #[error("Failed to parse date '{date_str}': {reason}")]
    InvalidDate { date_str: String, reason: String },
}

impl FeedError {
    /// Whether the failure happened on the network side and may succeed next cycle
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            FeedError::FetchFailed { .. } | FeedError::HttpStatus { .. }
        )
    }
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} into place at {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the persistence store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Episode '{0}' already exists")]
    DuplicateKey(String),

    #[error("Episode '{episode_id}' is no longer {expected}")]
    StatusConflict {
        episode_id: String,
        expected: EpisodeStatus,
    },

    #[error("Episode '{episode_id}' cannot move from {from} to {to}")]
    IllegalTransition {
        episode_id: String,
        from: EpisodeStatus,
        to: EpisodeStatus,
    },

    #[error("Unknown episode status '{0}' in database")]
    UnknownStatus(String),

    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

/// Errors raised while reading or writing embedded audio tags
#[derive(Error, Debug)]
pub enum TagError {
    #[error("Failed to access tags in {path}: {source}")]
    Id3 {
        path: PathBuf,
        #[source]
        source: id3::Error,
    },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while turning a cover image into an embeddable thumbnail
#[derive(Error, Debug)]
pub enum ArtworkError {
    #[error("Failed to fetch cover image from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for cover image {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to decode cover image: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Tag(#[from] TagError),
}

/// Configuration errors, either of the config file or of a podcast record
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Podcast '{podcast}' has an invalid max age '{value}': {source}")]
    InvalidMaxAge {
        podcast: String,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("Podcast '{podcast}' max age '{value}' is out of range")]
    MaxAgeOutOfRange { podcast: String, value: String },

    #[error("Podcast '{podcast}' must keep at least one episode (got {value})")]
    InvalidMaxEpisodes { podcast: String, value: u32 },

    #[error("Podcast name '{0}' is used more than once")]
    DuplicatePodcast(String),

    #[error("Failed to create podcast directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The step of a download that failed after the audio was already on disk
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the download-then-tag unit of work
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Episode '{episode_id}' rolled back, file removed: {source}")]
    Consistency {
        episode_id: String,
        #[source]
        source: FinalizeError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that abort the processing of a single podcast within a cycle
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A podcast whose sync stopped partway, with the work that did complete
#[derive(Error, Debug)]
#[error("{source}")]
pub struct PodcastSyncFailure {
    pub completed: CycleSummary,
    #[source]
    pub source: SyncError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_is_a_fetch_error() {
        let err = FeedError::HttpStatus {
            url: "https://example.com/feed.xml".to_string(),
            status: 503,
        };
        assert!(err.is_fetch_error());
    }

    #[test]
    fn date_errors_are_not_fetch_errors() {
        let err = FeedError::InvalidDate {
            date_str: "yesterday".to_string(),
            reason: "no format matched".to_string(),
        };
        assert!(!err.is_fetch_error());
    }

    #[test]
    fn status_conflict_names_the_expected_status() {
        let err = StoreError::StatusConflict {
            episode_id: "ep-1".to_string(),
            expected: EpisodeStatus::Pending,
        };
        assert_eq!(err.to_string(), "Episode 'ep-1' is no longer pending");
    }
}
