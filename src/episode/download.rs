use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::http::{HttpClient, is_success};
use crate::progress::{ProgressEvent, SharedProgressReporter};

const PARTIAL_SUFFIX: &str = ".partial";

/// Context for tracking a download within a cycle
#[derive(Debug, Clone)]
pub struct DownloadContext {
    /// Index of this episode in the podcast's download queue
    pub episode_index: usize,
    /// Total number of episodes to download for the podcast
    pub total_to_download: usize,
}

/// Where a download is staged before it is moved into place
pub fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Download `url` to `output_path`
///
/// The body is streamed into a `.partial` sibling and renamed once complete,
/// so `output_path` only ever holds a full transfer. On failure the partial
/// file is removed. Returns the number of bytes written.
pub async fn download_to_file<C: HttpClient>(
    client: &C,
    url: &str,
    episode_title: &str,
    output_path: &Path,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
) -> Result<u64, DownloadError> {
    let staging = partial_path(output_path);

    let result = stream_to_file(client, url, episode_title, &staging, context, reporter).await;
    let bytes_downloaded = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            discard(&staging).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&staging, output_path).await {
        discard(&staging).await;
        return Err(DownloadError::RenameFailed {
            from: staging,
            to: output_path.to_path_buf(),
            source: e,
        });
    }

    reporter.report(ProgressEvent::DownloadCompleted {
        episode_title: episode_title.to_string(),
        bytes_downloaded,
    });

    Ok(bytes_downloaded)
}

async fn stream_to_file<C: HttpClient>(
    client: &C,
    url: &str,
    episode_title: &str,
    staging: &Path,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
) -> Result<u64, DownloadError> {
    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !is_success(response.status) {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    reporter.report(ProgressEvent::DownloadStarting {
        episode_title: episode_title.to_string(),
        episode_index: context.episode_index,
        total_to_download: context.total_to_download,
        content_length: response.content_length,
    });

    let mut file = File::create(staging)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: staging.to_path_buf(),
            source: e,
        })?;

    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: staging.to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;

        reporter.report(ProgressEvent::DownloadProgress {
            episode_title: episode_title.to_string(),
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: staging.to_path_buf(),
            source: e,
        })?;

    Ok(bytes_downloaded)
}

async fn discard(path: &Path) {
    if let Err(e) = delete_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
}

/// Remove a file, treating an already missing file as success
///
/// Returns whether a file was actually removed.
pub async fn delete_file(path: &Path) -> Result<bool, DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DownloadError::DeleteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove leftover `.partial` files from interrupted downloads in `dir`
///
/// A missing directory has nothing to clean. Returns the number removed.
pub fn clean_partial_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));

        if is_partial && std::fs::remove_file(&path).is_ok() {
            debug!(path = %path.display(), "Removed stale partial download");
            cleaned += 1;
        }
    }

    cleaned
}
