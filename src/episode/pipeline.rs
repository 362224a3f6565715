// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{FinalizeError, PipelineError, StoreError};
use crate::http::HttpClient;
use crate::model::{Episode, EpisodeStatus, Podcast};
use crate::progress::SharedProgressReporter;
use crate::store::EpisodeStore;

use super::artwork::{CoverContext, CoverSource, resolve_cover};
use super::download::{DownloadContext, delete_file, download_to_file};
use super::filename::{episode_path, podcast_dir};
use super::tags::{TagWriter, TrackTags};

/// Collaborators shared by every download of a cycle
pub struct Pipeline<'a, C> {
    pub client: &'a C,
    pub store: &'a dyn EpisodeStore,
    pub tagger: &'a dyn TagWriter,
    pub base_dir: &'a Path,
    pub cover_sources: &'a [CoverSource],
    pub reporter: &'a SharedProgressReporter,
}

impl<C: HttpClient> Pipeline<'_, C> {
    /// Download, tag and record one pending episode
    ///
    /// The file write, tag write and store update form one unit. If tagging
    /// or the store update fails the file is deleted again and the episode
    /// stays `Pending`. Returns the episode as stored.
    pub async fn download_and_tag(
        &self,
        podcast: &Podcast,
        episode: &Episode,
        download: &DownloadContext,
        now: DateTime<Utc>,
    ) -> Result<Episode, PipelineError> {
        let dir = podcast_dir(self.base_dir, &podcast.name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::CreateDirectoryFailed {
                path: dir.clone(),
                source: e,
            })?;

        let target = episode_path(self.base_dir, &podcast.name, &episode.title);
        let bytes = download_to_file(
            self.client,
            &episode.link,
            &episode.title,
            &target,
            download,
            self.reporter,
        )
        .await?;

        match self.finalize(podcast, episode, target.clone(), now).await {
            Ok(stored) => {
                info!(
                    podcast = %podcast.name,
                    episode_id = %episode.episode_id,
                    path = %target.display(),
                    bytes,
                    "Downloaded episode"
                );
                Ok(stored)
            }
            Err(source) => {
                if let Err(e) = delete_file(&target).await {
                    warn!(path = %target.display(), error = %e, "Failed to roll back download");
                }
                Err(PipelineError::Consistency {
                    episode_id: episode.episode_id.clone(),
                    source,
                })
            }
        }
    }

    async fn finalize(
        &self,
        podcast: &Podcast,
        episode: &Episode,
        target: PathBuf,
        now: DateTime<Utc>,
    ) -> Result<Episode, FinalizeError> {
        let cover = resolve_cover(
            self.cover_sources,
            &CoverContext {
                client: self.client,
                tagger: self.tagger,
                podcast,
                episode,
                audio_path: &target,
            },
        )
        .await;

        let tags = TrackTags::for_episode(episode, podcast, cover);
        self.tagger.clear_tags(&target)?;
        self.tagger.write_tags(&target, &tags)?;

        let stored = Episode {
            status: EpisodeStatus::Downloaded,
            local_path: Some(target),
            downloaded_at: Some(now),
            ..episode.clone()
        };
        self.store.update_episode(&stored, EpisodeStatus::Pending)?;
        Ok(stored)
    }
}

/// Delete a downloaded episode's file and mark it `Removed`
///
/// A missing file is logged and the episode is still marked. Episodes that
/// are not `Downloaded`, or that another writer already removed, are left
/// alone. Returns whether this call removed the episode.
pub async fn expire_episode(
    store: &dyn EpisodeStore,
    episode: &Episode,
) -> Result<bool, PipelineError> {
    if episode.status != EpisodeStatus::Downloaded {
        debug!(episode_id = %episode.episode_id, status = %episode.status, "Nothing to expire");
        return Ok(false);
    }

    if let Some(path) = &episode.local_path
        && !delete_file(path).await?
    {
        warn!(
            episode_id = %episode.episode_id,
            path = %path.display(),
            "Expired episode file was already missing"
        );
    }

    let removed = Episode {
        status: EpisodeStatus::Removed,
        local_path: None,
        ..episode.clone()
    };

    match store.update_episode(&removed, EpisodeStatus::Downloaded) {
        Ok(()) => {
            info!(podcast = %episode.podcast, episode_id = %episode.episode_id, "Expired episode");
            Ok(true)
        }
        Err(StoreError::StatusConflict { .. }) => {
            debug!(episode_id = %episode.episode_id, "Episode was already expired");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
