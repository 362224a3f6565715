// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use tracing::{debug, warn};

use crate::error::ArtworkError;
use crate::http::HttpClient;
use crate::model::{Episode, Podcast};

use super::tags::TagWriter;

/// Covers are scaled to fit within a square of this many pixels
pub const THUMBNAIL_SIZE: u32 = 400;

/// A place a cover image can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSource {
    /// The image override configured on the podcast
    PodcastImage,
    /// The image given by the feed entry
    EpisodeImage,
    /// A picture already embedded in the downloaded file
    EmbeddedTag,
}

/// Lookup order used for every download
pub const DEFAULT_COVER_SOURCES: [CoverSource; 3] = [
    CoverSource::PodcastImage,
    CoverSource::EpisodeImage,
    CoverSource::EmbeddedTag,
];

/// Everything the cover sources may look at
pub struct CoverContext<'a, C> {
    pub client: &'a C,
    pub tagger: &'a dyn TagWriter,
    pub podcast: &'a Podcast,
    pub episode: &'a Episode,
    pub audio_path: &'a Path,
}

/// Try each source in order and return the first usable cover as a JPEG thumbnail
///
/// A source that is unset yields nothing; a source that fails to fetch or
/// decode is logged and skipped.
pub async fn resolve_cover<C: HttpClient>(
    sources: &[CoverSource],
    ctx: &CoverContext<'_, C>,
) -> Option<Vec<u8>> {
    for source in sources {
        let raw = match load(*source, ctx).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    episode_id = %ctx.episode.episode_id,
                    ?source,
                    error = %e,
                    "Cover source failed"
                );
                continue;
            }
        };

        match make_thumbnail(&raw) {
            Ok(jpeg) => {
                debug!(episode_id = %ctx.episode.episode_id, ?source, "Resolved cover image");
                return Some(jpeg);
            }
            Err(e) => {
                warn!(
                    episode_id = %ctx.episode.episode_id,
                    ?source,
                    error = %e,
                    "Cover image unusable"
                );
            }
        }
    }

    None
}

async fn load<C: HttpClient>(
    source: CoverSource,
    ctx: &CoverContext<'_, C>,
) -> Result<Option<Vec<u8>>, ArtworkError> {
    match source {
        CoverSource::PodcastImage => match &ctx.podcast.image_override {
            Some(url) => fetch_image(ctx.client, url).await.map(Some),
            None => Ok(None),
        },
        CoverSource::EpisodeImage => match &ctx.episode.image {
            Some(url) => fetch_image(ctx.client, url).await.map(Some),
            None => Ok(None),
        },
        CoverSource::EmbeddedTag => Ok(ctx.tagger.embedded_cover(ctx.audio_path)?),
    }
}

async fn fetch_image<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>, ArtworkError> {
    let response = client
        .get_bytes(url)
        .await
        .map_err(|e| ArtworkError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !response.is_success() {
        return Err(ArtworkError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    Ok(response.body.to_vec())
}

/// Decode an image, shrink it to fit [`THUMBNAIL_SIZE`] if needed and re-encode as JPEG
pub fn make_thumbnail(raw: &[u8]) -> Result<Vec<u8>, ArtworkError> {
    let decoded = image::load_from_memory(raw)?;

    // Never upscale small covers
    let fitted = if decoded.width() > THUMBNAIL_SIZE || decoded.height() > THUMBNAIL_SIZE {
        decoded.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE)
    } else {
        decoded
    };
    let rgb = fitted.to_rgb8();

    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    Ok(jpeg)
}
