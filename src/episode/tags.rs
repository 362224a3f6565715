// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use id3::TagLike;
use id3::frame::{Picture, PictureType};

use crate::error::TagError;
use crate::model::{Episode, Podcast};

/// Genre written to every file. ID3v1 genre 255 plus a name keeps car head
/// units that only read the numeric genre from rejecting the file.
pub const PODCAST_GENRE: &str = "(255)Podcast";

/// Size of an ID3v1 trailer
const ID3V1_TAG_SIZE: u64 = 128;

/// The metadata stamped onto a downloaded episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub artist: String,
    pub album_artist: String,
    pub title: String,
    pub album: String,
    pub genre: String,
    /// JPEG bytes for the front cover
    pub cover: Option<Vec<u8>>,
}

impl TrackTags {
    pub fn for_episode(episode: &Episode, podcast: &Podcast, cover: Option<Vec<u8>>) -> Self {
        Self {
            artist: episode.author.clone(),
            album_artist: episode.author.clone(),
            title: episode.title.clone(),
            album: podcast.name.clone(),
            genre: PODCAST_GENRE.to_string(),
            cover,
        }
    }
}

/// Reads and writes embedded metadata of audio files
pub trait TagWriter: Send + Sync {
    /// The first picture embedded in the file's current tags, if any
    fn embedded_cover(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError>;

    /// Strip every tag version the writer knows about
    fn clear_tags(&self, path: &Path) -> Result<(), TagError>;

    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError>;
}

/// [`TagWriter`] for MP3 files using ID3v1 and ID3v2 tags
#[derive(Debug, Default, Clone, Copy)]
pub struct Id3TagWriter;

impl TagWriter for Id3TagWriter {
    fn embedded_cover(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError> {
        match id3::Tag::read_from_path(path) {
            Ok(tag) => Ok(tag.pictures().next().map(|picture| picture.data.clone())),
            Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Ok(None),
            Err(e) => Err(TagError::Id3 {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn clear_tags(&self, path: &Path) -> Result<(), TagError> {
        id3::Tag::remove_from_path(path).map_err(|e| TagError::Id3 {
            path: path.to_path_buf(),
            source: e,
        })?;

        let len = std::fs::metadata(path)
            .map_err(|e| TagError::Io {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();

        // Seeking to the v1 trailer fails on files shorter than the trailer
        if len >= ID3V1_TAG_SIZE {
            id3::v1::Tag::remove_from_path(path).map_err(|e| TagError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other(e),
            })?;
        }

        Ok(())
    }

    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError> {
        let mut tag = id3::Tag::new();
        tag.set_artist(tags.artist.as_str());
        tag.set_album_artist(tags.album_artist.as_str());
        tag.set_title(tags.title.as_str());
        tag.set_album(tags.album.as_str());
        tag.set_genre(tags.genre.as_str());

        if let Some(cover) = &tags.cover {
            tag.add_frame(Picture {
                mime_type: "image/jpeg".to_string(),
                picture_type: PictureType::CoverFront,
                description: String::new(),
                data: cover.clone(),
            });
        }

        tag.write_to_path(path, id3::Version::Id3v23)
            .map_err(|e| TagError::Id3 {
                path: path.to_path_buf(),
                source: e,
            })
    }
}
