pub mod artwork;
mod download;
mod filename;
mod identity;
mod pipeline;
pub mod tags;

pub use artwork::{CoverSource, DEFAULT_COVER_SOURCES};
pub use download::{
    DownloadContext, clean_partial_files, delete_file, download_to_file, partial_path,
};
pub use filename::{episode_path, podcast_dir, sanitize_component};
pub use identity::{normalize_timestamp, resolve_entry};
pub use pipeline::{Pipeline, expire_episode};
pub use tags::{Id3TagWriter, TagWriter, TrackTags};
