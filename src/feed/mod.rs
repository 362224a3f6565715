mod fetch;
mod parse;

pub use fetch::{FeedSource, HttpFeedSource, fetch_feed_bytes, is_url, read_feed_file};
pub use parse::{Enclosure, FeedEntry, parse_feed};
