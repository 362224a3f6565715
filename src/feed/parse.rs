// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::FeedError;

/// A single entry of a feed, as published and before any normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Stable identifier: the guid, or the first enclosure URL without one
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    /// Raw publication date string
    pub published: Option<String>,
    pub enclosures: Vec<Enclosure>,
    pub image: Option<String>,
}

/// A media file attached to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
}

impl Enclosure {
    pub fn is_audio(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|mime| mime.trim().to_ascii_lowercase().starts_with("audio/"))
    }
}

/// Parse RSS feed XML bytes into entries, in feed order
///
/// Items without any usable identifier are dropped.
pub fn parse_feed(xml_bytes: &[u8]) -> Result<Vec<FeedEntry>, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    Ok(channel.items().iter().filter_map(parse_entry).collect())
}

fn parse_entry(item: &rss::Item) -> Option<FeedEntry> {
    let enclosures = collect_enclosures(item);

    let id = item
        .guid()
        .map(|g| g.value().trim().to_string())
        .filter(|guid| !guid.is_empty())
        .or_else(|| enclosures.first().map(|e| e.url.clone()))?;

    let title = item
        .title()
        .map(|t| html_escape::decode_html_entities(t.trim()).into_owned())
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let itunes = item.itunes_ext();
    let dublin_core = item.dublin_core_ext();

    let author = item
        .author()
        .map(String::from)
        .or_else(|| itunes.and_then(|ext| ext.author().map(String::from)))
        .or_else(|| dublin_core.and_then(|dc| dc.creators().first().cloned()))
        .map(|a| html_escape::decode_html_entities(a.trim()).into_owned())
        .filter(|a| !a.is_empty());

    let published = item
        .pub_date()
        .map(String::from)
        .or_else(|| dublin_core.and_then(|dc| dc.dates().first().cloned()));

    let image = itunes
        .and_then(|ext| ext.image())
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    Some(FeedEntry {
        id,
        title,
        author,
        published,
        enclosures,
        image,
    })
}

/// Gather `<enclosure>` and `<media:content>` references, in that order
fn collect_enclosures(item: &rss::Item) -> Vec<Enclosure> {
    let mut enclosures = Vec::new();

    if let Some(enclosure) = item.enclosure() {
        enclosures.push(Enclosure {
            url: enclosure.url().to_string(),
            mime_type: Some(enclosure.mime_type().to_string()).filter(|s| !s.is_empty()),
        });
    }

    let media_contents = item
        .extensions()
        .get("media")
        .and_then(|media| media.get("content"));

    for content in media_contents.into_iter().flatten() {
        if let Some(url) = content.attrs().get("url") {
            enclosures.push(Enclosure {
                url: url.clone(),
                mime_type: content.attrs().get("type").cloned(),
            });
        }
    }

    enclosures
}
