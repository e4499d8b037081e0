//! Atom/RSS channel feed parsing.
//!
//! A single pass over quick-xml events fills a draft per entry. Thumbnails,
//! the short-form flag and timestamps degrade to defaults instead of failing,
//! and a feed that breaks off mid-document still yields the entries read so far.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::types::{ChannelFeed, ChannelMeta, FeedVideo};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const SHORTS_PATH_SEGMENT: &str = "/shorts/";

/// Default thumbnail the platform serves for every video id.
pub fn default_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
}

/// Raw values collected from one `<entry>` before thumbnail and URL resolution.
#[derive(Debug, Default)]
struct EntryDraft {
    video_id: String,
    id: String,
    title: String,
    channel_id: String,
    author_name: String,
    published: String,
    updated: String,
    alternate_link: Option<String>,
    first_link: Option<String>,
    group_thumbnail: Option<String>,
    group_content_url: Option<String>,
    group_content_duration: Option<String>,
    entry_thumbnail: Option<String>,
}

impl EntryDraft {
    fn into_video(self, now: DateTime<Utc>) -> Option<FeedVideo> {
        let video_id = first_non_empty([self.video_id, self.id])?;

        let link = self.alternate_link.or(self.first_link);
        let is_short = link
            .as_deref()
            .is_some_and(|href| href.contains(SHORTS_PATH_SEGMENT));
        let url = link.unwrap_or_else(|| format!("{WATCH_URL_PREFIX}{video_id}"));

        // First non-empty wins: media group thumbnail, media group content,
        // entry thumbnail, synthesized default.
        let thumbnail = [
            self.group_thumbnail,
            self.group_content_url,
            self.entry_thumbnail,
        ]
        .into_iter()
        .flatten()
        .find(|u| !u.trim().is_empty())
        .unwrap_or_else(|| default_thumbnail(&video_id));

        let published_at = parse_timestamp(&self.published).unwrap_or(now);
        let updated_at = parse_timestamp(&self.updated);
        let duration = self
            .group_content_duration
            .filter(|d| !d.trim().is_empty())
            .map(|d| format!("{}s", d.trim()));

        Some(FeedVideo {
            id: video_id,
            title: self.title,
            channel_id: self.channel_id,
            channel_title: self.author_name,
            published_at,
            updated_at,
            url,
            thumbnail: Some(thumbnail),
            duration,
            is_short,
        })
    }
}

/// Feed-level values that apply to every entry.
#[derive(Debug, Default)]
struct FeedDraft {
    title: String,
    channel_id: String,
    author_name: String,
    /// Thumbnail of the first entry only, `None` if that entry has none
    first_entry_thumbnail: Option<String>,
    seen_first_entry: bool,
}

/// Parses one channel's Atom/RSS document into videos and channel metadata.
///
/// Namespace prefixes are ignored (`yt:videoId` and `videoId` are the same
/// element). Malformed XML never fails the parse: entries completed before
/// the first syntax error are kept and the rest are dropped with a warning.
///
/// `channel_id` is the id the feed was requested for; it becomes the
/// [`ChannelMeta::channel_id`] and the fallback for entries that carry no
/// channel of their own.
pub fn parse_channel_feed(bytes: &[u8], channel_id: &str) -> ChannelFeed {
    let now = Utc::now();
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut feed = FeedDraft::default();
    let mut entry: Option<EntryDraft> = None;
    let mut videos = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "entry" || name == "item" {
                    entry = Some(EntryDraft::default());
                }
                path.push(name);
                apply_attributes(&e, &reader, &path, entry.as_mut());
            }
            Ok(Event::Empty(e)) => {
                path.push(local_name(&e));
                apply_attributes(&e, &reader, &path, entry.as_mut());
                path.pop();
            }
            Ok(Event::Text(t)) => match t.unescape() {
                Ok(text) => apply_text(&path, &text, &mut feed, entry.as_mut()),
                Err(e) => tracing::debug!(error = %e, "Skipping undecodable feed text"),
            },
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                apply_text(&path, &text, &mut feed, entry.as_mut());
            }
            Ok(Event::End(_)) => {
                if matches!(path.pop().as_deref(), Some("entry" | "item")) {
                    if let Some(draft) = entry.take() {
                        if !feed.seen_first_entry {
                            feed.seen_first_entry = true;
                            feed.first_entry_thumbnail = draft
                                .group_thumbnail
                                .clone()
                                .or_else(|| draft.entry_thumbnail.clone());
                        }
                        if let Some(video) = draft.into_video(now) {
                            videos.push(video);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(
                    channel_id = %channel_id,
                    position = reader.buffer_position(),
                    kept = videos.len(),
                    error = %e,
                    "Malformed feed XML, keeping entries parsed so far"
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    let feed_channel_id = if feed.channel_id.is_empty() {
        channel_id.to_string()
    } else {
        feed.channel_id
    };
    for video in &mut videos {
        if video.channel_id.is_empty() {
            video.channel_id = feed_channel_id.clone();
        }
        if video.channel_title.is_empty() {
            video.channel_title = feed.author_name.clone();
        }
    }

    let title = first_non_empty([feed.title, feed.author_name]).unwrap_or_default();
    let thumbnail = feed
        .first_entry_thumbnail
        .or_else(|| videos.first().and_then(|v| v.thumbnail.clone()));

    ChannelFeed {
        videos,
        meta: ChannelMeta {
            channel_id: channel_id.to_string(),
            title,
            thumbnail,
        },
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn apply_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    path: &[String],
    entry: Option<&mut EntryDraft>,
) {
    let Some(entry) = entry else {
        return;
    };
    let names: Vec<&str> = path.iter().map(String::as_str).collect();
    let slot = match names.as_slice() {
        [.., "entry", "link"] => AttrSlot::Link,
        [.., "entry", "group", "thumbnail"] => AttrSlot::GroupThumbnail,
        [.., "entry", "group", "content"] => AttrSlot::GroupContent,
        [.., "entry" | "item", "thumbnail"] => AttrSlot::EntryThumbnail,
        _ => return,
    };

    let mut href = None;
    let mut rel = None;
    let mut url = None;
    let mut duration = None;
    for attr in e.attributes().flatten() {
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.into_owned(),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed feed attribute");
                continue;
            }
        };
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value),
            b"rel" => rel = Some(value),
            b"url" => url = Some(value),
            b"duration" => duration = Some(value),
            _ => {}
        }
    }

    match slot {
        AttrSlot::Link => {
            let Some(href) = href else {
                return;
            };
            if rel.as_deref() == Some("alternate") {
                entry.alternate_link.get_or_insert(href);
            } else if entry.first_link.is_none() {
                entry.first_link = Some(href);
            }
        }
        AttrSlot::GroupThumbnail if entry.group_thumbnail.is_none() => entry.group_thumbnail = url,
        AttrSlot::GroupContent if entry.group_content_url.is_none() => {
            entry.group_content_url = url;
            entry.group_content_duration = duration;
        }
        AttrSlot::EntryThumbnail if entry.entry_thumbnail.is_none() => entry.entry_thumbnail = url,
        _ => {}
    }
}

enum AttrSlot {
    Link,
    GroupThumbnail,
    GroupContent,
    EntryThumbnail,
}

fn apply_text(path: &[String], text: &str, feed: &mut FeedDraft, entry: Option<&mut EntryDraft>) {
    let names: Vec<&str> = path.iter().map(String::as_str).collect();
    let target = match (names.as_slice(), entry) {
        ([.., "entry", field], Some(entry)) => match *field {
            "videoId" => &mut entry.video_id,
            "id" => &mut entry.id,
            "title" => &mut entry.title,
            "channelId" => &mut entry.channel_id,
            "published" => &mut entry.published,
            "updated" => &mut entry.updated,
            _ => return,
        },
        ([.., "entry", "author", "name"], Some(entry)) => &mut entry.author_name,
        // RSS 2.0 items carry their link as text and use different element names
        ([.., "item", field], Some(entry)) => match *field {
            "link" => {
                entry.first_link.get_or_insert_with(|| text.to_string());
                return;
            }
            "guid" => &mut entry.id,
            "title" => &mut entry.title,
            "pubDate" => &mut entry.published,
            "author" => &mut entry.author_name,
            _ => return,
        },
        (["feed", "title"] | ["rss", "channel", "title"], _) => &mut feed.title,
        (["feed", "channelId"], _) => &mut feed.channel_id,
        (["feed", "author", "name"], _) => &mut feed.author_name,
        _ => return,
    };
    target.push_str(text);
}

/// Accepts RFC 3339 (Atom) and RFC 2822 (RSS `pubDate`).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn first_non_empty<const N: usize>(candidates: [String; N]) -> Option<String> {
    candidates.into_iter().find(|s| !s.trim().is_empty())
}
