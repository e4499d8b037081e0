use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream video entry.
///
/// Built fresh on every aggregation round and never persisted. Serialized in
/// camelCase because that is what the reader UI consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedVideo {
    /// Platform-issued video identifier
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    /// Authoritative for ordering. Falls back to parse time when the upstream omits it.
    pub published_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Canonical watch URL
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Display string such as `"613s"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Heuristic: the watch URL points at a short-form path.
    pub is_short: bool,
}

/// Per-channel descriptive data derived from one feed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMeta {
    pub channel_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Everything extracted from one channel feed.
#[derive(Debug, Clone, Default)]
pub struct ChannelFeed {
    pub videos: Vec<FeedVideo>,
    pub meta: ChannelMeta,
}
