//! Shared fixtures: mocked upstream feeds and a wired-up engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tubefeed::feed::{AggregatorConfig, AvatarEnricher, ChannelResolver, FeedAggregator, FeedFetcher};
use tubefeed::progress::ProgressBroadcaster;
use tubefeed::storage::{SubscriptionInList, SubscriptionStore, DEFAULT_LIST_ID};
use tubefeed::web::AppState;

/// A well-formed channel id ending in `n`.
pub fn channel_id(n: u32) -> String {
    format!("UC{:0>22}", n)
}

pub fn feed_xml(channel_id: &str, title: &str, entries: &[(&str, &str)]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
  <yt:channelId>{channel_id}</yt:channelId>
  <title>{title}</title>
  <author><name>{title}</name></author>"#
    );
    for (video_id, published) in entries {
        xml.push_str(&format!(
            r#"
  <entry>
    <id>yt:video:{video_id}</id>
    <yt:videoId>{video_id}</yt:videoId>
    <title>Video {video_id}</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v={video_id}"/>
    <published>{published}</published>
    <media:group>
      <media:thumbnail url="https://i.example/{video_id}.jpg" width="480" height="360"/>
    </media:group>
  </entry>"#
        ));
    }
    xml.push_str("\n</feed>");
    xml
}

pub async fn mount_feed(server: &MockServer, channel_id: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/feeds/videos.xml"))
        .and(query_param("channel_id", channel_id))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

pub async fn mount_avatar(server: &MockServer, channel_id: &str, avatar_url: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/channel/{channel_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head><meta property="og:image" content="{avatar_url}"></head></html>"#
        )))
        .mount(server)
        .await;
}

pub fn subscription(channel_id: &str) -> SubscriptionInList {
    SubscriptionInList {
        id: channel_id.to_string(),
        channel_id: channel_id.to_string(),
        title: channel_id.to_string(),
        url: format!("https://www.youtube.com/channel/{channel_id}"),
        thumbnail: None,
        added_at: Utc::now(),
    }
}

pub async fn subscribe_all(store: &SubscriptionStore, channel_ids: &[String]) {
    for id in channel_ids {
        store
            .add_subscription(DEFAULT_LIST_ID, subscription(id))
            .await
            .unwrap();
    }
}

/// Application state pointed at `server`, storing into `data_dir`.
pub fn app_state(server: &MockServer, data_dir: &std::path::Path) -> Arc<AppState> {
    let client = reqwest::Client::new();
    let store = Arc::new(SubscriptionStore::in_dir(data_dir));
    let fetcher = FeedFetcher::new(client.clone(), server.uri(), Duration::from_secs(5));
    let aggregator = Arc::new(FeedAggregator::new(
        fetcher.clone(),
        Arc::clone(&store),
        ProgressBroadcaster::new(),
        AvatarEnricher::new(client.clone(), server.uri(), Duration::from_millis(500)),
        AggregatorConfig {
            concurrency: 2,
            cache_ttl: Duration::from_secs(1),
        },
    ));

    Arc::new(AppState {
        aggregator,
        resolver: ChannelResolver::new(client, server.uri(), Duration::from_secs(5)),
        fetcher,
        store,
        upstream_base_url: server.uri(),
    })
}
