//! Channel avatar backfill, scraped from channel pages.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;

use crate::storage::SubscriptionStore;
use crate::util::{browser_headers, join_url, read_limited_bytes};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

fn og_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<meta\s+property="og:image"\s+content="([^"]+)""#).expect("valid og:image regex")
    })
}

fn avatar_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""avatar":\{"thumbnails":\[\{"url":"([^"]+)""#).expect("valid avatar regex")
    })
}

/// Pulls the channel avatar URL out of a channel page.
///
/// Prefers the `og:image` meta tag, then the first avatar thumbnail in the
/// embedded JSON.
pub fn extract_avatar_url(html: &str) -> Option<String> {
    if let Some(caps) = og_image_re().captures(html) {
        return Some(caps[1].replace("&amp;", "&"));
    }
    avatar_json_re()
        .captures(html)
        .map(|caps| caps[1].replace("\\u0026", "&"))
}

/// Best-effort backfill of channel avatars into stored subscriptions.
///
/// Nothing here reports failure to a caller: a channel whose page cannot be
/// fetched in time simply contributes no avatar.
#[derive(Debug, Clone)]
pub struct AvatarEnricher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AvatarEnricher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Scrapes one channel's avatar, bounded by the enricher's timeout.
    pub async fn fetch_avatar(&self, channel_id: &str) -> Option<String> {
        let page_url = join_url(&self.base_url, &format!("channel/{channel_id}"));

        let fetch = async {
            let response = self
                .client
                .get(&page_url)
                .headers(browser_headers())
                .send()
                .await
                .ok()?;
            if !response.status().is_success() {
                tracing::debug!(channel_id = %channel_id, status = response.status().as_u16(), "Avatar page fetch failed");
                return None;
            }
            let bytes = read_limited_bytes(response, MAX_PAGE_SIZE).await.ok()?;
            extract_avatar_url(&String::from_utf8_lossy(&bytes))
        };

        match tokio::time::timeout(self.timeout, fetch).await {
            Ok(avatar) => avatar,
            Err(_) => {
                tracing::debug!(channel_id = %channel_id, timeout_ms = self.timeout.as_millis() as u64, "Avatar fetch timed out");
                None
            }
        }
    }

    /// Fetches avatars for all `channel_ids` at once and writes any new ones
    /// back to `store`. Returns the number of subscription entries changed.
    pub async fn enrich(&self, store: &SubscriptionStore, channel_ids: &[String]) -> usize {
        let results = join_all(channel_ids.iter().map(|id| async move {
            self.fetch_avatar(id).await.map(|url| (id.clone(), url))
        }))
        .await;

        let avatars: HashMap<String, String> = results.into_iter().flatten().collect();
        if avatars.is_empty() {
            return 0;
        }

        match store.update_subscription_thumbnails(&avatars).await {
            Ok(changed) => {
                if changed > 0 {
                    tracing::info!(found = avatars.len(), changed, "Backfilled channel avatars");
                }
                changed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write channel avatars");
                0
            }
        }
    }

    /// Runs [`enrich`](Self::enrich) on a detached task.
    ///
    /// Callers normally drop the handle; it is returned so tests can wait for
    /// the write to land.
    pub fn spawn(
        &self,
        store: Arc<SubscriptionStore>,
        channel_ids: Vec<String>,
    ) -> tokio::task::JoinHandle<()> {
        let enricher = self.clone();
        tokio::spawn(async move {
            enricher.enrich(&store, &channel_ids).await;
        })
    }
}
