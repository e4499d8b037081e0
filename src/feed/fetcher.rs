//! Channel feed download.
//!
//! One request per channel, no retries. Failures are returned, not logged;
//! the aggregator logs the lost channel once.

use std::time::Duration;

use thiserror::Error;

use crate::feed::parser::parse_channel_feed;
use crate::feed::types::ChannelFeed;
use crate::util::{join_url, read_limited_bytes, BodyError};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching one channel's feed.
///
/// Every variant carries the channel id and feed URL so a failed channel can
/// be diagnosed from the log line alone.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request for channel {channel_id} failed: {source}")]
    Network {
        channel_id: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// HTTP response with non-2xx status code
    #[error("Feed for channel {channel_id} returned HTTP {status} ({url})")]
    HttpStatus {
        channel_id: String,
        url: String,
        status: u16,
    },
    /// Request exceeded the configured timeout
    #[error("Feed for channel {channel_id} timed out ({url})")]
    Timeout { channel_id: String, url: String },
    /// Response body exceeded the 10MB size limit
    #[error("Feed for channel {channel_id} is larger than {limit} bytes")]
    ResponseTooLarge {
        channel_id: String,
        url: String,
        limit: usize,
    },
}

impl FetchError {
    pub fn channel_id(&self) -> &str {
        match self {
            FetchError::Network { channel_id, .. }
            | FetchError::HttpStatus { channel_id, .. }
            | FetchError::Timeout { channel_id, .. }
            | FetchError::ResponseTooLarge { channel_id, .. } => channel_id,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Retrieves and parses per-channel feeds from the upstream platform.
///
/// Cheap to clone: the inner `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Feed document URL for a channel.
    pub fn feed_url(&self, channel_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(channel_id.as_bytes()).collect();
        format!(
            "{}?channel_id={}",
            join_url(&self.base_url, "feeds/videos.xml"),
            encoded
        )
    }

    /// Fetches one channel's feed and parses it into videos and metadata.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the configured timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
    ///
    /// Malformed XML is not an error: it yields whatever entries could be read.
    pub async fn fetch_channel_feed(&self, channel_id: &str) -> Result<ChannelFeed, FetchError> {
        let url = self.feed_url(channel_id);

        let response = tokio::time::timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| FetchError::Timeout {
                channel_id: channel_id.to_string(),
                url: url.clone(),
            })?
            .map_err(|source| FetchError::Network {
                channel_id: channel_id.to_string(),
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                channel_id: channel_id.to_string(),
                url,
                status: status.as_u16(),
            });
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| FetchError::Timeout {
                channel_id: channel_id.to_string(),
                url: url.clone(),
            })?
            .map_err(|e| match e {
                BodyError::Network(source) => FetchError::Network {
                    channel_id: channel_id.to_string(),
                    url: url.clone(),
                    source,
                },
                BodyError::TooLarge(limit) => FetchError::ResponseTooLarge {
                    channel_id: channel_id.to_string(),
                    url: url.clone(),
                    limit,
                },
            })?;

        Ok(parse_channel_feed(&bytes, channel_id))
    }
}
