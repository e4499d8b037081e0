//! HTTP handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use crate::feed::{ChannelResolver, FeedAggregator, FeedFetcher, FeedVideo};
use crate::storage::{SubscriptionInList, SubscriptionListsData, SubscriptionStore};
use crate::util::join_url;
use crate::web::error::ApiError;

pub const UNRESOLVABLE_INPUT: &str = "Could not parse channel ID from input";

/// Shared state for all handlers.
pub struct AppState {
    pub aggregator: Arc<FeedAggregator>,
    pub resolver: ChannelResolver,
    pub fetcher: FeedFetcher,
    pub store: Arc<SubscriptionStore>,
    /// Used to build the stored channel URL.
    pub upstream_base_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    /// Comma-separated channel ids; omitted means every subscription.
    pub ids: Option<String>,
    pub refresh: Option<String>,
}

impl FeedQuery {
    /// `None` only when `ids` is absent or empty. A value that names no
    /// channel (`ids=%20,`) is an empty set, not "everything".
    fn channel_ids(&self) -> Option<Vec<String>> {
        let raw = self.ids.as_deref().filter(|raw| !raw.is_empty())?;
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    fn force_refresh(&self) -> bool {
        self.refresh.as_deref() == Some("true")
    }
}

#[derive(Serialize)]
struct FeedResponse<'a> {
    items: &'a [FeedVideo],
}

/// GET /api/feed - Merged feed, newest first.
pub async fn get_feed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, ApiError> {
    let items = state
        .aggregator
        .get_feed(query.channel_ids(), query.force_refresh())
        .await?;
    Ok(Json(FeedResponse {
        items: items.as_slice(),
    })
    .into_response())
}

/// GET /api/feed/progress - Server-sent progress snapshots.
///
/// The first event is the current snapshot. A client that reads slowly gets
/// the latest snapshot, not a backlog. The observer is removed when the
/// client goes away and the stream is dropped.
pub async fn progress_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, rx) = state.aggregator.progress().subscribe();

    let events = stream::unfold((subscription, rx), |(subscription, mut rx)| async move {
        rx.changed().await.ok()?;
        let progress = rx.borrow_and_update().clone();
        let event = match serde_json::to_string(&progress) {
            Ok(json) => Event::default().data(json),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize progress");
                Event::default().comment("progress unavailable")
            }
        };
        Some((Ok(event), (subscription, rx)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSubscriptionRequest {
    /// Channel URL, handle, or id
    pub input: String,
    pub list_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddSubscriptionResponse {
    /// False when the list already had this channel.
    pub added: bool,
    pub subscription: SubscriptionInList,
}

/// POST /api/subscriptions - Resolve input to a channel and subscribe to it.
pub async fn add_subscription(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddSubscriptionRequest>,
) -> Result<(StatusCode, Json<AddSubscriptionResponse>), ApiError> {
    let channel_id = state
        .resolver
        .resolve(&req.input)
        .await
        .ok_or_else(|| ApiError::bad_request(UNRESOLVABLE_INPUT))?;

    let feed = state
        .fetcher
        .fetch_channel_feed(&channel_id)
        .await
        .map_err(|e| {
            tracing::warn!(channel_id = %channel_id, error = %e, "Channel feed unavailable while subscribing");
            ApiError::bad_gateway(format!("Failed to fetch feed for channel {channel_id}"))
        })?;

    let list_id = match req.list_id {
        Some(id) => id,
        None => state.store.read_lists().await?.default_list_id,
    };

    let subscription = SubscriptionInList {
        id: channel_id.clone(),
        title: if feed.meta.title.is_empty() {
            channel_id.clone()
        } else {
            feed.meta.title
        },
        url: join_url(&state.upstream_base_url, &format!("channel/{channel_id}")),
        thumbnail: feed.meta.thumbnail,
        added_at: Utc::now(),
        channel_id,
    };

    let added = state
        .store
        .add_subscription(&list_id, subscription.clone())
        .await?;
    if added {
        tracing::info!(channel_id = %subscription.channel_id, list_id = %list_id, "Subscription added");
    }

    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(AddSubscriptionResponse {
            added,
            subscription,
        }),
    ))
}

/// GET /api/subscription-lists - The stored lists document.
pub async fn list_subscription_lists(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SubscriptionListsData>, ApiError> {
    Ok(Json(state.store.read_lists().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(ids: Option<&str>, refresh: Option<&str>) -> FeedQuery {
        FeedQuery {
            ids: ids.map(str::to_string),
            refresh: refresh.map(str::to_string),
        }
    }

    #[test]
    fn test_channel_ids_split_and_trimmed() {
        assert_eq!(
            query(Some("UCa, UCb,,"), None).channel_ids(),
            Some(vec!["UCa".to_string(), "UCb".to_string()])
        );
        assert_eq!(query(Some(""), None).channel_ids(), None);
        assert_eq!(query(None, None).channel_ids(), None);
    }

    #[test]
    fn test_blank_ids_select_no_channels() {
        assert_eq!(query(Some(" , "), None).channel_ids(), Some(vec![]));
    }

    #[test]
    fn test_only_literal_true_forces_refresh() {
        assert!(query(None, Some("true")).force_refresh());
        assert!(!query(None, Some("1")).force_refresh());
        assert!(!query(None, None).force_refresh());
    }
}
