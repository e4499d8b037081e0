//! The aggregation engine.
//!
//! [`FeedAggregator::get_feed`] merges the feeds of many channels into one
//! list sorted newest first. A round fetches every channel through a small
//! pool of workers draining a shared queue; a failing channel contributes
//! nothing but still advances progress. Results are cached briefly, and
//! callers that arrive while an identical round is running wait for that
//! round instead of starting another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::feed::avatar::AvatarEnricher;
use crate::feed::fetcher::FeedFetcher;
use crate::feed::types::{ChannelFeed, FeedVideo};
use crate::progress::{ProgressBroadcaster, SessionId};
use crate::storage::{StoreError, SubscriptionStore};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(1);

/// Sorted feed shared between the cache and every caller of a round.
pub type FeedItems = Arc<Vec<FeedVideo>>;

/// Requested channel set. `None` means every subscribed channel.
type RoundKey = Option<Vec<String>>;

type RoundResult = Result<FeedItems, AggregateError>;

/// Errors that abort a whole aggregation round.
///
/// Per-channel fetch failures never show up here; they only reach the log
/// and the progress stream.
#[derive(Debug, Clone, Error)]
pub enum AggregateError {
    /// The subscription store could not be read
    #[error("Failed to load subscribed channels: {0}")]
    Store(#[source] Arc<StoreError>),
    /// The round task panicked before producing a result
    #[error("Aggregation round failed: {0}")]
    RoundPanicked(String),
    /// The round went away without answering this caller
    #[error("Aggregation round ended without a result")]
    RoundAbandoned,
}

impl From<StoreError> for AggregateError {
    fn from(e: StoreError) -> Self {
        AggregateError::Store(Arc::new(e))
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of workers fetching channels at once
    pub concurrency: usize,
    /// How long a finished round's result is served without refetching
    pub cache_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

struct CachedFeed {
    key: RoundKey,
    stored_at: Instant,
    items: FeedItems,
}

struct PendingRound {
    round: u64,
    waiters: Vec<oneshot::Sender<RoundResult>>,
}

#[derive(Default)]
struct EngineState {
    cache: Option<CachedFeed>,
    in_flight: HashMap<RoundKey, PendingRound>,
    next_round: u64,
    enrichment: Option<JoinHandle<()>>,
}

impl EngineState {
    fn fresh_cache(&self, key: &RoundKey, ttl: Duration) -> Option<FeedItems> {
        self.cache
            .as_ref()
            .filter(|c| &c.key == key && c.stored_at.elapsed() < ttl)
            .map(|c| Arc::clone(&c.items))
    }
}

struct RoundOutput {
    items: FeedItems,
    channel_ids: Vec<String>,
}

/// Merges per-channel feeds into one chronological feed.
///
/// Construct once per process and share behind an `Arc`; rounds run on
/// spawned tasks that hold their own reference.
pub struct FeedAggregator {
    fetcher: FeedFetcher,
    store: Arc<SubscriptionStore>,
    progress: ProgressBroadcaster,
    enricher: AvatarEnricher,
    config: AggregatorConfig,
    state: Mutex<EngineState>,
}

impl FeedAggregator {
    pub fn new(
        fetcher: FeedFetcher,
        store: Arc<SubscriptionStore>,
        progress: ProgressBroadcaster,
        enricher: AvatarEnricher,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            progress,
            enricher,
            config: AggregatorConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    /// Takes the handle of the most recent avatar backfill, if one is still
    /// tracked. Dropping it leaves the task running.
    pub fn take_enrichment_task(&self) -> Option<JoinHandle<()>> {
        self.lock_state().enrichment.take()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the merged feed for `channel_ids` (all subscribed channels if
    /// `None`), newest first.
    ///
    /// Without `force_refresh`, a result younger than the cache TTL is
    /// returned as is, and a round already running for the same channel set
    /// is joined rather than duplicated. With `force_refresh` a new round
    /// always starts; callers waiting on a round it replaces receive the new
    /// round's result.
    ///
    /// # Errors
    ///
    /// Only a failure to read the subscription store (or a crashed round)
    /// is reported. Individual channels that fail to fetch are skipped.
    pub async fn get_feed(
        self: &Arc<Self>,
        channel_ids: Option<Vec<String>>,
        force_refresh: bool,
    ) -> Result<FeedItems, AggregateError> {
        let key: RoundKey = channel_ids.map(dedup_ids);
        if matches!(&key, Some(ids) if ids.is_empty()) {
            return Ok(Arc::new(Vec::new()));
        }

        let (rx, new_round) = {
            let mut state = self.lock_state();
            if !force_refresh {
                if let Some(items) = state.fresh_cache(&key, self.config.cache_ttl) {
                    tracing::debug!(items = items.len(), "Serving cached feed");
                    return Ok(items);
                }
            }

            let (tx, rx) = oneshot::channel();
            match state.in_flight.get_mut(&key) {
                Some(pending) if !force_refresh => {
                    tracing::debug!(round = pending.round, "Joining in-flight aggregation round");
                    pending.waiters.push(tx);
                    (rx, None)
                }
                _ => {
                    state.next_round += 1;
                    let round = state.next_round;
                    let mut waiters = state
                        .in_flight
                        .remove(&key)
                        .map(|p| p.waiters)
                        .unwrap_or_default();
                    waiters.push(tx);
                    state
                        .in_flight
                        .insert(key.clone(), PendingRound { round, waiters });
                    (rx, Some(round))
                }
            }
        };

        if let Some(round) = new_round {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let result = match catch_round_panic(engine.run_round(&key)).await {
                    Ok(result) => result,
                    Err(panic_msg) => {
                        tracing::error!(round, error = %panic_msg, "Aggregation round panicked");
                        Err(AggregateError::RoundPanicked(panic_msg))
                    }
                };
                engine.finish_round(&key, round, result);
            });
        }

        rx.await.unwrap_or(Err(AggregateError::RoundAbandoned))
    }

    /// Fetches, merges, and sorts one round.
    async fn run_round(&self, key: &RoundKey) -> Result<RoundOutput, AggregateError> {
        let channel_ids = match key {
            Some(ids) => ids.clone(),
            None => self.store.list_channel_ids().await?,
        };

        if channel_ids.is_empty() {
            return Ok(RoundOutput {
                items: Arc::new(Vec::new()),
                channel_ids,
            });
        }

        let started = Instant::now();
        let session = self.progress.init(channel_ids.len());
        tracing::info!(
            channels = channel_ids.len(),
            workers = self.config.concurrency,
            "Starting aggregation round"
        );

        let queue: Mutex<VecDeque<(usize, String)>> =
            Mutex::new(channel_ids.iter().cloned().enumerate().collect());
        let worker_count = self.config.concurrency.min(channel_ids.len());
        let batches = join_all((0..worker_count).map(|_| self.drain_queue(&queue, session))).await;

        // Merge in queue order so equal timestamps keep source order
        let mut fetched: Vec<(usize, Vec<FeedVideo>)> = batches.into_iter().flatten().collect();
        fetched.sort_by_key(|(index, _)| *index);
        let mut items: Vec<FeedVideo> = fetched.into_iter().flat_map(|(_, v)| v).collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        tracing::info!(
            channels = channel_ids.len(),
            items = items.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregation round complete"
        );

        Ok(RoundOutput {
            items: Arc::new(items),
            channel_ids,
        })
    }

    /// One worker: pops channels until the queue is empty.
    async fn drain_queue(
        &self,
        queue: &Mutex<VecDeque<(usize, String)>>,
        session: SessionId,
    ) -> Vec<(usize, Vec<FeedVideo>)> {
        let mut collected = Vec::new();
        loop {
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some((index, channel_id)) = next else {
                break;
            };

            match self.fetcher.fetch_channel_feed(&channel_id).await {
                Ok(feed) => {
                    let title = (!feed.meta.title.is_empty()).then(|| feed.meta.title.clone());
                    collected.push((index, annotate_videos(feed, &channel_id)));
                    self.progress.update(&channel_id, title.as_deref(), session);
                }
                Err(e) => {
                    tracing::warn!(
                        channel_id = %channel_id,
                        status = e.status(),
                        error = %e,
                        "Skipping channel that failed to fetch"
                    );
                    let label = format!("[Error] {channel_id}");
                    self.progress.update(&channel_id, Some(&label), session);
                }
            }
        }
        collected
    }

    /// Publishes a finished round to its waiters if it is still the
    /// registered round for its key.
    fn finish_round(&self, key: &RoundKey, round: u64, result: Result<RoundOutput, AggregateError>) {
        let (waiters, result) = {
            let mut state = self.lock_state();
            let is_current = state
                .in_flight
                .get(key)
                .is_some_and(|pending| pending.round == round);
            if !is_current {
                tracing::debug!(round, "Discarding result of superseded round");
                return;
            }
            let waiters = state
                .in_flight
                .remove(key)
                .map(|p| p.waiters)
                .unwrap_or_default();

            let result = match result {
                Ok(output) => {
                    if !output.channel_ids.is_empty() {
                        state.cache = Some(CachedFeed {
                            key: key.clone(),
                            stored_at: Instant::now(),
                            items: Arc::clone(&output.items),
                        });
                        state.enrichment =
                            Some(self.enricher.spawn(Arc::clone(&self.store), output.channel_ids));
                    }
                    Ok(output.items)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Aggregation round failed");
                    Err(e)
                }
            };
            (waiters, result)
        };

        for waiter in waiters {
            // A caller that stopped waiting is not an error
            let _ = waiter.send(result.clone());
        }
    }
}

/// Fills per-video fields the entries left blank from the channel metadata.
fn annotate_videos(feed: ChannelFeed, channel_id: &str) -> Vec<FeedVideo> {
    let ChannelFeed { videos, meta } = feed;
    videos
        .into_iter()
        .map(|mut video| {
            if video.channel_id.is_empty() {
                video.channel_id = if meta.channel_id.is_empty() {
                    channel_id.to_string()
                } else {
                    meta.channel_id.clone()
                };
            }
            if video.channel_title.is_empty() {
                video.channel_title = meta.title.clone();
            }
            if video.thumbnail.is_none() {
                video.thumbnail = meta.thumbnail.clone();
            }
            video
        })
        .collect()
}

fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

/// Runs a round future, turning a panic into its message.
async fn catch_round_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future).catch_unwind().await.map_err(|panic| {
        if let Some(s) = panic.downcast_ref::<&'static str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    })
}
