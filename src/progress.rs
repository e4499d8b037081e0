//! Live progress of the current aggregation round.
//!
//! A [`ProgressBroadcaster`] holds one shared [`AggregationProgress`] record
//! and pushes every change to its observers. Each round starts with
//! [`ProgressBroadcaster::init`], which mints a new [`SessionId`]; workers tag
//! their updates with the id they were dispatched under so that a slow worker
//! from a superseded round cannot move the new round's counter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::watch;

/// Opaque token identifying one aggregation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

/// Snapshot of aggregation progress as delivered to observers.
///
/// Invariant: `completed <= total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationProgress {
    pub total: usize,
    pub completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_channel_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl AggregationProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

type Observer = Box<dyn Fn(&AggregationProgress) + Send + Sync>;

struct Inner {
    progress: AggregationProgress,
    observers: Vec<(u64, Observer)>,
    next_observer_id: u64,
    next_session: u64,
}

impl Inner {
    fn notify(&self) {
        for (_, observer) in &self.observers {
            observer(&self.progress);
        }
    }
}

/// Process-wide progress record with publish/subscribe delivery.
///
/// Observers are called synchronously, in registration order, while the
/// record is locked, so every observer sees snapshots in the order they were
/// produced. An observer must not call back into the broadcaster.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ProgressBroadcaster")
            .field("progress", &inner.progress)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                progress: AggregationProgress::default(),
                observers: Vec::new(),
                next_observer_id: 0,
                next_session: 1,
            })),
        }
    }

    // An observer that panicked must not wedge progress for everyone else.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new round of `total` channels and returns its session token.
    ///
    /// Resets the counter and current-channel fields and publishes the reset
    /// state. Observers are kept across rounds.
    pub fn init(&self, total: usize) -> SessionId {
        let mut inner = self.lock();
        let session = SessionId(inner.next_session);
        inner.next_session += 1;

        tracing::debug!(
            total,
            previous_total = inner.progress.total,
            previous_completed = inner.progress.completed,
            observers = inner.observers.len(),
            "Progress reset for new round"
        );

        inner.progress = AggregationProgress {
            total,
            completed: 0,
            current_channel: None,
            current_channel_title: None,
            session_id: Some(session),
        };
        inner.notify();
        session
    }

    /// Records one finished channel for `session`.
    ///
    /// Ignored when no round is initialized or when `session` is not the live
    /// round. At the ceiling the counter stays at `total` and nothing is
    /// published. Returns whether the counter moved.
    pub fn update(&self, channel_id: &str, channel_title: Option<&str>, session: SessionId) -> bool {
        let mut inner = self.lock();
        if inner.progress.total == 0 || inner.progress.session_id != Some(session) {
            return false;
        }
        if inner.progress.completed >= inner.progress.total {
            inner.progress.completed = inner.progress.total;
            return false;
        }

        inner.progress.completed += 1;
        inner.progress.current_channel = Some(channel_id.to_string());
        inner.progress.current_channel_title = channel_title.map(str::to_string);

        tracing::debug!(
            completed = inner.progress.completed,
            total = inner.progress.total,
            percentage = inner.progress.completed * 100 / inner.progress.total,
            channel_title = channel_title.unwrap_or(channel_id),
            "Progress updated"
        );

        inner.notify();
        true
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> AggregationProgress {
        self.lock().progress.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Registers `observer` and immediately delivers the current snapshot to it.
    ///
    /// The observer stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe_with<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&AggregationProgress) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_observer_id;
        inner.next_observer_id += 1;

        observer(&inner.progress);
        inner.observers.push((id, Box::new(observer)));
        tracing::debug!(observers = inner.observers.len(), "Progress observer added");

        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Channel-backed subscription holding only the latest snapshot.
    ///
    /// The receiver starts marked as changed with the current snapshot. A
    /// reader that falls behind skips intermediate snapshots rather than
    /// queueing them. Dropping the [`Subscription`] closes the channel.
    pub fn subscribe(&self) -> (Subscription, watch::Receiver<AggregationProgress>) {
        let (tx, rx) = watch::channel(AggregationProgress::default());
        let subscription = self.subscribe_with(move |progress| {
            tx.send_replace(progress.clone());
        });
        (subscription, rx)
    }
}

/// Handle that keeps an observer registered.
///
/// Dropping it unsubscribes. [`Subscription::unsubscribe`] may also be
/// called any number of times.
#[must_use = "dropping a Subscription removes the observer immediately"]
pub struct Subscription {
    inner: Weak<Mutex<Inner>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.observers.len();
        inner.observers.retain(|(id, _)| *id != self.id);
        if inner.observers.len() != before {
            tracing::debug!(remaining = inner.observers.len(), "Progress observer removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
