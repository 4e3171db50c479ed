//! Telemetry feed abstraction.
//!
//! A feed adapter hands out cancellable subscriptions: one per source for
//! telemetry records, one per source for prediction values, and one for the
//! list of available sources. Updates arrive on tokio channels owned by the
//! subscriber, so cancelling a subscription also discards anything still
//! queued for it.
//!
//! Adapters:
//!
//! - [`ChannelFeed`]: in-memory feed with publisher methods, the base for the others
//! - [`StreamIngest`]: newline-delimited JSON envelopes read from an async stream
//! - [`FileFeed`]: polls a JSON store file and publishes what changed

mod channel;
mod file;
mod store;
mod stream;

pub use channel::ChannelFeed;
pub use file::FileFeed;
pub use store::{Envelope, EnvelopeKind, StoreSnapshot};
pub use stream::StreamIngest;

use std::fmt::{self, Debug};

use tokio::sync::{mpsc, watch};

use crate::error::FeedError;

/// A raw record as delivered by the backing store.
pub type RawRecord = serde_json::Value;

/// One push update for a subscribed source.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// The record's current value.
    Record(RawRecord),
    /// The record was deleted.
    Removed,
}

impl FeedUpdate {
    /// The raw record, `None` when removed.
    pub fn record(&self) -> Option<&RawRecord> {
        match self {
            FeedUpdate::Record(raw) => Some(raw),
            FeedUpdate::Removed => None,
        }
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// A live subscription to one source.
///
/// Dropping the subscription cancels it; [`FeedSubscription::cancel`] does
/// the same explicitly. Once cancelled no further updates are observable.
pub struct FeedSubscription {
    source_id: String,
    receiver: mpsc::UnboundedReceiver<FeedUpdate>,
    cancel: Option<CancelFn>,
    closed: bool,
}

impl FeedSubscription {
    /// Create a subscription from a receiver and the adapter's cancel hook.
    pub fn new<F>(
        source_id: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<FeedUpdate>,
        cancel: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            source_id: source_id.into(),
            receiver,
            cancel: Some(Box::new(cancel)),
            closed: false,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Take the next queued update without blocking.
    pub fn try_next(&mut self) -> Option<FeedUpdate> {
        match self.receiver.try_recv() {
            Ok(update) => Some(update),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Wait for the next update; `None` once the adapter has closed it.
    pub async fn next(&mut self) -> Option<FeedUpdate> {
        let update = self.receiver.recv().await;
        if update.is_none() {
            self.closed = true;
        }
        update
    }

    /// Number of updates waiting to be taken.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the adapter side has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancel the subscription, discarding queued updates.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.receiver.close();
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("source_id", &self.source_id)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Subscription to the list of available source ids.
#[derive(Debug, Clone)]
pub struct SourceListSubscription {
    receiver: watch::Receiver<Vec<String>>,
}

impl SourceListSubscription {
    pub fn new(receiver: watch::Receiver<Vec<String>>) -> Self {
        Self { receiver }
    }

    /// The current list, marking it as seen.
    pub fn current(&mut self) -> Vec<String> {
        self.receiver.borrow_and_update().clone()
    }

    /// Wait until the list changes. Errors once the feed is gone.
    pub async fn changed(&mut self) -> Result<Vec<String>, FeedError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| FeedError::Closed("source list".to_string()))?;
        Ok(self.current())
    }
}

/// Trait for telemetry feed adapters.
///
/// Implementations connect the engine to a backing store. Subscribing must
/// not block; updates are delivered through the returned subscription.
pub trait TelemetryFeed: Send + Sync + Debug {
    /// Subscribe to telemetry records for one source.
    fn subscribe(&self, source_id: &str) -> Result<FeedSubscription, FeedError>;

    /// Subscribe to prediction values for one source.
    fn subscribe_prediction(&self, source_id: &str) -> Result<FeedSubscription, FeedError>;

    /// Subscribe to the list of available sources.
    fn subscribe_source_list(&self) -> Result<SourceListSubscription, FeedError>;

    /// Returns a human-readable description of the feed.
    fn description(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_cancel_runs_hook_once_and_discards_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = calls.clone();

        let sub = FeedSubscription::new("T1", rx, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        tx.send(FeedUpdate::Removed).unwrap();

        sub.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tx.send(FeedUpdate::Removed).is_err());
    }

    #[test]
    fn test_drop_cancels() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = calls.clone();
        {
            let _sub = FeedSubscription::new("T1", rx, move || {
                hook.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_next_detects_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = FeedSubscription::new("T1", rx, || {});
        tx.send(FeedUpdate::Record(serde_json::json!({"H2": 1}))).unwrap();
        drop(tx);

        assert!(matches!(sub.try_next(), Some(FeedUpdate::Record(_))));
        assert!(!sub.is_closed());
        assert!(sub.try_next().is_none());
        assert!(sub.is_closed());
    }
}
