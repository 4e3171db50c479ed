//! In-memory telemetry feed.
//!
//! Producers push records through the publisher methods and every live
//! subscriber for that source receives them on its own channel. The stream
//! and file adapters are built on top of this feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{FeedSubscription, FeedUpdate, RawRecord, SourceListSubscription, TelemetryFeed};
use crate::error::FeedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stream {
    Telemetry,
    Prediction,
}

#[derive(Debug, Default)]
struct Topic {
    latest: Option<RawRecord>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<FeedUpdate>>,
}

impl Topic {
    fn broadcast(&mut self, update: &FeedUpdate) {
        self.subscribers
            .retain(|_, tx| tx.send(update.clone()).is_ok());
    }
}

#[derive(Debug)]
struct Shared {
    next_id: AtomicU64,
    closed: AtomicBool,
    topics: Mutex<HashMap<(Stream, String), Topic>>,
    sources: watch::Sender<Vec<String>>,
}

impl Shared {
    fn refresh_sources(&self, topics: &HashMap<(Stream, String), Topic>) {
        let mut ids: Vec<String> = topics
            .iter()
            .filter(|((stream, _), topic)| *stream == Stream::Telemetry && topic.latest.is_some())
            .map(|((_, id), _)| id.clone())
            .collect();
        ids.sort();
        self.sources.send_if_modified(|current| {
            if *current == ids {
                false
            } else {
                *current = ids;
                true
            }
        });
    }
}

/// A telemetry feed backed by in-memory channels.
///
/// Cloning the feed yields another handle to the same topics, so one clone
/// can be given to the router while another publishes.
///
/// # Example
///
/// ```
/// use transformer_watch::{ChannelFeed, TelemetryFeed};
///
/// let feed = ChannelFeed::new("memory");
/// let mut sub = feed.subscribe("T1").unwrap();
/// feed.publish("T1", serde_json::json!({"Temperature": 71.5}));
/// assert!(sub.try_next().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    shared: Arc<Shared>,
    description: String,
}

impl ChannelFeed {
    /// Create a new feed.
    ///
    /// * `source_description` - where records come from (e.g. "tcp://host:9000")
    pub fn new(source_description: &str) -> Self {
        let (sources, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                topics: Mutex::new(HashMap::new()),
                sources,
            }),
            description: format!("channel: {}", source_description),
        }
    }

    /// Publish a telemetry record for a source.
    pub fn publish(&self, source_id: &str, record: RawRecord) {
        self.store(Stream::Telemetry, source_id, Some(record));
    }

    /// Delete a source's telemetry record. Publishing JSON `null` does the
    /// same.
    pub fn remove(&self, source_id: &str) {
        self.store(Stream::Telemetry, source_id, None);
    }

    /// Publish a prediction value for a source.
    pub fn publish_prediction(&self, source_id: &str, value: RawRecord) {
        self.store(Stream::Prediction, source_id, Some(value));
    }

    /// Delete a source's prediction value.
    pub fn remove_prediction(&self, source_id: &str) {
        self.store(Stream::Prediction, source_id, None);
    }

    /// Sorted ids of sources with a current telemetry record.
    pub fn source_ids(&self) -> Vec<String> {
        self.shared.sources.borrow().clone()
    }

    /// Number of live subscriptions across all sources and streams.
    pub fn active_subscriptions(&self) -> usize {
        self.shared
            .topics
            .lock()
            .values()
            .map(|topic| topic.subscribers.len())
            .sum()
    }

    /// Number of live subscriptions for one source's telemetry stream.
    pub fn subscriber_count(&self, source_id: &str) -> usize {
        self.shared
            .topics
            .lock()
            .get(&(Stream::Telemetry, source_id.to_string()))
            .map_or(0, |topic| topic.subscribers.len())
    }

    /// Stop accepting subscriptions and close every existing one.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let mut topics = self.shared.topics.lock();
        for topic in topics.values_mut() {
            topic.subscribers.clear();
        }
    }

    fn store(&self, stream: Stream, source_id: &str, record: Option<RawRecord>) {
        // A null record is a deletion
        let record = record.filter(|raw| !raw.is_null());
        let mut topics = self.shared.topics.lock();
        let topic = topics
            .entry((stream, source_id.to_string()))
            .or_default();

        if record.is_none() && topic.latest.is_none() {
            return;
        }

        let update = match &record {
            Some(raw) => FeedUpdate::Record(raw.clone()),
            None => FeedUpdate::Removed,
        };
        topic.latest = record;
        topic.broadcast(&update);
        debug!(
            source_id = %source_id,
            stream = ?stream,
            subscribers = topic.subscribers.len(),
            "Published update"
        );

        if stream == Stream::Telemetry {
            self.shared.refresh_sources(&topics);
        }
    }

    fn open(&self, stream: Stream, source_id: &str) -> Result<FeedSubscription, FeedError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(FeedError::Closed(self.description.clone()));
        }
        if source_id.trim().is_empty() {
            return Err(FeedError::Rejected {
                source_id: source_id.to_string(),
                reason: "empty source id".to_string(),
            });
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (stream, source_id.to_string());
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut topics = self.shared.topics.lock();
            let topic = topics.entry(key.clone()).or_default();
            // New subscribers see the current value first
            if let Some(latest) = &topic.latest {
                let _ = tx.send(FeedUpdate::Record(latest.clone()));
            }
            topic.subscribers.insert(id, tx);
        }

        let shared = Arc::clone(&self.shared);
        Ok(FeedSubscription::new(source_id, rx, move || {
            if let Some(topic) = shared.topics.lock().get_mut(&key) {
                topic.subscribers.remove(&id);
            }
        }))
    }
}

impl TelemetryFeed for ChannelFeed {
    fn subscribe(&self, source_id: &str) -> Result<FeedSubscription, FeedError> {
        self.open(Stream::Telemetry, source_id)
    }

    fn subscribe_prediction(&self, source_id: &str) -> Result<FeedSubscription, FeedError> {
        self.open(Stream::Prediction, source_id)
    }

    fn subscribe_source_list(&self) -> Result<SourceListSubscription, FeedError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(FeedError::Closed(self.description.clone()));
        }
        Ok(SourceListSubscription::new(self.shared.sources.subscribe()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_replays_latest() {
        let feed = ChannelFeed::new("test");
        feed.publish("T1", json!({"Temperature": 70}));

        let mut sub = feed.subscribe("T1").unwrap();
        assert_eq!(
            sub.try_next(),
            Some(FeedUpdate::Record(json!({"Temperature": 70})))
        );
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_updates_only_reach_matching_source() {
        let feed = ChannelFeed::new("test");
        let mut t1 = feed.subscribe("T1").unwrap();
        let mut t2 = feed.subscribe("T2").unwrap();

        feed.publish("T1", json!({"H2": 5}));

        assert!(t1.try_next().is_some());
        assert!(t2.try_next().is_none());
    }

    #[test]
    fn test_remove_notifies_and_updates_source_list() {
        let feed = ChannelFeed::new("test");
        feed.publish("T2", json!({}));
        feed.publish("T1", json!({}));
        assert_eq!(feed.source_ids(), vec!["T1".to_string(), "T2".to_string()]);

        let mut sub = feed.subscribe("T1").unwrap();
        let _ = sub.try_next();

        feed.remove("T1");
        assert_eq!(sub.try_next(), Some(FeedUpdate::Removed));
        assert_eq!(feed.source_ids(), vec!["T2".to_string()]);

        // Removing again is silent
        feed.remove("T1");
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_null_record_is_a_removal() {
        let feed = ChannelFeed::new("test");
        feed.publish("T1", json!(null));
        assert!(feed.source_ids().is_empty());

        let mut sub = feed.subscribe("T1").unwrap();
        assert!(sub.try_next().is_none());

        feed.publish("T1", json!({"H2": 5}));
        feed.publish("T1", json!(null));
        assert!(matches!(sub.try_next(), Some(FeedUpdate::Record(_))));
        assert_eq!(sub.try_next(), Some(FeedUpdate::Removed));
        assert!(feed.source_ids().is_empty());
    }

    #[test]
    fn test_cancel_releases_subscription() {
        let feed = ChannelFeed::new("test");
        let sub = feed.subscribe("T1").unwrap();
        let pred = feed.subscribe_prediction("T1").unwrap();
        assert_eq!(feed.active_subscriptions(), 2);
        assert_eq!(feed.subscriber_count("T1"), 1);

        sub.cancel();
        drop(pred);
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[test]
    fn test_prediction_stream_is_separate() {
        let feed = ChannelFeed::new("test");
        let mut telemetry = feed.subscribe("T1").unwrap();
        let mut prediction = feed.subscribe_prediction("T1").unwrap();

        feed.publish_prediction("T1", json!({"Status": "Fault"}));

        assert!(telemetry.try_next().is_none());
        assert_eq!(
            prediction.try_next(),
            Some(FeedUpdate::Record(json!({"Status": "Fault"})))
        );
        assert!(feed.source_ids().is_empty());
    }

    #[test]
    fn test_rejects_empty_id_and_closed_feed() {
        let feed = ChannelFeed::new("test");
        assert!(matches!(
            feed.subscribe("  "),
            Err(FeedError::Rejected { .. })
        ));

        let mut sub = feed.subscribe("T1").unwrap();
        feed.close();
        assert!(sub.try_next().is_none());
        assert!(sub.is_closed());
        assert!(matches!(feed.subscribe("T1"), Err(FeedError::Closed(_))));
    }

    #[test]
    fn test_description() {
        let feed = ChannelFeed::new("memory");
        assert_eq!(feed.description(), "channel: memory");
    }

    #[tokio::test]
    async fn test_source_list_changes() {
        let feed = ChannelFeed::new("test");
        let mut list = feed.subscribe_source_list().unwrap();
        assert!(list.current().is_empty());

        feed.publish("T7", json!({}));
        let ids = list.changed().await.unwrap();
        assert_eq!(ids, vec!["T7".to_string()]);
    }
}
