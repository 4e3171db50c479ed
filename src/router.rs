//! Subscription routing.
//!
//! The router owns at most one [`SubscriptionHandle`] at a time. Selecting a
//! different source retires the active handle (cancelling both of its
//! subscriptions and resetting every consumer) before the new source is
//! subscribed. Updates are tagged with the source they were produced for and
//! anything not tagged with the active source is dropped, so a consumer never
//! sees a record from a source it has moved away from.
//!
//! ```text
//!            select(A)              select(B)
//!   Idle ─────────────▶ Subscribed(A) ─────────▶ Subscribed(B)
//!    ▲                                  retire A      │
//!    └──────────────────── teardown() ────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::data::sample::current_timestamp_ms;
use crate::data::{normalize, PredictionLabel, TelemetrySample};
use crate::error::FeedError;
use crate::source::{FeedSubscription, FeedUpdate, RawRecord, TelemetryFeed};

/// Receives normalized samples from the router.
///
/// Consumers are called synchronously, in registration order, from inside
/// the router's dispatch.
pub trait SampleConsumer: Send {
    /// A new sample for the active source.
    fn on_sample(&mut self, sample: &TelemetrySample);

    /// The active source's record was deleted.
    fn on_removed(&mut self, _source_id: &str) {}

    /// A new prediction value for the active source.
    fn on_prediction(&mut self, _source_id: &str, _prediction: &PredictionLabel) {}

    /// The active source was retired; drop anything derived from it.
    fn on_reset(&mut self, _source_id: &str) {}
}

impl<T: SampleConsumer> SampleConsumer for Arc<Mutex<T>> {
    fn on_sample(&mut self, sample: &TelemetrySample) {
        self.lock().on_sample(sample);
    }

    fn on_removed(&mut self, source_id: &str) {
        self.lock().on_removed(source_id);
    }

    fn on_prediction(&mut self, source_id: &str, prediction: &PredictionLabel) {
        self.lock().on_prediction(source_id, prediction);
    }

    fn on_reset(&mut self, source_id: &str) {
        self.lock().on_reset(source_id);
    }
}

/// Router state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Subscribed(String),
}

enum HandleEvent {
    Telemetry(FeedUpdate),
    Prediction(FeedUpdate),
    PredictionClosed,
}

/// The live subscriptions for the selected source.
#[derive(Debug)]
pub struct SubscriptionHandle {
    source_id: String,
    telemetry: FeedSubscription,
    prediction: Option<FeedSubscription>,
}

impl SubscriptionHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    fn cancel(self) {
        self.telemetry.cancel();
        if let Some(prediction) = self.prediction {
            prediction.cancel();
        }
    }

    async fn next_event(&mut self) -> Option<HandleEvent> {
        let prediction = match self.prediction.as_mut() {
            Some(prediction) if !prediction.is_closed() => prediction,
            _ => return self.telemetry.next().await.map(HandleEvent::Telemetry),
        };

        tokio::select! {
            update = self.telemetry.next() => update.map(HandleEvent::Telemetry),
            update = prediction.next() => Some(match update {
                Some(update) => HandleEvent::Prediction(update),
                None => HandleEvent::PredictionClosed,
            }),
        }
    }
}

/// Maintains one live subscription and fans samples out to consumers.
pub struct SubscriptionRouter {
    feed: Arc<dyn TelemetryFeed>,
    active: Option<SubscriptionHandle>,
    consumers: Vec<Box<dyn SampleConsumer>>,
}

impl SubscriptionRouter {
    pub fn new(feed: Arc<dyn TelemetryFeed>) -> Self {
        Self {
            feed,
            active: None,
            consumers: Vec::new(),
        }
    }

    /// Add a consumer. Consumers are notified in registration order.
    pub fn register<C: SampleConsumer + 'static>(&mut self, consumer: C) {
        self.consumers.push(Box::new(consumer));
    }

    pub fn state(&self) -> RouterState {
        match &self.active {
            Some(handle) => RouterState::Subscribed(handle.source_id.clone()),
            None => RouterState::Idle,
        }
    }

    /// The currently selected source, if any.
    pub fn active_source(&self) -> Option<&str> {
        self.active.as_ref().map(|handle| handle.source_id())
    }

    /// Returns a description of the feed being routed.
    pub fn feed_description(&self) -> &str {
        self.feed.description()
    }

    /// Switch to `source_id`.
    ///
    /// Selecting the active source is a no-op. Otherwise the previous handle
    /// is retired first; if subscribing then fails the router stays idle.
    pub fn select(&mut self, source_id: &str) -> Result<(), FeedError> {
        if self.active_source() == Some(source_id) {
            debug!(source_id = %source_id, "Source already selected");
            return Ok(());
        }

        self.retire();

        let telemetry = self.feed.subscribe(source_id)?;
        let prediction = match self.feed.subscribe_prediction(source_id) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(source_id = %source_id, error = %e, "Prediction unavailable");
                None
            }
        };

        info!(source_id = %source_id, feed = %self.feed.description(), "Subscribed");
        self.active = Some(SubscriptionHandle {
            source_id: source_id.to_string(),
            telemetry,
            prediction,
        });
        Ok(())
    }

    /// Retire the active handle. No-op when idle.
    pub fn teardown(&mut self) {
        self.retire();
    }

    fn retire(&mut self) {
        let Some(handle) = self.active.take() else {
            return;
        };
        let source_id = handle.source_id.clone();
        handle.cancel();
        info!(source_id = %source_id, "Unsubscribed");

        for consumer in &mut self.consumers {
            consumer.on_reset(&source_id);
        }
    }

    /// Handle a telemetry update tagged with `source_id`.
    ///
    /// `None` (or JSON `null`) means the record was deleted. Returns whether
    /// the update was dispatched.
    pub fn on_update(&mut self, source_id: &str, raw: Option<&RawRecord>) -> bool {
        if self.active_source() != Some(source_id) {
            debug!(source_id = %source_id, "Dropping update for inactive source");
            return false;
        }

        match normalize(source_id, raw, current_timestamp_ms()) {
            Some(sample) => {
                for consumer in &mut self.consumers {
                    consumer.on_sample(&sample);
                }
            }
            None => {
                debug!(source_id = %source_id, "Record removed");
                for consumer in &mut self.consumers {
                    consumer.on_removed(source_id);
                }
            }
        }
        true
    }

    /// Handle a prediction update tagged with `source_id`.
    pub fn on_prediction(&mut self, source_id: &str, raw: Option<&RawRecord>) -> bool {
        if self.active_source() != Some(source_id) {
            debug!(source_id = %source_id, "Dropping prediction for inactive source");
            return false;
        }

        let prediction = PredictionLabel::resolve(raw);
        debug!(source_id = %source_id, prediction = %prediction.display(), "Prediction");
        for consumer in &mut self.consumers {
            consumer.on_prediction(source_id, &prediction);
        }
        true
    }

    /// Dispatch the updates already queued for the active source without
    /// waiting. Returns the number dispatched.
    ///
    /// Only updates queued when the call starts are taken, so a publisher
    /// that keeps publishing cannot hold the caller here.
    pub fn poll(&mut self) -> usize {
        let Some(handle) = self.active.as_mut() else {
            return 0;
        };
        let source_id = handle.source_id.clone();
        let telemetry = handle.telemetry.queued();
        let prediction = handle.prediction.as_ref().map_or(0, |p| p.queued());

        let mut dispatched = 0;
        for _ in 0..telemetry {
            let Some(update) = self.active.as_mut().and_then(|h| h.telemetry.try_next()) else {
                break;
            };
            if self.dispatch(&source_id, HandleEvent::Telemetry(update)) {
                dispatched += 1;
            }
        }
        for _ in 0..prediction {
            let Some(update) = self
                .active
                .as_mut()
                .and_then(|h| h.prediction.as_mut())
                .and_then(|p| p.try_next())
            else {
                break;
            };
            if self.dispatch(&source_id, HandleEvent::Prediction(update)) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Wait for the next update on the active source and dispatch it.
    ///
    /// Returns `false` when idle or once the feed has closed the telemetry
    /// subscription.
    pub async fn next(&mut self) -> bool {
        loop {
            let Some(handle) = self.active.as_mut() else {
                return false;
            };
            let source_id = handle.source_id.clone();

            match handle.next_event().await {
                Some(HandleEvent::PredictionClosed) => {
                    debug!(source_id = %source_id, "Prediction stream closed");
                    continue;
                }
                Some(event) => return self.dispatch(&source_id, event),
                None => {
                    warn!(source_id = %source_id, "Telemetry stream closed");
                    return false;
                }
            }
        }
    }

    fn dispatch(&mut self, source_id: &str, event: HandleEvent) -> bool {
        match event {
            HandleEvent::Telemetry(update) => self.on_update(source_id, update.record()),
            HandleEvent::Prediction(update) => self.on_prediction(source_id, update.record()),
            HandleEvent::PredictionClosed => false,
        }
    }
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRouter")
            .field("feed", &self.feed.description())
            .field("active", &self.active_source())
            .field("consumers", &self.consumers.len())
            .finish()
    }
}
