//! # transformer-watch
//!
//! Telemetry fan-out and alert/status derivation for transformer monitoring.
//!
//! This crate keeps exactly one live subscription for the transformer being
//! watched, normalizes its raw records into a canonical sample, evaluates
//! every parameter against threshold bands and synthesizes one health status
//! that dashboards, reports and notifications can all read.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  ┌──────────┐   select()   ┌──────────┐  on_sample  ┌─────────┐ │
//! │  │  source  │─────────────▶│  router  │────────────▶│ monitor │ │
//! │  │  (feed)  │◀── cancel ───│ (1 live) │  on_reset   │ (state) │ │
//! │  └────┬─────┘              └────┬─────┘             └────┬────┘ │
//! │       │                         │                        │      │
//! │ ChannelFeed               data::normalize       data::aggregate │
//! │ StreamIngest                                    data::synthesize│
//! │ FileFeed                                        weather (async) │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: Feed abstraction ([`TelemetryFeed`] trait) with an
//!   in-memory channel feed, a newline-delimited JSON stream ingest and a
//!   polled store file
//! - **[`router`]**: [`SubscriptionRouter`], which retires the previous
//!   source before subscribing the next and drops stale updates
//! - **[`data`]**: Normalization, threshold bands, alerts, status, trends and
//!   export
//! - **[`monitor`]**: [`Monitor`], the consumer holding derived state for the
//!   selected source
//! - **[`weather`]**: Timeout-bounded background weather lookups
//! - **[`config`]**: Layered [`Settings`]
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Watch a store file, selecting the first listed source
//! transformer-watch --file store.json
//!
//! # Watch a TCP stream of envelopes for one source
//! transformer-watch --connect localhost:9000 --source T1
//!
//! # Export the current reading and exit
//! transformer-watch --file store.json --source T1 --export out.json
//! ```
//!
//! ### As a library
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use transformer_watch::{BandTable, ChannelFeed, Monitor, StatusLabel, SubscriptionRouter};
//!
//! let feed = ChannelFeed::new("memory");
//! let monitor = Arc::new(Mutex::new(Monitor::new(Arc::new(BandTable::default()))));
//!
//! let mut router = SubscriptionRouter::new(Arc::new(feed.clone()));
//! router.register(monitor.clone());
//! router.select("T1").unwrap();
//!
//! feed.publish("T1", serde_json::json!({"Temperature": 105, "OilLevel": 60}));
//! router.poll();
//!
//! let status = monitor.lock().status().cloned().unwrap();
//! assert_eq!(status.label, StatusLabel::CriticalFault);
//! ```
//!
//! ### Bridging from a message bus
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use transformer_watch::{ChannelFeed, StreamIngest};
//!
//! # tokio_test::block_on(async {
//! let feed = ChannelFeed::new("bus");
//! let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
//! let ingest = StreamIngest::from_bytes_channel(rx, feed.clone(), "rabbitmq");
//! # });
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod monitor;
pub mod router;
pub mod source;
pub mod weather;

// Re-export main types for convenience
pub use config::Settings;
pub use data::{
    Alert, AlertSummary, BandTable, DerivedStatus, ExportDocument, Parameter, PerformanceStats,
    PredictionLabel, Severity, StatusLabel, StatusOrigin, TelemetrySample, ThresholdBand,
    TimeSeries,
};
pub use error::{ConfigError, ExportError, FeedError, WeatherError};
pub use monitor::Monitor;
pub use router::{RouterState, SampleConsumer, SubscriptionRouter};
pub use source::{
    ChannelFeed, FeedSubscription, FeedUpdate, FileFeed, SourceListSubscription, StreamIngest,
    TelemetryFeed,
};
pub use weather::{WeatherProvider, WeatherSnapshot, WeatherState, WeatherTracker};
