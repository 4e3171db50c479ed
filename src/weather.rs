//! Weather lookup for a source's city.
//!
//! The lookup itself is supplied by the embedding application through
//! [`WeatherProvider`]. [`WeatherTracker`] runs it in the background with a
//! timeout and publishes the outcome on a watch channel, so a slow or failing
//! service never holds up telemetry fan-out. The last good snapshot is kept
//! when a later lookup fails.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::data::sample::UNKNOWN_CITY;
use crate::error::WeatherError;

/// Default bound on one lookup.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub name: String,
    pub region: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub text: String,
    pub icon: String,
}

/// Current conditions at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub temp_c: f64,
    pub feelslike_c: f64,
    pub condition: WeatherCondition,
    pub humidity: f64,
    pub wind_kph: f64,
    pub pressure_mb: f64,
    pub last_updated: String,
    pub uv: f64,
    pub vis_km: f64,
    pub gust_kph: f64,
    pub precip_mm: f64,
    pub cloud: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location: WeatherLocation,
    pub current: CurrentWeather,
}

/// Source of current weather for a city.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError>;
}

/// Run one lookup bounded by `timeout`.
pub async fn fetch(
    provider: &dyn WeatherProvider,
    city: &str,
    timeout: Duration,
) -> Result<WeatherSnapshot, WeatherError> {
    tokio::time::timeout(timeout, provider.current_weather(city))
        .await
        .map_err(|_| WeatherError::Timeout(timeout))?
}

/// What the tracker currently knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherState {
    /// City of the most recent request.
    pub city: Option<String>,
    /// Last successful snapshot, kept across failures.
    pub last: Option<WeatherSnapshot>,
    /// Error from the most recent lookup, cleared on success.
    pub error: Option<WeatherError>,
    pub in_flight: bool,
}

/// Background weather lookups with a timeout and last-known retention.
#[derive(Debug)]
pub struct WeatherTracker {
    provider: Arc<dyn WeatherProvider>,
    timeout: Duration,
    state: Arc<watch::Sender<WeatherState>>,
    generation: Arc<AtomicU64>,
}

impl WeatherTracker {
    pub fn new(provider: Arc<dyn WeatherProvider>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(WeatherState::default());
        Self {
            provider,
            timeout,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> WeatherState {
        self.state.borrow().clone()
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<WeatherState> {
        self.state.subscribe()
    }

    /// Forget the current city and snapshot.
    ///
    /// A lookup still in flight is discarded when it completes.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(WeatherState::default());
    }

    /// Start a lookup for `city` without waiting for it.
    ///
    /// A result that arrives after a newer request has been made is
    /// discarded. Unknown or blank cities are not looked up and clear the
    /// previous city's snapshot. Must be called
    /// from within a tokio runtime.
    pub fn request(&self, city: &str) -> Result<(), WeatherError> {
        let city = city.trim();
        if city.is_empty() || city == UNKNOWN_CITY {
            self.reset();
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| WeatherError::NoRuntime)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| {
            state.city = Some(city.to_string());
            state.in_flight = true;
        });

        let provider = Arc::clone(&self.provider);
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        let timeout = self.timeout;
        let city = city.to_string();

        runtime.spawn(async move {
            let result = fetch(provider.as_ref(), &city, timeout).await;

            if current.load(Ordering::SeqCst) != generation {
                debug!(city = %city, "Discarding stale weather result");
                return;
            }

            state.send_modify(|state| {
                state.in_flight = false;
                match result {
                    Ok(snapshot) => {
                        debug!(city = %city, temp_c = snapshot.current.temp_c, "Weather updated");
                        state.last = Some(snapshot);
                        state.error = None;
                    }
                    Err(e) => {
                        warn!(city = %city, error = %e, "Weather lookup failed");
                        state.error = Some(e);
                    }
                }
            });
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StubProvider {
        delay: Duration,
        fail: bool,
    }

    fn snapshot(city: &str) -> WeatherSnapshot {
        WeatherSnapshot {
            location: WeatherLocation {
                name: city.to_string(),
                region: "Western".to_string(),
                country: "Sri Lanka".to_string(),
            },
            current: CurrentWeather {
                temp_c: 30.5,
                feelslike_c: 35.0,
                condition: WeatherCondition {
                    text: "Partly cloudy".to_string(),
                    icon: "//cdn/116.png".to_string(),
                },
                humidity: 70.0,
                wind_kph: 12.0,
                pressure_mb: 1010.0,
                last_updated: "2024-05-01 12:00".to_string(),
                uv: 9.0,
                vis_km: 10.0,
                gust_kph: 18.0,
                precip_mm: 0.1,
                cloud: 50.0,
            },
        }
    }

    #[async_trait]
    impl WeatherProvider for StubProvider {
        async fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(WeatherError::Status(503))
            } else {
                Ok(snapshot(city))
            }
        }
    }

    fn tracker(delay_ms: u64, fail: bool, timeout_ms: u64) -> WeatherTracker {
        WeatherTracker::new(
            Arc::new(StubProvider {
                delay: Duration::from_millis(delay_ms),
                fail,
            }),
            Duration::from_millis(timeout_ms),
        )
    }

    async fn settle(tracker: &WeatherTracker) -> WeatherState {
        let mut rx = tracker.subscribe();
        loop {
            if !rx.borrow_and_update().in_flight {
                return rx.borrow().clone();
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let provider = StubProvider {
            delay: Duration::from_millis(200),
            fail: false,
        };
        let result = fetch(&provider, "Colombo", Duration::from_millis(10)).await;
        assert_eq!(result, Err(WeatherError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_request_publishes_snapshot() {
        let tracker = tracker(1, false, 1_000);
        tracker.request("Colombo").unwrap();
        assert!(tracker.state().in_flight);

        let state = settle(&tracker).await;
        assert_eq!(state.city.as_deref(), Some("Colombo"));
        assert_eq!(state.last.unwrap().location.name, "Colombo");
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_known() {
        let good = tracker(1, false, 1_000);
        good.request("Kandy").unwrap();
        let last = settle(&good).await.last;
        assert!(last.is_some());

        // Same state channel, now failing lookups
        let failing = WeatherTracker {
            provider: Arc::new(StubProvider {
                delay: Duration::from_millis(1),
                fail: true,
            }),
            timeout: Duration::from_secs(1),
            state: Arc::clone(&good.state),
            generation: Arc::clone(&good.generation),
        };
        failing.request("Kandy").unwrap();
        let state = settle(&failing).await;

        assert_eq!(state.error, Some(WeatherError::Status(503)));
        assert_eq!(state.last, last);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let tracker = tracker(500, false, 10);
        tracker.request("Galle").unwrap();
        let state = settle(&tracker).await;

        assert!(matches!(state.error, Some(WeatherError::Timeout(_))));
        assert!(state.last.is_none());
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let tracker = tracker(30, false, 1_000);
        tracker.request("Galle").unwrap();
        tracker.request("Jaffna").unwrap();

        let state = settle(&tracker).await;
        assert_eq!(state.last.unwrap().location.name, "Jaffna");
    }

    #[tokio::test]
    async fn test_unknown_city_is_skipped() {
        let tracker = tracker(1, false, 1_000);
        tracker.request("Unknown").unwrap();
        tracker.request("   ").unwrap();

        let state = tracker.state();
        assert!(!state.in_flight);
        assert!(state.city.is_none());
    }

    #[tokio::test]
    async fn test_unknown_city_clears_previous_snapshot() {
        let tracker = tracker(1, false, 1_000);
        tracker.request("Colombo").unwrap();
        assert!(settle(&tracker).await.last.is_some());

        tracker.request("Unknown").unwrap();
        assert_eq!(tracker.state(), WeatherState::default());
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_lookup() {
        let tracker = tracker(20, false, 1_000);
        tracker.request("Colombo").unwrap();
        tracker.reset();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tracker.state(), WeatherState::default());
    }

    #[test]
    fn test_request_without_runtime() {
        let tracker = tracker(1, false, 1_000);
        assert_eq!(tracker.request("Colombo"), Err(WeatherError::NoRuntime));
    }
}
