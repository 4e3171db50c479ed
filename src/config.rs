//! Layered settings.
//!
//! Built-in defaults, then an optional TOML file, then environment variables
//! prefixed with `TRANSFORMER_WATCH_` (nested keys joined with `__`):
//!
//! ```toml
//! log_level = "debug"
//!
//! [feed]
//! poll_interval = "500ms"
//!
//! [weather]
//! timeout = "5s"
//!
//! [thresholds.Temperature]
//! kind = "above"
//! warning = 75.0
//! danger = 95.0
//! ```
//!
//! ```bash
//! TRANSFORMER_WATCH_FEED__POLL_INTERVAL=2s transformer-watch --file store.json
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::data::duration::parse_duration;
use crate::data::{BandTable, Parameter, ThresholdBand};
use crate::error::ConfigError;
use crate::weather::{self, WeatherProvider, WeatherTracker};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TRANSFORMER_WATCH";

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(deserializer)?;
    parse_duration(&value).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// How often a file feed re-checks its store.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            timeout: weather::DEFAULT_TIMEOUT,
        }
    }
}

impl WeatherSettings {
    /// Build a tracker for `provider` bounded by the configured timeout.
    pub fn tracker(&self, provider: Arc<dyn WeatherProvider>) -> WeatherTracker {
        WeatherTracker::new(provider, self.timeout)
    }
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub feed: FeedSettings,
    pub weather: WeatherSettings,
    /// Bands replacing the built-in ones, by parameter.
    pub thresholds: BTreeMap<Parameter, ThresholdBand>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            feed: FeedSettings::default(),
            weather: WeatherSettings::default(),
            thresholds: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;

        // Surface bad bands at load time rather than first use
        settings.band_table()?;
        Ok(settings)
    }

    /// The default band table with configured overrides applied.
    pub fn band_table(&self) -> Result<BandTable, ConfigError> {
        BandTable::default().with_overrides(self.thresholds.iter().map(|(p, b)| (*p, *b)))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Severity;
    use std::io::Write;
    use tempfile::Builder;

    fn no_env() -> Environment {
        environment().source(Some(Default::default()))
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_with(None, no_env()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.feed.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.band_table().unwrap(), BandTable::default());
    }

    #[test]
    fn test_file_overrides() {
        let file = toml_file(
            r#"
log_level = "debug"

[feed]
poll_interval = "250ms"

[weather]
timeout = "3s"

[thresholds.Temperature]
kind = "above"
warning = 70.0
danger = 90.0

[thresholds.OutputVoltage]
kind = "range"
warning = { min = 30.0, max = 34.0 }
danger = { min = 26.0, max = 38.0 }
"#,
        );

        let settings = Settings::load_with(Some(file.path()), no_env()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.feed.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.weather.timeout, Duration::from_secs(3));

        let table = settings.band_table().unwrap();
        assert_eq!(table.evaluate(Parameter::Temperature, 75.0), Severity::Warning);
        assert_eq!(table.evaluate(Parameter::OutputVoltage, 29.0), Severity::Warning);
        // Untouched parameters keep their defaults
        assert_eq!(table.get(Parameter::H2), BandTable::default().get(Parameter::H2));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = toml_file("log_level = \"debug\"\n");
        let env = environment().source(Some(
            [
                ("TRANSFORMER_WATCH_LOG_LEVEL".to_string(), "warn".to_string()),
                (
                    "TRANSFORMER_WATCH_FEED__POLL_INTERVAL".to_string(),
                    "2s".to_string(),
                ),
            ]
            .into_iter()
            .collect(),
        ));

        let settings = Settings::load_with(Some(file.path()), env).unwrap();
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.feed.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_band_rejected() {
        let file = toml_file(
            r#"
[thresholds.OilLevel]
kind = "below"
warning = 60.0
danger = 80.0
"#,
        );
        let err = Settings::load_with(Some(file.path()), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBand { parameter: Parameter::OilLevel, .. }));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let file = toml_file("[feed]\npoll_interval = \"soon\"\n");
        let err = Settings::load_with(Some(file.path()), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Settings::load_with(Some(Path::new("/nonexistent/settings.toml")), no_env());
        assert!(err.is_err());
    }

    #[derive(Debug)]
    struct Offline;

    #[async_trait::async_trait]
    impl WeatherProvider for Offline {
        async fn current_weather(
            &self,
            _city: &str,
        ) -> Result<weather::WeatherSnapshot, crate::error::WeatherError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_weather_timeout_applies_to_tracker() {
        let file = toml_file("[weather]\ntimeout = \"20ms\"\n");
        let settings = Settings::load_with(Some(file.path()), no_env()).unwrap();

        let tracker = settings.weather.tracker(Arc::new(Offline));
        assert_eq!(tracker.timeout(), Duration::from_millis(20));

        let mut rx = tracker.subscribe();
        tracker.request("Colombo").unwrap();
        while rx.borrow_and_update().in_flight {
            rx.changed().await.unwrap();
        }
        assert_eq!(
            tracker.state().error,
            Some(crate::error::WeatherError::Timeout(Duration::from_millis(20)))
        );
    }
}
