//! Derived state for the selected source.
//!
//! [`Monitor`] is the consumer the dashboard views read from: the latest
//! sample, its alerts, the synthesized status, recent history and the
//! weather for the source's city. It recomputes everything synchronously
//! when the router hands it a sample and drops it all on reset.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::data::trend::DEFAULT_POINT_COUNT;
use crate::data::{
    aggregate, synthesize, Alert, AlertSummary, BandTable, DerivedStatus, ExportDocument,
    History, Parameter, PerformanceStats, PredictionLabel, TelemetrySample, TimeSeries,
    TrendSynthesizer,
};
use crate::error::ExportError;
use crate::router::SampleConsumer;
use crate::weather::{WeatherState, WeatherTracker};

/// Consumer holding everything derived from the active source.
#[derive(Debug)]
pub struct Monitor {
    bands: Arc<BandTable>,
    latest: Option<TelemetrySample>,
    alerts: Vec<Alert>,
    prediction: PredictionLabel,
    status: Option<DerivedStatus>,
    history: History,
    synthesizer: TrendSynthesizer,
    weather: Option<WeatherTracker>,
    samples_seen: u64,
}

impl Monitor {
    pub fn new(bands: Arc<BandTable>) -> Self {
        Self {
            bands,
            latest: None,
            alerts: Vec::new(),
            prediction: PredictionLabel::Unresolved,
            status: None,
            history: History::new(),
            synthesizer: TrendSynthesizer::new(),
            weather: None,
            samples_seen: 0,
        }
    }

    /// Look up weather for each source's city.
    pub fn with_weather(mut self, tracker: WeatherTracker) -> Self {
        self.weather = Some(tracker);
        self
    }

    /// Use a specific synthesizer (e.g. a seeded one).
    pub fn with_synthesizer(mut self, synthesizer: TrendSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn bands(&self) -> &BandTable {
        &self.bands
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.latest.as_ref()
    }

    /// Alerts for the latest sample, in canonical parameter order.
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn summary(&self) -> AlertSummary {
        AlertSummary::from_alerts(&self.alerts)
    }

    pub fn prediction(&self) -> &PredictionLabel {
        &self.prediction
    }

    /// Current status; `None` until a sample or a known prediction arrives.
    pub fn status(&self) -> Option<&DerivedStatus> {
        self.status.as_ref()
    }

    /// Performance figures for the latest sample.
    pub fn performance(&self) -> Option<PerformanceStats> {
        let sample = self.latest.as_ref()?;
        let status = self.status.as_ref()?;
        Some(PerformanceStats::from_sample(sample, status))
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Samples received since the last reset.
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn weather(&self) -> Option<WeatherState> {
        self.weather.as_ref().map(|tracker| tracker.state())
    }

    /// Trend for one parameter.
    ///
    /// Measured history is used when enough samples have been received,
    /// otherwise the series is synthesized from the latest sample.
    pub fn trend(&mut self, parameter: Parameter, point_count: usize) -> Option<TimeSeries> {
        self.trend_at(parameter, point_count, Utc::now())
    }

    pub fn trend_at(
        &mut self,
        parameter: Parameter,
        point_count: usize,
        now: DateTime<Utc>,
    ) -> Option<TimeSeries> {
        if let Some(series) = self.history.series(parameter, point_count) {
            return Some(series);
        }
        let baseline = self.latest.as_ref()?.value(parameter);
        Some(
            self.synthesizer
                .synthesize_at(baseline, parameter, point_count, now),
        )
    }

    /// Trends for every parameter with the default point count.
    pub fn trends(&mut self) -> Vec<TimeSeries> {
        let now = Utc::now();
        Parameter::ALL
            .iter()
            .filter_map(|p| self.trend_at(*p, DEFAULT_POINT_COUNT, now))
            .collect()
    }

    /// Export the latest sample.
    pub fn export(&self, now: DateTime<Utc>) -> Result<ExportDocument, ExportError> {
        let sample = self.latest.as_ref().ok_or(ExportError::NoSample)?;
        Ok(ExportDocument::from_sample(sample, now))
    }

    fn refresh_status(&mut self) {
        let status = if self.latest.is_some() || self.prediction.known().is_some() {
            Some(synthesize(&self.alerts, &self.prediction))
        } else {
            None
        };

        let previous = self.status.as_ref().map(|s| s.label);
        let current = status.as_ref().map(|s| s.label);
        if previous != current {
            if let Some(status) = &status {
                info!(
                    status = %status.label,
                    score = status.score,
                    origin = ?status.origin,
                    "Status changed"
                );
            }
        }
        self.status = status;
    }

    fn request_weather(&self, previous_city: Option<&str>, city: &str) {
        let Some(tracker) = &self.weather else {
            return;
        };
        if previous_city == Some(city) {
            return;
        }
        if let Err(e) = tracker.request(city) {
            warn!(city = %city, error = %e, "Weather lookup not started");
        }
    }
}

impl SampleConsumer for Monitor {
    fn on_sample(&mut self, sample: &TelemetrySample) {
        let alerts = aggregate(sample, &self.bands);
        let escalated = alerts.iter().any(|alert| {
            !self
                .alerts
                .iter()
                .any(|old| old.parameter == alert.parameter && old.severity == alert.severity)
        });
        if escalated {
            let summary = AlertSummary::from_alerts(&alerts);
            warn!(
                source_id = %sample.source_id,
                errors = summary.errors,
                warnings = summary.warnings,
                "Threshold breached"
            );
        }

        let previous_city = self.latest.as_ref().map(|s| s.city.clone());
        self.request_weather(previous_city.as_deref(), &sample.city);

        self.history.record(sample);
        self.latest = Some(sample.clone());
        self.alerts = alerts;
        self.samples_seen += 1;
        self.refresh_status();

        debug!(
            source_id = %sample.source_id,
            alerts = self.alerts.len(),
            "Sample processed"
        );
    }

    fn on_removed(&mut self, source_id: &str) {
        info!(source_id = %source_id, "Source record removed");
        self.latest = None;
        self.alerts.clear();
        self.refresh_status();
    }

    fn on_prediction(&mut self, _source_id: &str, prediction: &PredictionLabel) {
        self.prediction = prediction.clone();
        self.refresh_status();
    }

    fn on_reset(&mut self, source_id: &str) {
        debug!(source_id = %source_id, "Resetting monitor state");
        self.latest = None;
        self.alerts.clear();
        self.prediction = PredictionLabel::Unresolved;
        self.status = None;
        self.history.clear();
        self.samples_seen = 0;
        if let Some(tracker) = &self.weather {
            tracker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Severity, StatusLabel, StatusOrigin};
    use chrono::TimeZone;

    fn monitor() -> Monitor {
        Monitor::new(Arc::new(BandTable::default())).with_synthesizer(TrendSynthesizer::with_seed(9))
    }

    fn healthy(id: &str) -> TelemetrySample {
        TelemetrySample {
            source_id: id.to_string(),
            timestamp_ms: 1_000,
            temperature_c: 65.0,
            oil_level_pct: 92.0,
            oil_moisture_pct: 5.0,
            output_voltage: 32.0,
            output_current: 2.0,
            h2_ppm: 5.0,
            co_ppm: 10.0,
            ch4_ppm: 3.0,
            city: "Colombo".to_string(),
        }
    }

    #[test]
    fn test_healthy_sample() {
        let mut monitor = monitor();
        monitor.on_sample(&healthy("T1"));

        assert!(monitor.alerts().is_empty());
        let status = monitor.status().unwrap();
        assert_eq!(status.label, StatusLabel::Healthy);
        assert_eq!(status.origin, StatusOrigin::Alerts);
        assert_eq!(status.prediction, "Unknown");
        assert_eq!(monitor.samples_seen(), 1);

        let performance = monitor.performance().unwrap();
        assert_eq!(performance.health_score, status.score);
        assert_eq!(performance.label, crate::data::PerformanceLabel::Good);
    }

    #[test]
    fn test_critical_sample() {
        let mut monitor = monitor();
        let mut sample = healthy("T1");
        sample.temperature_c = 105.0;
        sample.oil_level_pct = 60.0;
        monitor.on_sample(&sample);

        let params: Vec<Parameter> = monitor.alerts().iter().map(|a| a.parameter).collect();
        assert_eq!(params, vec![Parameter::Temperature, Parameter::OilLevel]);
        assert!(monitor.alerts().iter().all(|a| a.severity == Severity::Error));

        let status = monitor.status().unwrap();
        assert_eq!(status.label, StatusLabel::CriticalFault);
        assert!(status.score <= 50);
        assert_eq!(monitor.summary().errors, 2);
    }

    #[test]
    fn test_prediction_overrides_derived_label() {
        let mut monitor = monitor();
        monitor.on_sample(&healthy("T1"));
        monitor.on_prediction("T1", &PredictionLabel::Label("fault".to_string()));

        let status = monitor.status().unwrap();
        assert_eq!(status.label, StatusLabel::Fault);
        assert_eq!(status.origin, StatusOrigin::Prediction);
    }

    #[test]
    fn test_prediction_alone_yields_status() {
        let mut monitor = monitor();
        assert!(monitor.status().is_none());

        monitor.on_prediction("T1", &PredictionLabel::Unresolved);
        assert!(monitor.status().is_none());

        monitor.on_prediction("T1", &PredictionLabel::Label("Healthy".to_string()));
        assert_eq!(monitor.status().unwrap().label, StatusLabel::Healthy);
    }

    #[test]
    fn test_removed_clears_sample() {
        let mut monitor = monitor();
        let mut sample = healthy("T1");
        sample.h2_ppm = 60.0;
        monitor.on_sample(&sample);
        assert_eq!(monitor.alerts().len(), 1);

        monitor.on_removed("T1");
        assert!(monitor.latest().is_none());
        assert!(monitor.alerts().is_empty());
        assert!(monitor.status().is_none());
        assert!(matches!(
            monitor.export(Utc::now()),
            Err(ExportError::NoSample)
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut monitor = monitor();
        monitor.on_sample(&healthy("T1"));
        monitor.on_prediction("T1", &PredictionLabel::Label("Warning".to_string()));

        monitor.on_reset("T1");
        assert!(monitor.latest().is_none());
        assert!(monitor.status().is_none());
        assert!(monitor.performance().is_none());
        assert!(monitor.history().is_empty());
        assert_eq!(monitor.prediction(), &PredictionLabel::Unresolved);
        assert_eq!(monitor.samples_seen(), 0);
    }

    #[test]
    fn test_trend_falls_back_to_synthetic() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut monitor = monitor();
        assert!(monitor.trend_at(Parameter::Temperature, 24, now).is_none());

        monitor.on_sample(&healthy("T1"));
        let synthetic = monitor.trend_at(Parameter::Temperature, 24, now).unwrap();
        assert!(synthetic.synthetic);
        assert_eq!(synthetic.len(), 24);

        monitor.on_sample(&healthy("T1"));
        let measured = monitor.trend_at(Parameter::Temperature, 2, now).unwrap();
        assert!(!measured.synthetic);
        assert_eq!(measured.len(), 2);
    }

    #[test]
    fn test_trends_cover_every_parameter() {
        let mut monitor = monitor();
        monitor.on_sample(&healthy("T1"));
        assert_eq!(monitor.trends().len(), Parameter::ALL.len());
    }

    #[test]
    fn test_export_latest() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut monitor = monitor();
        monitor.on_sample(&healthy("T3"));

        let doc = monitor.export(now).unwrap();
        assert_eq!(doc.source_id, "T3");
        assert_eq!(doc.parameters, healthy("T3"));
        assert_eq!(doc.file_name(), "transformer-T3-2024-05-01.json");
    }

    #[derive(Debug)]
    struct FixedWeather;

    #[async_trait::async_trait]
    impl crate::weather::WeatherProvider for FixedWeather {
        async fn current_weather(
            &self,
            city: &str,
        ) -> Result<crate::weather::WeatherSnapshot, crate::error::WeatherError> {
            Err(crate::error::WeatherError::Request(format!("offline: {}", city)))
        }
    }

    #[tokio::test]
    async fn test_city_change_requests_weather() {
        let tracker = WeatherTracker::new(Arc::new(FixedWeather), std::time::Duration::from_secs(1));
        let mut rx = tracker.subscribe();
        let mut monitor = monitor().with_weather(tracker);

        monitor.on_sample(&healthy("T1"));
        assert_eq!(monitor.weather().unwrap().city.as_deref(), Some("Colombo"));

        while rx.borrow_and_update().in_flight {
            rx.changed().await.unwrap();
        }
        let state = monitor.weather().unwrap();
        assert!(matches!(state.error, Some(crate::error::WeatherError::Request(_))));
        assert!(state.last.is_none());
    }

    #[derive(Debug)]
    struct SlowWeather;

    #[async_trait::async_trait]
    impl crate::weather::WeatherProvider for SlowWeather {
        async fn current_weather(
            &self,
            city: &str,
        ) -> Result<crate::weather::WeatherSnapshot, crate::error::WeatherError> {
            use crate::weather::{CurrentWeather, WeatherCondition, WeatherLocation};

            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(crate::weather::WeatherSnapshot {
                location: WeatherLocation {
                    name: city.to_string(),
                    region: String::new(),
                    country: String::new(),
                },
                current: CurrentWeather {
                    temp_c: 29.0,
                    feelslike_c: 31.0,
                    condition: WeatherCondition {
                        text: "Sunny".to_string(),
                        icon: String::new(),
                    },
                    humidity: 60.0,
                    wind_kph: 8.0,
                    pressure_mb: 1012.0,
                    last_updated: String::new(),
                    uv: 7.0,
                    vis_km: 10.0,
                    gust_kph: 12.0,
                    precip_mm: 0.0,
                    cloud: 20.0,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_reset_drops_weather_of_retired_source() {
        let tracker = WeatherTracker::new(Arc::new(SlowWeather), std::time::Duration::from_secs(1));
        let mut monitor = monitor().with_weather(tracker);

        monitor.on_sample(&healthy("A"));
        assert!(monitor.weather().unwrap().in_flight);
        monitor.on_reset("A");

        // The lookup for A's city finishes after the switch
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(monitor.weather(), Some(WeatherState::default()));

        // Same city on the new source is looked up again
        monitor.on_sample(&healthy("B"));
        assert_eq!(monitor.weather().unwrap().city.as_deref(), Some("Colombo"));
    }

    #[tokio::test]
    async fn test_unknown_city_drops_previous_weather() {
        let tracker = WeatherTracker::new(Arc::new(SlowWeather), std::time::Duration::from_secs(1));
        let mut rx = tracker.subscribe();
        let mut monitor = monitor().with_weather(tracker);

        monitor.on_sample(&healthy("A"));
        while rx.borrow_and_update().in_flight {
            rx.changed().await.unwrap();
        }
        assert!(monitor.weather().unwrap().last.is_some());

        let mut sample = healthy("A");
        sample.city = "Unknown".to_string();
        monitor.on_sample(&sample);
        assert_eq!(monitor.weather(), Some(WeatherState::default()));
    }
}
