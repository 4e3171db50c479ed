//! Trend series for charting.
//!
//! [`History`] keeps the samples actually received for the selected source.
//! When the backing store supplies no history and not enough has been
//! observed locally, [`TrendSynthesizer`] produces a simulated series. Every
//! [`TimeSeries`] carries a `synthetic` flag and consumers must surface the
//! caveat whenever it is set.

use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::PI;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::sample::TelemetrySample;
use super::threshold::Parameter;

/// Default number of points in a trend series.
pub const DEFAULT_POINT_COUNT: usize = 24;

/// Spacing between synthesized points.
const HOUR_MS: i64 = 3_600_000;

/// Sinusoid amplitude as a fraction of the baseline.
const AMPLITUDE_RATIO: f64 = 0.12;

/// Total jitter width as a fraction of the baseline (±half of this).
const JITTER_RATIO: f64 = 0.02;

/// Maximum number of received samples to keep.
const MAX_HISTORY_SIZE: usize = 60;

/// Caveat attached to every synthesized series.
pub const SYNTHETIC_CAVEAT: &str =
    "Simulated from the latest reading; not measured history";

/// One point of a trend series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A chartable series for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub parameter: Parameter,
    pub points: Vec<TrendPoint>,
    /// `true` when the series is simulated rather than measured.
    pub synthetic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caveat: Option<&'static str>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Produces simulated trend series from a baseline value.
///
/// The RNG is owned so tests can seed it; production code uses entropy.
#[derive(Debug, Clone)]
pub struct TrendSynthesizer {
    rng: StdRng,
}

impl Default for TrendSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendSynthesizer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic synthesizer for reproducible output.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Synthesize `point_count` hourly points ending now.
    pub fn synthesize(
        &mut self,
        baseline: f64,
        parameter: Parameter,
        point_count: usize,
    ) -> TimeSeries {
        self.synthesize_at(baseline, parameter, point_count, Utc::now())
    }

    /// Synthesize `point_count` hourly points ending at `now`.
    ///
    /// Each value is `baseline + 0.12·baseline·sin((hour − 6)·π/12)` plus
    /// uniform jitter within ±1% of the baseline, rounded to two decimals.
    pub fn synthesize_at(
        &mut self,
        baseline: f64,
        parameter: Parameter,
        point_count: usize,
        now: DateTime<Utc>,
    ) -> TimeSeries {
        let baseline = if baseline.is_finite() { baseline } else { 0.0 };
        let now_ms = now.timestamp_millis();

        let points = (0..point_count)
            .map(|index| {
                let offset = (point_count - 1 - index) as i64;
                let timestamp_ms = now_ms - offset * HOUR_MS;
                let hour = Utc
                    .timestamp_millis_opt(timestamp_ms)
                    .single()
                    .map_or(0, |t| t.hour()) as f64;

                let wave = ((hour - 6.0) * PI / 12.0).sin() * baseline * AMPLITUDE_RATIO;
                let jitter = (self.rng.gen::<f64>() - 0.5) * baseline.abs() * JITTER_RATIO;

                TrendPoint {
                    timestamp_ms,
                    value: round2(baseline + wave + jitter),
                }
            })
            .collect();

        TimeSeries {
            parameter,
            points,
            synthetic: true,
            caveat: Some(SYNTHETIC_CAVEAT),
        }
    }

    /// One synthesized series per parameter, using the sample as baseline.
    pub fn synthesize_sample(
        &mut self,
        sample: &TelemetrySample,
        point_count: usize,
        now: DateTime<Utc>,
    ) -> Vec<TimeSeries> {
        sample
            .readings()
            .map(|(parameter, value)| self.synthesize_at(value, parameter, point_count, now))
            .collect()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Samples received for the current source, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    values: BTreeMap<Parameter, VecDeque<TrendPoint>>,
    len: usize,
}

impl History {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received sample.
    pub fn record(&mut self, sample: &TelemetrySample) {
        for (parameter, value) in sample.readings() {
            let series = self.values.entry(parameter).or_default();
            series.push_back(TrendPoint {
                timestamp_ms: sample.timestamp_ms as i64,
                value,
            });
            if series.len() > MAX_HISTORY_SIZE {
                series.pop_front();
            }
        }
        self.len = (self.len + 1).min(MAX_HISTORY_SIZE);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.len = 0;
    }

    /// The most recent `point_count` measured points, if that many exist.
    pub fn series(&self, parameter: Parameter, point_count: usize) -> Option<TimeSeries> {
        let values = self.values.get(&parameter)?;
        if point_count == 0 || values.len() < point_count {
            return None;
        }
        let points = values.iter().skip(values.len() - point_count).copied().collect();
        Some(TimeSeries {
            parameter,
            points,
            synthetic: false,
            caveat: None,
        })
    }
}
