//! Aggregate health status derived from alerts and the external prediction.
//!
//! The prediction store delivers its status in whatever shape the writer
//! chose: a bare string, an object with a `Status` or `status` field (which
//! may itself be nested), or nothing at all. [`PredictionLabel::resolve`] is
//! the single place that shape is interpreted; everything downstream sees a
//! tagged value.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

use super::alert::{severity_color, Alert, AlertSummary};
use super::sample::TelemetrySample;
use super::threshold::{Parameter, Severity};

/// Label shown when the prediction could not be resolved.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Nested `status` objects deeper than this are treated as unresolved.
const MAX_STATUS_DEPTH: usize = 4;

/// Warning alerts at or above this count escalate to a fault.
const FAULT_WARNING_COUNT: usize = 3;

/// Known status labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusLabel {
    Healthy,
    Warning,
    Fault,
    CriticalFault,
    /// Accepted only as an external override.
    Danger,
}

impl StatusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::Healthy => "Healthy",
            StatusLabel::Warning => "Warning",
            StatusLabel::Fault => "Fault",
            StatusLabel::CriticalFault => "Critical Fault",
            StatusLabel::Danger => "Danger",
        }
    }

    /// Parse a label case-insensitively, tolerating `_`, `-` and extra
    /// whitespace between words.
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();

        match key.as_str() {
            "healthy" => Some(StatusLabel::Healthy),
            "warning" => Some(StatusLabel::Warning),
            "fault" => Some(StatusLabel::Fault),
            "critical fault" => Some(StatusLabel::CriticalFault),
            "danger" => Some(StatusLabel::Danger),
            _ => None,
        }
    }

    /// Base score before per-parameter penalties.
    pub fn base_score(&self) -> i32 {
        match self {
            StatusLabel::Healthy => 90,
            StatusLabel::Warning => 65,
            StatusLabel::Fault => 40,
            StatusLabel::CriticalFault | StatusLabel::Danger => 15,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StatusLabel::Healthy => Severity::None,
            StatusLabel::Warning => Severity::Warning,
            StatusLabel::Fault | StatusLabel::CriticalFault | StatusLabel::Danger => Severity::Error,
        }
    }

    pub fn color(&self) -> &'static str {
        severity_color(self.severity())
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The external prediction after boundary normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PredictionLabel {
    Label(String),
    #[default]
    Unresolved,
}

impl PredictionLabel {
    /// Resolve a raw prediction value into a label.
    ///
    /// Strings are used as-is (trimmed). Objects are searched for `Status`
    /// then `status`, recursively. Anything else is unresolved; a structured
    /// value is never turned into display text.
    pub fn resolve(raw: Option<&Value>) -> Self {
        raw.and_then(|v| resolve_value(v, 0))
            .map(PredictionLabel::Label)
            .unwrap_or(PredictionLabel::Unresolved)
    }

    /// The label if it names a known status.
    pub fn known(&self) -> Option<StatusLabel> {
        match self {
            PredictionLabel::Label(s) => StatusLabel::parse(s),
            PredictionLabel::Unresolved => None,
        }
    }

    /// Display text; `"Unknown"` when unresolved.
    pub fn display(&self) -> &str {
        match self {
            PredictionLabel::Label(s) => s,
            PredictionLabel::Unresolved => UNKNOWN_LABEL,
        }
    }
}

fn resolve_value(value: &Value, depth: usize) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Object(fields) if depth < MAX_STATUS_DEPTH => ["Status", "status"]
            .iter()
            .filter_map(|key| fields.get(*key))
            .find_map(|nested| resolve_value(nested, depth + 1)),
        _ => None,
    }
}

/// Where the status label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusOrigin {
    Prediction,
    Alerts,
}

/// Aggregate health signal consumed by every view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStatus {
    pub label: StatusLabel,
    /// Health score, always within 0..=100.
    pub score: u8,
    pub color: &'static str,
    /// Resolved prediction text for display, `"Unknown"` when unresolved.
    pub prediction: String,
    pub origin: StatusOrigin,
}

/// Score deducted for a breached parameter.
fn penalty(parameter: Parameter) -> i32 {
    match parameter {
        Parameter::Temperature => 15,
        Parameter::OilLevel => 20,
        Parameter::H2 => 10,
        Parameter::Co => 8,
        Parameter::Ch4 => 7,
        Parameter::OilMoisture | Parameter::OutputVoltage | Parameter::OutputCurrent => 5,
    }
}

/// Extra deduction when a breach is in the danger band.
const ERROR_SURCHARGE: i32 = 5;

/// Label implied by the alert list alone.
pub fn label_from_alerts(alerts: &[Alert]) -> StatusLabel {
    let summary = AlertSummary::from_alerts(alerts);

    if alerts.iter().any(|a| a.is_error() && a.parameter.is_critical()) {
        StatusLabel::CriticalFault
    } else if summary.errors > 0 || summary.warnings >= FAULT_WARNING_COUNT {
        StatusLabel::Fault
    } else if summary.warnings > 0 {
        StatusLabel::Warning
    } else {
        StatusLabel::Healthy
    }
}

/// Combine alerts and the external prediction into one status.
///
/// A known prediction label takes precedence for the label; the score always
/// reflects the alerts on top of that label's base weight.
pub fn synthesize(alerts: &[Alert], prediction: &PredictionLabel) -> DerivedStatus {
    let (label, origin) = match prediction.known() {
        Some(label) => (label, StatusOrigin::Prediction),
        None => (label_from_alerts(alerts), StatusOrigin::Alerts),
    };

    let deductions: i32 = alerts
        .iter()
        .map(|a| penalty(a.parameter) + if a.is_error() { ERROR_SURCHARGE } else { 0 })
        .sum();
    let score = (label.base_score() - deductions).clamp(0, 100) as u8;

    DerivedStatus {
        label,
        score,
        color: label.color(),
        prediction: prediction.display().to_string(),
        origin,
    }
}

/// Overall performance rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PerformanceLabel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PerformanceLabel {
    /// Rate a 0..=100 reliability figure.
    pub fn from_reliability(reliability: f64) -> Self {
        if reliability >= 90.0 {
            PerformanceLabel::Excellent
        } else if reliability >= 80.0 {
            PerformanceLabel::Good
        } else if reliability >= 70.0 {
            PerformanceLabel::Fair
        } else {
            PerformanceLabel::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceLabel::Excellent => "Excellent",
            PerformanceLabel::Good => "Good",
            PerformanceLabel::Fair => "Fair",
            PerformanceLabel::Poor => "Poor",
        }
    }
}

impl fmt::Display for PerformanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating temperature with no efficiency penalty.
const NOMINAL_TEMPERATURE_C: f64 = 65.0;
/// Centre of the default output voltage band.
const NOMINAL_OUTPUT_VOLTAGE: f64 = 32.0;
/// Current drawn at 100% load.
const RATED_OUTPUT_CURRENT: f64 = 3.5;
/// Load factor treated as perfectly stable.
const TARGET_LOAD_FACTOR: f64 = 75.0;

/// Per-sample performance figures shown alongside the health score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    /// At most 98.
    pub efficiency: f64,
    /// Within 20..=100.
    pub load_factor: f64,
    pub health_score: u8,
    /// Weighted blend of health, efficiency and load stability.
    pub reliability: f64,
    pub label: PerformanceLabel,
}

impl PerformanceStats {
    pub fn from_sample(sample: &TelemetrySample, status: &DerivedStatus) -> Self {
        let efficiency = efficiency(sample);
        let load_factor = load_factor(sample);
        let load_stability = 100.0 - (load_factor - TARGET_LOAD_FACTOR).abs();
        let reliability =
            0.4 * f64::from(status.score) + 0.3 * efficiency + 0.3 * load_stability;

        Self {
            efficiency,
            load_factor,
            health_score: status.score,
            reliability,
            label: PerformanceLabel::from_reliability(reliability),
        }
    }
}

fn efficiency(sample: &TelemetrySample) -> f64 {
    let temperature = (100.0 - (sample.temperature_c - NOMINAL_TEMPERATURE_C).abs() * 0.5).max(0.0);
    let oil = sample.oil_level_pct.min(100.0);
    let gas = (sample.h2_ppm / 10.0 + sample.co_ppm / 50.0 + sample.ch4_ppm / 20.0).max(0.0);
    ((95.0 + temperature + oil - gas) / 3.0).min(98.0)
}

fn load_factor(sample: &TelemetrySample) -> f64 {
    let load_pct = sample.output_current / RATED_OUTPUT_CURRENT * 100.0;
    let voltage_drift = (sample.output_voltage - NOMINAL_OUTPUT_VOLTAGE).abs() * 10.0;
    (load_pct - voltage_drift).clamp(20.0, 100.0)
}
