//! Alert aggregation over a normalized sample.

use serde::{Deserialize, Serialize};

use super::sample::TelemetrySample;
use super::threshold::{BandTable, Parameter, Severity};

/// Display color for error alerts.
pub const ERROR_COLOR: &str = "#ef4444";
/// Display color for warning alerts.
pub const WARNING_COLOR: &str = "#f59e0b";
/// Display color when nothing is wrong.
pub const OK_COLOR: &str = "#10b981";

/// One parameter violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub parameter: Parameter,
    /// Always [`Severity::Warning`] or [`Severity::Error`].
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub timestamp_ms: u64,
}

impl Alert {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn color(&self) -> &'static str {
        severity_color(self.severity)
    }
}

/// Display color for a severity.
pub fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => ERROR_COLOR,
        Severity::Warning => WARNING_COLOR,
        Severity::None => OK_COLOR,
    }
}

/// Evaluate every configured parameter of `sample` and collect alerts.
///
/// Parameters are visited in canonical order and the result keeps that
/// order, so repeated calls on the same input produce identical lists. At
/// most one alert is emitted per parameter.
pub fn aggregate(sample: &TelemetrySample, bands: &BandTable) -> Vec<Alert> {
    bands
        .iter()
        .filter_map(|(parameter, band)| {
            let value = parameter.value(sample);
            match band.evaluate(value) {
                Severity::None => None,
                severity => Some(Alert {
                    parameter,
                    severity,
                    message: message(parameter, severity, value),
                    value,
                    timestamp_ms: sample.timestamp_ms,
                }),
            }
        })
        .collect()
}

fn message(parameter: Parameter, severity: Severity, value: f64) -> String {
    let critical = severity == Severity::Error;
    match parameter {
        Parameter::Temperature if critical => format!("Critical: High temperature ({}°C)", value),
        Parameter::Temperature => format!("Warning: Elevated temperature ({}°C)", value),
        Parameter::OilLevel if critical => format!("Critical: Low oil level ({}%)", value),
        Parameter::OilLevel => format!("Warning: Oil level decreasing ({}%)", value),
        Parameter::OilMoisture if critical => format!("Critical: High oil moisture ({}%)", value),
        Parameter::OilMoisture => format!("Warning: Elevated oil moisture ({}%)", value),
        Parameter::H2 | Parameter::Co | Parameter::Ch4 if critical => format!(
            "Critical: High {} concentration ({} ppm)",
            parameter.label(),
            value
        ),
        Parameter::H2 | Parameter::Co | Parameter::Ch4 => {
            format!("Warning: Elevated {} level ({} ppm)", parameter.label(), value)
        }
        Parameter::OutputVoltage if critical => format!("Critical: Voltage out of range ({} V)", value),
        Parameter::OutputVoltage => format!("Warning: Voltage deviation ({} V)", value),
        Parameter::OutputCurrent if critical => format!("Critical: High current ({} A)", value),
        Parameter::OutputCurrent => format!("Warning: Elevated current ({} A)", value),
    }
}

/// Counts of alerts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub errors: usize,
    pub warnings: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        alerts.iter().fold(Self::default(), |mut acc, alert| {
            match alert.severity {
                Severity::Error => acc.errors += 1,
                Severity::Warning => acc.warnings += 1,
                Severity::None => {}
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.errors + self.warnings
    }

    /// The worst severity present.
    pub fn worst(&self) -> Severity {
        if self.errors > 0 {
            Severity::Error
        } else if self.warnings > 0 {
            Severity::Warning
        } else {
            Severity::None
        }
    }
}
