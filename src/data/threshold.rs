//! Threshold bands and severity evaluation.
//!
//! A [`BandTable`] is built once (from defaults, optionally overlaid with
//! configured bands), validated, and then shared read-only. Evaluation is a
//! pure function of a value and its band.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::sample::TelemetrySample;
use crate::error::ConfigError;

/// One monitored numeric parameter of a [`TelemetrySample`].
///
/// The declaration order is the canonical evaluation order, so `Ord` and
/// [`Parameter::ALL`] agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(alias = "temperature")]
    Temperature,
    #[serde(alias = "oillevel", alias = "oil_level")]
    OilLevel,
    #[serde(alias = "oilmoisture", alias = "oil_moisture")]
    OilMoisture,
    #[serde(alias = "h2")]
    H2,
    #[serde(rename = "CO", alias = "co")]
    Co,
    #[serde(rename = "CH4", alias = "ch4")]
    Ch4,
    #[serde(alias = "outputvoltage", alias = "output_voltage")]
    OutputVoltage,
    #[serde(alias = "outputcurrent", alias = "output_current")]
    OutputCurrent,
}

impl Parameter {
    /// All parameters in canonical order.
    pub const ALL: [Parameter; 8] = [
        Parameter::Temperature,
        Parameter::OilLevel,
        Parameter::OilMoisture,
        Parameter::H2,
        Parameter::Co,
        Parameter::Ch4,
        Parameter::OutputVoltage,
        Parameter::OutputCurrent,
    ];

    /// Stable identifier, matching the canonical raw field name.
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Temperature => "Temperature",
            Parameter::OilLevel => "OilLevel",
            Parameter::OilMoisture => "OilMoisture",
            Parameter::H2 => "H2",
            Parameter::Co => "CO",
            Parameter::Ch4 => "CH4",
            Parameter::OutputVoltage => "OutputVoltage",
            Parameter::OutputCurrent => "OutputCurrent",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Parameter::Temperature => "Temperature",
            Parameter::OilLevel => "Oil Level",
            Parameter::OilMoisture => "Oil Moisture",
            Parameter::H2 => "Hydrogen",
            Parameter::Co => "Carbon Monoxide",
            Parameter::Ch4 => "Methane",
            Parameter::OutputVoltage => "Output Voltage",
            Parameter::OutputCurrent => "Output Current",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Parameter::Temperature => "°C",
            Parameter::OilLevel | Parameter::OilMoisture => "%",
            Parameter::H2 | Parameter::Co | Parameter::Ch4 => "ppm",
            Parameter::OutputVoltage => "V",
            Parameter::OutputCurrent => "A",
        }
    }

    /// Read this parameter's value from a sample.
    pub fn value(&self, sample: &TelemetrySample) -> f64 {
        match self {
            Parameter::Temperature => sample.temperature_c,
            Parameter::OilLevel => sample.oil_level_pct,
            Parameter::OilMoisture => sample.oil_moisture_pct,
            Parameter::H2 => sample.h2_ppm,
            Parameter::Co => sample.co_ppm,
            Parameter::Ch4 => sample.ch4_ppm,
            Parameter::OutputVoltage => sample.output_voltage,
            Parameter::OutputCurrent => sample.output_current,
        }
    }

    /// Parameters whose error alerts escalate the status to a critical fault.
    pub fn is_critical(&self) -> bool {
        matches!(self, Parameter::Temperature | Parameter::OilLevel)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordinal classification of a parameter's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Warning,
    Error,
}

impl Severity {
    /// Returns a short symbol for log output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Severity::None => "OK",
            Severity::Warning => "WARN",
            Severity::Error => "ERR",
        }
    }
}

/// Inclusive bounds of a two-sided band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn excludes(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

/// Warning/danger thresholds for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThresholdBand {
    /// Value should stay below the bounds; breach when `value >= bound`.
    Above { warning: f64, danger: f64 },
    /// Value should stay above the bounds (reserve levels); breach when
    /// `value <= bound`.
    Below { warning: f64, danger: f64 },
    /// Value should stay inside the bounds; breach when outside.
    Range { warning: Bounds, danger: Bounds },
}

impl ThresholdBand {
    /// Classify a value against this band.
    pub fn evaluate(&self, value: f64) -> Severity {
        if !value.is_finite() {
            return Severity::None;
        }
        match *self {
            ThresholdBand::Above { warning, danger } => {
                if value >= danger {
                    Severity::Error
                } else if value >= warning {
                    Severity::Warning
                } else {
                    Severity::None
                }
            }
            ThresholdBand::Below { warning, danger } => {
                if value <= danger {
                    Severity::Error
                } else if value <= warning {
                    Severity::Warning
                } else {
                    Severity::None
                }
            }
            ThresholdBand::Range { warning, danger } => {
                if danger.excludes(value) {
                    Severity::Error
                } else if warning.excludes(value) {
                    Severity::Warning
                } else {
                    Severity::None
                }
            }
        }
    }

    /// Check that the danger band contains the warning band.
    pub fn validate(&self, parameter: Parameter) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBand {
            parameter,
            reason: reason.to_string(),
        };

        match *self {
            ThresholdBand::Above { warning, danger } => {
                if !warning.is_finite() || !danger.is_finite() {
                    return Err(invalid("bounds must be finite"));
                }
                if danger < warning {
                    return Err(invalid("danger must be >= warning"));
                }
            }
            ThresholdBand::Below { warning, danger } => {
                if !warning.is_finite() || !danger.is_finite() {
                    return Err(invalid("bounds must be finite"));
                }
                if danger > warning {
                    return Err(invalid("danger must be <= warning"));
                }
            }
            ThresholdBand::Range { warning, danger } => {
                let all = [warning.min, warning.max, danger.min, danger.max];
                if all.iter().any(|v| !v.is_finite()) {
                    return Err(invalid("bounds must be finite"));
                }
                if warning.min > warning.max || danger.min > danger.max {
                    return Err(invalid("min must be <= max"));
                }
                if danger.min > warning.min || danger.max < warning.max {
                    return Err(invalid("danger range must contain the warning range"));
                }
            }
        }
        Ok(())
    }
}

/// Classify `value` against `band`.
pub fn evaluate(value: f64, band: &ThresholdBand) -> Severity {
    band.evaluate(value)
}

/// Immutable, validated mapping from parameter to band.
///
/// Iteration follows the canonical parameter order. Parameters without a
/// band are never evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandTable {
    bands: BTreeMap<Parameter, ThresholdBand>,
}

impl BandTable {
    /// Build a table, validating every band.
    pub fn new<I>(bands: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (Parameter, ThresholdBand)>,
    {
        let bands: BTreeMap<_, _> = bands.into_iter().collect();
        for (parameter, band) in &bands {
            band.validate(*parameter)?;
        }
        Ok(Self { bands })
    }

    /// A table with no bands; nothing ever alerts.
    pub fn empty() -> Self {
        Self {
            bands: BTreeMap::new(),
        }
    }

    /// Return a new table with `overrides` replacing the matching bands.
    pub fn with_overrides<I>(&self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (Parameter, ThresholdBand)>,
    {
        let mut bands = self.bands.clone();
        bands.extend(overrides);
        Self::new(bands)
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ThresholdBand> {
        self.bands.get(&parameter)
    }

    /// Iterate configured bands in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, &ThresholdBand)> {
        self.bands.iter().map(|(p, b)| (*p, b))
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Classify a parameter value; parameters without a band are `None`.
    pub fn evaluate(&self, parameter: Parameter, value: f64) -> Severity {
        self.get(parameter)
            .map_or(Severity::None, |band| band.evaluate(value))
    }
}

impl Default for BandTable {
    fn default() -> Self {
        let bands = [
            (
                Parameter::Temperature,
                ThresholdBand::Above {
                    warning: 80.0,
                    danger: 100.0,
                },
            ),
            (
                Parameter::OilLevel,
                ThresholdBand::Below {
                    warning: 85.0,
                    danger: 70.0,
                },
            ),
            (
                Parameter::OilMoisture,
                ThresholdBand::Above {
                    warning: 15.0,
                    danger: 20.0,
                },
            ),
            (
                Parameter::H2,
                ThresholdBand::Above {
                    warning: 30.0,
                    danger: 50.0,
                },
            ),
            (
                Parameter::Co,
                ThresholdBand::Above {
                    warning: 50.0,
                    danger: 80.0,
                },
            ),
            (
                Parameter::Ch4,
                ThresholdBand::Above {
                    warning: 25.0,
                    danger: 40.0,
                },
            ),
            (
                Parameter::OutputVoltage,
                ThresholdBand::Range {
                    warning: Bounds::new(28.0, 36.0),
                    danger: Bounds::new(24.0, 40.0),
                },
            ),
            (
                Parameter::OutputCurrent,
                ThresholdBand::Above {
                    warning: 4.0,
                    danger: 5.0,
                },
            ),
        ];

        Self {
            bands: bands.into_iter().collect(),
        }
    }
}
