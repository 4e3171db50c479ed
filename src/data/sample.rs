//! Canonical telemetry samples and raw-record normalization.
//!
//! Raw records come from the backing store as arbitrary JSON objects whose
//! field names vary with the schema version that wrote them. Normalization
//! maps every known alias onto one canonical shape and never fails: missing
//! or unparseable numbers become `0`, a missing city becomes `"Unknown"`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::threshold::Parameter;

/// City used when a record does not name one.
pub const UNKNOWN_CITY: &str = "Unknown";

/// One normalized, timestamped reading from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub source_id: String,
    /// Time of receipt in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub temperature_c: f64,
    pub oil_level_pct: f64,
    pub oil_moisture_pct: f64,
    pub output_voltage: f64,
    pub output_current: f64,
    pub h2_ppm: f64,
    pub co_ppm: f64,
    pub ch4_ppm: f64,
    pub city: String,
}

impl TelemetrySample {
    /// A sample with every reading at zero and an unknown city.
    pub fn empty(source_id: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp_ms,
            temperature_c: 0.0,
            oil_level_pct: 0.0,
            oil_moisture_pct: 0.0,
            output_voltage: 0.0,
            output_current: 0.0,
            h2_ppm: 0.0,
            co_ppm: 0.0,
            ch4_ppm: 0.0,
            city: UNKNOWN_CITY.to_string(),
        }
    }

    /// Read a parameter's value.
    pub fn value(&self, parameter: Parameter) -> f64 {
        parameter.value(self)
    }

    /// Iterate `(parameter, value)` pairs in canonical order.
    pub fn readings(&self) -> impl Iterator<Item = (Parameter, f64)> + '_ {
        Parameter::ALL.iter().map(move |p| (*p, p.value(self)))
    }

    fn slot_mut(&mut self, parameter: Parameter) -> &mut f64 {
        match parameter {
            Parameter::Temperature => &mut self.temperature_c,
            Parameter::OilLevel => &mut self.oil_level_pct,
            Parameter::OilMoisture => &mut self.oil_moisture_pct,
            Parameter::H2 => &mut self.h2_ppm,
            Parameter::Co => &mut self.co_ppm,
            Parameter::Ch4 => &mut self.ch4_ppm,
            Parameter::OutputVoltage => &mut self.output_voltage,
            Parameter::OutputCurrent => &mut self.output_current,
        }
    }
}

/// Raw field names accepted for each parameter, canonical name first.
///
/// Older writers used camelCase or snake_case keys, and one branch wrote
/// `Voltage`/`Current` instead of the output-prefixed names.
const FIELD_ALIASES: &[(Parameter, &[&str])] = &[
    (
        Parameter::Temperature,
        &["Temperature", "temperature", "temperature_c", "temperatureC"],
    ),
    (Parameter::OilLevel, &["OilLevel", "oilLevel", "oil_level"]),
    (
        Parameter::OilMoisture,
        &["OilMoisture", "oilMoisture", "oil_moisture"],
    ),
    (Parameter::H2, &["H2", "h2"]),
    (Parameter::Co, &["CO", "co"]),
    (Parameter::Ch4, &["CH4", "ch4"]),
    (
        Parameter::OutputVoltage,
        &["OutputVoltage", "outputVoltage", "output_voltage", "Voltage", "voltage"],
    ),
    (
        Parameter::OutputCurrent,
        &["OutputCurrent", "outputCurrent", "output_current", "Current", "current"],
    ),
];

const CITY_ALIASES: &[&str] = &["city", "City"];

/// Normalize a raw record into a [`TelemetrySample`].
///
/// Returns `None` when the record is absent or JSON `null` (the source was
/// deleted). Any other value yields a sample; non-object values simply
/// produce all defaults. `received_at_ms` is stamped as the sample time,
/// upstream timestamps are ignored.
pub fn normalize(
    source_id: &str,
    raw: Option<&Value>,
    received_at_ms: u64,
) -> Option<TelemetrySample> {
    let raw = match raw {
        None | Some(Value::Null) => return None,
        Some(raw) => raw,
    };

    let mut sample = TelemetrySample::empty(source_id, received_at_ms);

    let Some(fields) = raw.as_object() else {
        return Some(sample);
    };

    for (parameter, aliases) in FIELD_ALIASES {
        *sample.slot_mut(*parameter) = coerce_number(lookup(fields, aliases));
    }

    if let Some(city) = lookup(fields, CITY_ALIASES)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        sample.city = city.to_string();
    }

    Some(sample)
}

/// First alias present with a non-null value.
fn lookup<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|key| fields.get(*key).filter(|v| !v.is_null()))
}

/// Parse as number, defaulting to 0 on failure, absence or non-finite input.
fn coerce_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
