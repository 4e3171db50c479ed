//! JSON export of the latest sample.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::TelemetrySample;
use crate::error::ExportError;

/// Export metadata block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub export_date: DateTime<Utc>,
    pub data_points: usize,
}

/// Document written when a user exports a source's current reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub parameters: TelemetrySample,
    pub metadata: ExportMetadata,
}

impl ExportDocument {
    /// Wrap a sample for export at `now`.
    pub fn from_sample(sample: &TelemetrySample, now: DateTime<Utc>) -> Self {
        Self {
            source_id: sample.source_id.clone(),
            timestamp: now,
            parameters: sample.clone(),
            metadata: ExportMetadata {
                export_date: now,
                data_points: 1,
            },
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn parse(json: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Suggested file name: `transformer-{id}-{YYYY-MM-DD}.json`.
    pub fn file_name(&self) -> String {
        format!(
            "transformer-{}-{}.json",
            self.source_id,
            self.metadata.export_date.format("%Y-%m-%d")
        )
    }

    /// Write the pretty-printed document to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), ExportError> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}
