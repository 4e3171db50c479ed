//! Sample normalization, threshold evaluation and derived state.
//!
//! ## Submodules
//!
//! - [`sample`]: Canonical [`TelemetrySample`] and the raw-record normalizer
//! - [`threshold`]: [`Parameter`], [`Severity`], [`ThresholdBand`] and the immutable [`BandTable`]
//! - [`alert`]: Ordered [`Alert`] aggregation over a sample
//! - [`status`]: [`DerivedStatus`] synthesis, prediction resolution and [`PerformanceStats`]
//! - [`trend`]: Measured [`History`] and the [`TrendSynthesizer`] fallback
//! - [`export`]: JSON [`ExportDocument`]
//! - [`duration`]: Parsing of duration strings (e.g., "1s", "500ms")
//!
//! ## Data Flow
//!
//! ```text
//! raw JSON record
//!        │
//!        ▼
//! sample::normalize() ──▶ TelemetrySample
//!        │
//!        ├──▶ alert::aggregate(BandTable) ──▶ Vec<Alert>
//!        │                                        │
//!        │              PredictionLabel ──────────┤
//!        │                                        ▼
//!        │                               status::synthesize() ──▶ DerivedStatus
//!        │
//!        └──▶ History::record() / TrendSynthesizer (for charts)
//! ```

pub mod alert;
pub mod duration;
pub mod export;
pub mod sample;
pub mod status;
pub mod threshold;
pub mod trend;

pub use alert::{aggregate, Alert, AlertSummary};
pub use export::{ExportDocument, ExportMetadata};
pub use sample::{normalize, TelemetrySample};
pub use status::{
    synthesize, DerivedStatus, PerformanceLabel, PerformanceStats, PredictionLabel, StatusLabel,
    StatusOrigin,
};
pub use threshold::{evaluate, BandTable, Bounds, Parameter, Severity, ThresholdBand};
pub use trend::{History, TimeSeries, TrendPoint, TrendSynthesizer};
