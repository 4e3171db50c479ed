//! Wire shapes shared by the stream and file adapters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ChannelFeed, RawRecord};

/// Which per-source stream an envelope targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    #[default]
    Telemetry,
    Prediction,
}

/// One line of a telemetry stream.
///
/// ```json
/// {"sourceId": "T1", "kind": "telemetry", "record": {"Temperature": 71.5}}
/// ```
///
/// A missing or `null` record deletes the source's current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source_id: String,
    #[serde(default)]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub record: Option<RawRecord>,
}

impl Envelope {
    /// Publish this envelope into `feed`.
    pub fn apply(self, feed: &ChannelFeed) {
        match (self.kind, self.record) {
            (EnvelopeKind::Telemetry, Some(record)) => feed.publish(&self.source_id, record),
            (EnvelopeKind::Telemetry, None) => feed.remove(&self.source_id),
            (EnvelopeKind::Prediction, Some(value)) => {
                feed.publish_prediction(&self.source_id, value)
            }
            (EnvelopeKind::Prediction, None) => feed.remove_prediction(&self.source_id),
        }
    }
}

/// Contents of a JSON store file.
///
/// ```json
/// {
///   "data": {"T1": {"Temperature": 71.5, "City": "Colombo"}},
///   "predictions": {"T1": {"Status": "Healthy"}}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub data: BTreeMap<String, RawRecord>,
    #[serde(default)]
    pub predictions: BTreeMap<String, RawRecord>,
}

impl StoreSnapshot {
    /// Publish everything that differs from `previous`. Returns the number
    /// of updates published.
    pub fn publish_changes(&self, previous: &StoreSnapshot, feed: &ChannelFeed) -> usize {
        let mut published = 0;

        for (id, record) in live(&self.data) {
            if previous.data.get(id) != Some(record) {
                feed.publish(id, record.clone());
                published += 1;
            }
        }
        for (id, _) in live(&previous.data) {
            if !is_live(self.data.get(id)) {
                feed.remove(id);
                published += 1;
            }
        }

        for (id, value) in live(&self.predictions) {
            if previous.predictions.get(id) != Some(value) {
                feed.publish_prediction(id, value.clone());
                published += 1;
            }
        }
        for (id, _) in live(&previous.predictions) {
            if !is_live(self.predictions.get(id)) {
                feed.remove_prediction(id);
                published += 1;
            }
        }

        published
    }
}

/// Entries holding a record; `null` entries count as deleted.
fn live(entries: &BTreeMap<String, RawRecord>) -> impl Iterator<Item = (&String, &RawRecord)> {
    entries.iter().filter(|(_, record)| !record.is_null())
}

fn is_live(record: Option<&RawRecord>) -> bool {
    record.is_some_and(|record| !record.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_defaults() {
        let envelope: Envelope = serde_json::from_str(r#"{"sourceId":"T1"}"#).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Telemetry);
        assert!(envelope.record.is_none());

        let envelope: Envelope =
            serde_json::from_str(r#"{"sourceId":"T1","kind":"prediction","record":"Fault"}"#)
                .unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Prediction);
        assert_eq!(envelope.record, Some(json!("Fault")));
    }

    #[test]
    fn test_publish_changes_diffs_snapshots() {
        let feed = ChannelFeed::new("test");
        let first: StoreSnapshot = serde_json::from_value(json!({
            "data": {"T1": {"H2": 1}, "T2": {"H2": 2}},
            "predictions": {"T1": "Healthy"}
        }))
        .unwrap();

        assert_eq!(first.publish_changes(&StoreSnapshot::default(), &feed), 3);
        assert_eq!(feed.source_ids(), vec!["T1".to_string(), "T2".to_string()]);

        let second: StoreSnapshot = serde_json::from_value(json!({
            "data": {"T1": {"H2": 1}, "T3": {"H2": 3}},
            "predictions": {}
        }))
        .unwrap();

        // T3 added, T2 removed, T1 prediction removed; T1 data unchanged
        assert_eq!(second.publish_changes(&first, &feed), 3);
        assert_eq!(feed.source_ids(), vec!["T1".to_string(), "T3".to_string()]);
    }

    #[test]
    fn test_null_entries_are_not_sources() {
        let feed = ChannelFeed::new("test");
        let first: StoreSnapshot = serde_json::from_value(json!({
            "data": {"T1": null, "T2": {"H2": 2}},
            "predictions": {"T2": null}
        }))
        .unwrap();

        assert_eq!(first.publish_changes(&StoreSnapshot::default(), &feed), 1);
        assert_eq!(feed.source_ids(), vec!["T2".to_string()]);

        let second: StoreSnapshot = serde_json::from_value(json!({
            "data": {"T1": null, "T2": null}
        }))
        .unwrap();

        // T2 nulled out counts as a deletion
        assert_eq!(second.publish_changes(&first, &feed), 1);
        assert!(feed.source_ids().is_empty());
    }
}
