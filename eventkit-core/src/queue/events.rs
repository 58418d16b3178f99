//! Upload payloads
//!
//! Queue entries are grouped by namespace into one JSON body:
//!
//! ```text
//! { "db.table": [ { ...record, "#UUID": "<event id>", "time": <unix secs> }, ... ] }
//! ```
//!
//! The endpoint answers with the same shape, one status per event in order:
//!
//! ```text
//! { "db.table": [ { "success": true }, { "success": false, "error": "..." } ] }
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::types::QueueEntry;

/// Field carrying the event id on the wire
pub const WIRE_KEY_EVENT_ID: &str = "#UUID";

/// Field carrying the event time; kept if the application already set it
pub const WIRE_KEY_TIME: &str = "time";

/// One upload request worth of events
#[derive(Debug, Clone)]
pub struct EventBatch {
    body: Map<String, Value>,
    /// Queue row ids per namespace, in the same order as `body`
    ids: BTreeMap<String, Vec<i64>>,
}

/// Per-event result of one upload request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Queue ids the endpoint stored
    pub accepted: Vec<i64>,
    /// Queue ids the endpoint refused, with its reason
    pub rejected: Vec<(i64, String)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl EventBatch {
    /// Build the request body for a page of queue entries
    pub fn from_entries(entries: &[QueueEntry]) -> Self {
        let mut grouped: BTreeMap<String, (Vec<Value>, Vec<i64>)> = BTreeMap::new();
        for entry in entries {
            let (events, ids) = grouped.entry(entry.namespace.clone()).or_default();
            events.push(wire_event(entry));
            ids.push(entry.id);
        }

        let mut body = Map::new();
        let mut ids = BTreeMap::new();
        for (namespace, (events, namespace_ids)) in grouped {
            body.insert(namespace.clone(), Value::Array(events));
            ids.insert(namespace, namespace_ids);
        }

        Self { body, ids }
    }

    /// Request body
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Number of events in the batch
    pub fn len(&self) -> usize {
        self.ids.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Match an endpoint response against this batch.
    ///
    /// Statuses are matched by position within each namespace; an event with
    /// no status counts as rejected.
    pub fn outcome(&self, response: &Value) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (namespace, ids) in &self.ids {
            let statuses = response
                .get(namespace)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for (i, id) in ids.iter().enumerate() {
                match statuses.get(i) {
                    Some(status) if status.get("success").and_then(Value::as_bool) == Some(true) => {
                        outcome.accepted.push(*id)
                    }
                    Some(status) => {
                        let reason = status
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("rejected")
                            .to_string();
                        outcome.rejected.push((*id, reason));
                    }
                    None => outcome
                        .rejected
                        .push((*id, "missing from response".to_string())),
                }
            }
        }

        outcome
    }
}

/// Wire form of one queued record
fn wire_event(entry: &QueueEntry) -> Value {
    let mut event = entry.record.as_map().clone();
    event.insert(
        WIRE_KEY_EVENT_ID.to_string(),
        Value::String(entry.event_id.clone()),
    );
    event
        .entry(WIRE_KEY_TIME)
        .or_insert_with(|| Value::from(entry.enqueued_at.timestamp()));
    Value::Object(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn entry(id: i64, namespace: &str, record: Value) -> QueueEntry {
        QueueEntry {
            id,
            namespace: namespace.to_string(),
            event_id: format!("evt-{}", id),
            record: Record::try_from(record).unwrap(),
            enqueued_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            attempts: 0,
        }
    }

    #[test]
    fn test_batch_groups_by_namespace() {
        let batch = EventBatch::from_entries(&[
            entry(1, "db1.tbl1", json!({"k": "v"})),
            entry(2, "db2.tbl2", json!({"n": 1})),
            entry(3, "db1.tbl1", json!({"k": "w"})),
        ]);

        assert_eq!(batch.len(), 3);
        let body = Value::Object(batch.body().clone());
        assert_eq!(body["db1.tbl1"].as_array().unwrap().len(), 2);
        assert_eq!(body["db1.tbl1"][1]["k"], "w");
        assert_eq!(body["db2.tbl2"][0]["#UUID"], "evt-2");
        assert_eq!(body["db2.tbl2"][0]["time"], 1704164645);
    }

    #[test]
    fn test_application_time_is_kept() {
        let batch = EventBatch::from_entries(&[entry(1, "db.tbl", json!({"time": 42}))]);
        assert_eq!(batch.body()["db.tbl"][0]["time"], 42);
    }

    #[test]
    fn test_outcome_matches_by_position() {
        let batch = EventBatch::from_entries(&[
            entry(1, "db.tbl", json!({"a": 1})),
            entry(2, "db.tbl", json!({"a": 2})),
            entry(3, "db.tbl", json!({"a": 3})),
        ]);
        let response = json!({
            "db.tbl": [
                {"success": true},
                {"success": false, "error": "bad column"},
            ]
        });

        let outcome = batch.outcome(&response);
        assert_eq!(outcome.accepted, vec![1]);
        assert_eq!(
            outcome.rejected,
            vec![
                (2, "bad column".to_string()),
                (3, "missing from response".to_string())
            ]
        );
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_outcome_all_accepted() {
        let batch = EventBatch::from_entries(&[
            entry(1, "db1.tbl1", json!({"a": 1})),
            entry(2, "db2.tbl2", json!({"a": 2})),
        ]);
        let response = json!({
            "db1.tbl1": [{"success": true}],
            "db2.tbl2": [{"success": true}],
        });
        let outcome = batch.outcome(&response);
        assert!(outcome.is_complete());
        assert_eq!(outcome.accepted.len(), 2);
    }
}
