//! Core domain types for eventkit
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Record** | Application-defined fields of one event |
//! | **Namespace** | The `(database, table)` destination of a record, encoded `database.table` |
//! | **Enrichment** | Reserved `td_*` fields the client adds before queueing |
//! | **Flush** | One attempt to deliver every buffered event to the endpoint |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ============================================
// Record
// ============================================

/// Field map of a single event.
///
/// Values are strings, numbers, booleans, null, or nested records. The client
/// adds reserved fields before queueing; a queued record is never modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create a record holding a single field
    pub fn single(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut record = Self::new();
        record.insert(key, value);
        record
    }

    /// Insert a field, returning the value it replaced
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidEvent(format!(
                "record must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Short name of a JSON value's kind, for error messages
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================
// Namespace
// ============================================

/// A validated `(database, table)` pair.
///
/// Only [`validate`](crate::validator::validate) creates one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    table: String,
}

impl Namespace {
    pub(crate) fn new_unchecked(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Queue routing key: `database.table`
    pub fn key(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

// ============================================
// Queue entries
// ============================================

/// A record waiting in the local queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Queue row id; increases with enqueue order
    pub id: i64,
    /// Routing key, `database.table`
    pub namespace: String,
    /// Unique id sent with the event
    pub event_id: String,
    /// The record as it was enqueued
    pub record: Record,
    /// When the record entered the queue
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub attempts: u32,
}
