//! Namespace and record validation
//!
//! Database and table names must both match `^[0-9a-z_]{3,255}$`. Both are
//! checked before anything touches the queue.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{json_kind, Namespace, Record};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-z_]{3,255}$").expect("valid name pattern"));

/// Whether a single database or table name satisfies the naming policy
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Validate a database/table pair and build its [`Namespace`].
///
/// The error message names both inputs, whichever one failed.
pub fn validate(database: &str, table: &str) -> Result<Namespace> {
    if is_valid_name(database) && is_valid_name(table) {
        return Ok(Namespace::new_unchecked(database, table));
    }

    Err(Error::InvalidParam(format!(
        "database and table need to be consist of lower letters, numbers or '_': database={}, table={}",
        database, table
    )))
}

/// Check the shape of a record before it is queued.
///
/// Records must have at least one field. Arrays are rejected at any depth.
pub fn validate_record(record: &Record) -> Result<()> {
    if record.is_empty() {
        return Err(Error::InvalidEvent("record has no fields".to_string()));
    }

    for (key, value) in record.iter() {
        check_value(key, value)?;
    }
    Ok(())
}

fn check_value(path: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(_) => Err(Error::InvalidEvent(format!(
            "field '{}' has unsupported type {}",
            path,
            json_kind(value)
        ))),
        Value::Object(map) => {
            for (key, nested) in map {
                check_value(&format!("{}.{}", path, key), nested)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use serde_json::json;

    #[test]
    fn test_valid_names() {
        let longest = "z".repeat(255);
        for name in ["abc", "db1", "a_b_c", "___", "0123456789", longest.as_str()] {
            assert!(is_valid_name(name), "{name:?} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "z".repeat(256);
        for name in [
            "",
            "ab",
            "ABC",
            "Abc",
            "bad db",
            "db-1",
            "db.tbl",
            "tbl\n",
            "日本語db",
            too_long.as_str(),
        ] {
            assert!(!is_valid_name(name), "{name:?} should be invalid");
        }
    }

    #[test]
    fn test_validate_builds_namespace() {
        let ns = validate("db1", "tbl1").unwrap();
        assert_eq!(ns.database(), "db1");
        assert_eq!(ns.table(), "tbl1");
        assert_eq!(ns.key(), "db1.tbl1");
    }

    #[test]
    fn test_validate_message_names_both_inputs() {
        let err = validate("BAD DB", "tbl1").unwrap_err();
        assert_eq!(err.error_code(), Some(codes::INVALID_PARAM));
        let msg = err.to_string();
        assert!(msg.contains("database=BAD DB"));
        assert!(msg.contains("table=tbl1"));

        let err = validate("db1", "x").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("database=db1"));
        assert!(msg.contains("table=x"));
    }

    #[test]
    fn test_validate_record() {
        let ok = Record::try_from(json!({"k": "v", "n": 1.5, "b": true, "z": null, "o": {"x": 1}}))
            .unwrap();
        assert!(validate_record(&ok).is_ok());

        let err = validate_record(&Record::new()).unwrap_err();
        assert_eq!(err.error_code(), Some(codes::INVALID_EVENT));

        let nested_array = Record::try_from(json!({"o": {"list": [1, 2]}})).unwrap();
        let err = validate_record(&nested_array).unwrap_err();
        assert!(err.to_string().contains("o.list"));
    }
}
