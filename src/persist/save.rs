use crate::core::{RawRow, Result, Value};
use crate::record::Record;
use crate::schema::{FieldKind, Schema};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The version counter lives in `0..VERSION_MODULUS`.
pub const VERSION_MODULUS: i64 = 128;

/// Version written on an update, given the stored one.
pub fn next_version(old: i64) -> i64 {
    (old + 1).rem_euclid(VERSION_MODULUS)
}

/// Stamps bookkeeping fields before a write.
///
/// An unset version becomes 0. Creation time is set once, update time on every
/// save; both come from the same millisecond instant.
pub fn prepare(record: &mut Record, now: DateTime<Utc>) -> Result<()> {
    let schema = Arc::clone(record.schema());
    if let Some(version) = schema.version_field() {
        if !record.is_set(version) {
            record.set(version, 0)?;
        }
    }

    let now = DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    if let Some(created) = schema.create_time_field() {
        if !record.is_set(created) {
            stamp(record, created, now)?;
        }
    }
    if let Some(updated) = schema.update_time_field() {
        stamp(record, updated, now)?;
    }
    Ok(())
}

fn stamp(record: &mut Record, field: &str, now: DateTime<Utc>) -> Result<()> {
    let value = match record.schema().field(field).map(|f| f.kind()) {
        Some(FieldKind::Int) => Value::Integer(now.timestamp_millis()),
        _ => Value::Timestamp(now),
    };
    record.set(field, value)?;
    Ok(())
}

/// Version held by a persisted row; 0 when absent.
pub fn stored_version(schema: &Arc<Schema>, raw: &RawRow) -> Result<i64> {
    let Some(version) = schema.version_field() else {
        return Ok(0);
    };
    let stored = Record::from_raw(Arc::clone(schema), raw)?;
    if !stored.is_set(version) {
        return Ok(0);
    }
    Ok(stored.get(version)?.as_i64().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, SchemaBuilder};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        SchemaBuilder::new("Doc")
            .field(Field::string("title"))
            .field(Field::int("dver"))
            .field(Field::timestamp("create_time"))
            .field(Field::int("update_time"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_version_wraps_at_128() {
        assert_eq!(next_version(0), 1);
        assert_eq!(next_version(126), 127);
        assert_eq!(next_version(127), 0);
    }

    #[test]
    fn test_prepare_stamps_once() {
        let mut record = Record::new(schema());
        let now = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        prepare(&mut record, now).unwrap();

        assert_eq!(record.get("dver").unwrap(), Value::Integer(0));
        assert_eq!(record.get("create_time").unwrap(), Value::Timestamp(now));
        assert_eq!(record.get("update_time").unwrap(), Value::Integer(1_700_000_000_000));

        let later = DateTime::<Utc>::from_timestamp_millis(1_700_000_005_000).unwrap();
        prepare(&mut record, later).unwrap();
        assert_eq!(record.get("create_time").unwrap(), Value::Timestamp(now));
        assert_eq!(record.get("update_time").unwrap(), Value::Integer(1_700_000_005_000));
    }

    #[test]
    fn test_stored_version_defaults_to_zero() {
        let mut raw = RawRow::new();
        raw.insert("title".into(), json!("x"));
        assert_eq!(stored_version(&schema(), &raw).unwrap(), 0);
        raw.insert("dver".into(), json!(41));
        assert_eq!(stored_version(&schema(), &raw).unwrap(), 41);
    }
}
