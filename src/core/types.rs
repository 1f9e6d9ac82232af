use super::Value;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// Reserved entry under which every raw row carries its own primary key.
pub const PK_KEY: &str = "pk";

/// Name of the backend-assigned identity column of relational tables.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Name given to the row key of wide-column schemas without a key field.
pub const ROW_KEY: &str = "rowkey";

/// Separator between family and qualifier in wide-column column names.
pub const COLUMN_SEPARATOR: char = ':';

/// JSON object used for raw rows and serialized documents.
pub type JsonMap = serde_json::Map<String, Json>;

/// A row as returned by a storage connector, before deserialization.
pub type RawRow = JsonMap;

/// Which backing store a schema is persisted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Column-family store; every scalar is written as a string cell.
    WideColumn,
    /// Relational store; one JSON document per row plus optional mapped columns.
    Relational,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WideColumn => write!(f, "wide_column"),
            Self::Relational => write!(f, "relational"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    /// A key is usable when it is a positive integer or a non-empty string.
    pub fn is_usable(&self) -> bool {
        match self {
            Self::Int(i) => *i > 0,
            Self::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Self::Int(i) => Json::from(*i),
            Self::Text(s) => Json::String(s.clone()),
        }
    }

    pub fn from_json(raw: &Json) -> Option<Self> {
        match raw {
            Json::Number(n) => n.as_i64().map(Self::Int),
            Json::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(Self::Int(*i)),
            Value::Text(s) => Some(Self::Text(s.clone())),
            Value::Enum(member) => Some(Self::Int(member.value)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Integer(*i),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for PrimaryKey {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<String> for PrimaryKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A serialized record, ready to hand to a connector.
///
/// `cells` holds the flat `family:qualifier` cells in wide-column mode, or the JSON
/// document stored in the `data` column in relational mode. `columns` holds the
/// physical columns of mapped fields (relational only).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData {
    pub key: Option<PrimaryKey>,
    pub cells: JsonMap,
    pub columns: JsonMap,
}

impl RowData {
    pub fn new(key: Option<PrimaryKey>) -> Self {
        Self {
            key,
            cells: JsonMap::new(),
            columns: JsonMap::new(),
        }
    }

    pub fn with_key(mut self, key: PrimaryKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_usability() {
        assert!(PrimaryKey::Int(1).is_usable());
        assert!(!PrimaryKey::Int(0).is_usable());
        assert!(!PrimaryKey::Int(-1).is_usable());
        assert!(PrimaryKey::from("row-1").is_usable());
        assert!(!PrimaryKey::from("").is_usable());
    }

    #[test]
    fn test_key_json_conversion() {
        assert_eq!(PrimaryKey::from_json(&Json::from(5)), Some(PrimaryKey::Int(5)));
        assert_eq!(
            PrimaryKey::from_json(&Json::from("abc")),
            Some(PrimaryKey::Text("abc".into()))
        );
        assert_eq!(PrimaryKey::from_json(&Json::Null), None);
        assert_eq!(PrimaryKey::Int(9).to_json(), Json::from(9));
    }

    #[test]
    fn test_key_ordering_is_numeric_for_ints() {
        let mut keys = vec![PrimaryKey::Int(10), PrimaryKey::Int(2), PrimaryKey::Int(33)];
        keys.sort();
        assert_eq!(keys, vec![PrimaryKey::Int(2), PrimaryKey::Int(10), PrimaryKey::Int(33)]);
    }
}
