use super::{EnumType, Schema};
use crate::core::{COLUMN_SEPARATOR, JsonMap, OrmError, Result, StorageMode, Value};
use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::warn;

/// What happens when a field is assigned a value of the wrong kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Coerce when lossless, otherwise log and keep the previous state.
    Lenient,
    /// Reject with [`OrmError::TypeMismatch`].
    Strict,
}

/// Declared value kind of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    /// Millisecond epoch on the wire, `DateTime<Utc>` in memory.
    Timestamp,
    Enum(Arc<EnumType>),
    /// Nested record of an embedded schema, stored as one structured value.
    Object(Arc<Schema>),
    /// Ordered records of the item schema, or raw scalars when no item schema is given.
    List(Option<Arc<Schema>>),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::Enum(_) => "enum",
            Self::Object(_) => "object",
            Self::List(_) => "list",
        }
    }

    pub fn policy(&self) -> ValidationPolicy {
        match self {
            Self::Object(_) | Self::List(_) => ValidationPolicy::Strict,
            _ => ValidationPolicy::Lenient,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Object(_) | Self::List(_))
    }
}

/// Wide-column tuning options of a column family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_memory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_filter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_filter_vector_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_filter_nb_hashes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_cache_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u64>,
}

impl ColumnOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Typed accessor and serializer for one attribute of a record.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    column: Option<String>,
    family: Option<String>,
    kind: FieldKind,
    default: Option<Value>,
    primary_key: bool,
    queryable: bool,
    mapped: bool,
    options: ColumnOptions,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            column: None,
            family: None,
            kind,
            default: None,
            primary_key: false,
            queryable: false,
            mapped: false,
            options: ColumnOptions::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn enumeration(name: impl Into<String>, enum_type: Arc<EnumType>) -> Self {
        Self::new(name, FieldKind::Enum(enum_type))
    }

    pub fn object(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::new(name, FieldKind::Object(schema))
    }

    /// List of raw scalars.
    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::List(None))
    }

    /// List of nested records of `item`.
    pub fn list_of(name: impl Into<String>, item: Arc<Schema>) -> Self {
        Self::new(name, FieldKind::List(Some(item)))
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Overrides the storage name (qualifier / document key / column).
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn queryable(mut self) -> Self {
        self.queryable = true;
        self
    }

    /// Stores the field in its own physical column besides the relational document.
    pub fn mapped(mut self) -> Self {
        self.mapped = true;
        self
    }

    pub fn options(mut self, options: ColumnOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_versions(mut self, versions: u32) -> Self {
        self.options.max_versions = Some(versions);
        self
    }

    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.options.compression = Some(compression.into());
        self
    }

    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.options.in_memory = Some(in_memory);
        self
    }

    pub fn bloom_filter(mut self, filter_type: impl Into<String>, vector_size: u32, nb_hashes: u32) -> Self {
        self.options.bloom_filter_type = Some(filter_type.into());
        self.options.bloom_filter_vector_size = Some(vector_size);
        self.options.bloom_filter_nb_hashes = Some(nb_hashes);
        self
    }

    pub fn block_cache(mut self, enabled: bool) -> Self {
        self.options.block_cache_enabled = Some(enabled);
        self
    }

    pub fn time_to_live(mut self, seconds: u64) -> Self {
        self.options.time_to_live = Some(seconds);
        self
    }

    pub(crate) fn in_family(mut self, family: &str) -> Self {
        self.family = Some(family.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key used in documents and as the wide-column qualifier.
    pub fn storage_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Full wide-column name: `family:qualifier`, or `name:` outside a family.
    pub fn qualified_name(&self) -> String {
        match &self.family {
            Some(family) => format!("{}{}{}", family, COLUMN_SEPARATOR, self.storage_name()),
            None => format!("{}{}", self.storage_name(), COLUMN_SEPARATOR),
        }
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_queryable(&self) -> bool {
        self.queryable
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn column_options(&self) -> &ColumnOptions {
        &self.options
    }

    pub fn declared_default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Value read from an unset slot. Never [`Value::Null`] except for an enum without members.
    pub fn default_value(&self) -> Value {
        if let Some(value) = &self.default {
            return self.read_view(value.clone());
        }
        match &self.kind {
            FieldKind::String => Value::Text(String::new()),
            FieldKind::Int => Value::Integer(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Bool => Value::Boolean(false),
            FieldKind::Timestamp => Value::Timestamp(DateTime::<Utc>::default()),
            FieldKind::Enum(enum_type) => enum_type
                .default_member()
                .cloned()
                .map(Value::Enum)
                .unwrap_or(Value::Null),
            FieldKind::Object(schema) => Value::Object(Box::new(Record::new(schema.clone()))),
            FieldKind::List(_) => Value::List(Vec::new()),
        }
    }

    /// Converts a stored slot value into what readers see: enums come back as members.
    pub(crate) fn read_view(&self, stored: Value) -> Value {
        match (&self.kind, stored) {
            (FieldKind::Enum(enum_type), Value::Integer(code)) => match enum_type.from_value(code) {
                Some(member) => Value::Enum(member.clone()),
                None => self.default_value(),
            },
            (_, other) => other,
        }
    }

    /// Converts a storage-format value into the field's typed value.
    pub fn to_native(&self, raw: &Json) -> Result<Value> {
        if raw.is_null() {
            return Ok(self.default_value());
        }
        if let Json::String(s) = raw {
            if s.is_empty() && !matches!(self.kind, FieldKind::String) {
                return Ok(self.default_value());
            }
        }

        match &self.kind {
            FieldKind::String => Ok(Value::Text(match raw {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            })),
            FieldKind::Int => parse_int(raw)
                .map(Value::Integer)
                .ok_or_else(|| self.decode_error(raw)),
            FieldKind::Float => parse_float(raw)
                .map(|f| Value::Float(round_to_cents(f)))
                .ok_or_else(|| self.decode_error(raw)),
            FieldKind::Bool => parse_bool(raw)
                .map(Value::Boolean)
                .ok_or_else(|| self.decode_error(raw)),
            FieldKind::Timestamp => parse_int(raw)
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(Value::Timestamp)
                .ok_or_else(|| self.decode_error(raw)),
            FieldKind::Enum(enum_type) => {
                let code = parse_int(raw).ok_or_else(|| self.decode_error(raw))?;
                enum_type
                    .from_value(code)
                    .cloned()
                    .map(Value::Enum)
                    .ok_or_else(|| {
                        OrmError::Decode(format!(
                            "Field '{}': {} is not a member of enum '{}'",
                            self.name,
                            code,
                            enum_type.name()
                        ))
                    })
            }
            FieldKind::Object(schema) => {
                let document = self.structured_object(raw)?;
                let record = Record::from_document(schema.clone(), &document)?;
                Ok(Value::Object(Box::new(record)))
            }
            FieldKind::List(item) => {
                let elements = self.structured_array(raw)?;
                let mut values = Vec::with_capacity(elements.len());
                for element in &elements {
                    match (item, element) {
                        (Some(schema), Json::Object(document)) => {
                            values.push(Value::from(Record::from_document(schema.clone(), document)?));
                        }
                        (Some(schema), other) => {
                            return Err(OrmError::Decode(format!(
                                "Field '{}': list element {} is not a '{}' record",
                                self.name,
                                other,
                                schema.name()
                            )));
                        }
                        (None, scalar) => values.push(Value::from_plain_json(scalar)),
                    }
                }
                Ok(Value::List(values))
            }
        }
    }

    /// Converts a typed value into its storage representation for `mode`.
    ///
    /// Wide-column storage is string-only; relational storage keeps native JSON types.
    pub fn to_storage(&self, value: &Value, mode: StorageMode) -> Result<Json> {
        let native = match (&self.kind, value) {
            (_, Value::Null) => return Ok(Json::Null),
            (FieldKind::String, Value::Text(s)) => Json::String(s.clone()),
            (FieldKind::Int, Value::Integer(i)) => Json::from(*i),
            (FieldKind::Float, Value::Float(f)) => float_json(*f),
            (FieldKind::Float, Value::Integer(i)) => float_json(*i as f64),
            (FieldKind::Bool, Value::Boolean(b)) => Json::Bool(*b),
            (FieldKind::Timestamp, Value::Timestamp(ts)) => Json::from(ts.timestamp_millis()),
            (FieldKind::Timestamp, Value::Integer(ms)) => Json::from(*ms),
            (FieldKind::Enum(_), Value::Enum(member)) => Json::from(member.value),
            (FieldKind::Enum(_), Value::Integer(code)) => Json::from(*code),
            (FieldKind::Object(_), Value::Object(record)) => Json::Object(record.to_document()?),
            (FieldKind::List(_), Value::List(items)) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(match item {
                        Value::Object(record) => Json::Object(record.to_document()?),
                        scalar => scalar.to_plain_json(),
                    });
                }
                Json::Array(elements)
            }
            (kind, other) => {
                return Err(OrmError::TypeMismatch(format!(
                    "Field '{}' expects {}, got {}",
                    self.name,
                    kind.name(),
                    other.type_name()
                )));
            }
        };

        Ok(match mode {
            StorageMode::Relational => native,
            StorageMode::WideColumn => Json::String(wide_cell_text(&native)),
        })
    }

    /// Validates an assignment under the kind's [`ValidationPolicy`].
    ///
    /// `Ok(Some(v))` is the value to store, `Ok(None)` means the assignment was dropped.
    pub fn accept(&self, value: Value) -> Result<Option<Value>> {
        let type_name = value.type_name();
        if let Some(accepted) = self.coerce(value) {
            return Ok(Some(accepted));
        }
        match self.kind.policy() {
            ValidationPolicy::Strict => Err(OrmError::TypeMismatch(format!(
                "Field '{}' expects {}, got {}",
                self.name,
                self.kind.name(),
                type_name
            ))),
            ValidationPolicy::Lenient => {
                warn!(
                    field = %self.name,
                    expected = self.kind.name(),
                    got = type_name,
                    "assignment dropped: value type does not match field"
                );
                Ok(None)
            }
        }
    }

    /// Validates one element for a list field.
    pub fn check_list_item(&self, item: &Value) -> Result<()> {
        match &self.kind {
            FieldKind::List(Some(schema)) => match item {
                Value::Object(record) if record.schema().name() == schema.name() => Ok(()),
                other => Err(OrmError::TypeMismatch(format!(
                    "List '{}' holds '{}' records, got {}",
                    self.name,
                    schema.name(),
                    other.type_name()
                ))),
            },
            FieldKind::List(None) => Ok(()),
            other => Err(OrmError::TypeMismatch(format!(
                "Field '{}' is {}, not a list",
                self.name,
                other.name()
            ))),
        }
    }

    pub(crate) fn coerce(&self, value: Value) -> Option<Value> {
        match (&self.kind, value) {
            (FieldKind::String, v @ Value::Text(_)) => Some(v),
            (FieldKind::Int, v @ Value::Integer(_)) => Some(v),
            (FieldKind::Float, v @ Value::Float(_)) => Some(v),
            (FieldKind::Float, Value::Integer(i)) => Some(Value::Float(i as f64)),
            (FieldKind::Bool, v @ Value::Boolean(_)) => Some(v),
            (FieldKind::Timestamp, v @ Value::Timestamp(_)) => Some(v),
            (FieldKind::Timestamp, Value::Integer(ms)) => {
                DateTime::<Utc>::from_timestamp_millis(ms).map(Value::Timestamp)
            }
            (FieldKind::Enum(enum_type), Value::Integer(code)) => {
                enum_type.from_value(code).map(|_| Value::Integer(code))
            }
            (FieldKind::Object(schema), Value::Object(record)) => {
                (record.schema().name() == schema.name()).then(|| Value::Object(record))
            }
            (FieldKind::List(_), Value::List(items)) => items
                .iter()
                .all(|item| self.check_list_item(item).is_ok())
                .then(|| Value::List(items)),
            _ => None,
        }
    }

    fn structured_object(&self, raw: &Json) -> Result<JsonMap> {
        match raw {
            Json::Object(map) => Ok(map.clone()),
            Json::String(text) => match serde_json::from_str::<Json>(text)? {
                Json::Object(map) => Ok(map),
                _ => Err(self.decode_error(raw)),
            },
            _ => Err(self.decode_error(raw)),
        }
    }

    fn structured_array(&self, raw: &Json) -> Result<Vec<Json>> {
        match raw {
            Json::Array(items) => Ok(items.clone()),
            Json::String(text) => match serde_json::from_str::<Json>(text)? {
                Json::Array(items) => Ok(items),
                _ => Err(self.decode_error(raw)),
            },
            _ => Err(self.decode_error(raw)),
        }
    }

    fn decode_error(&self, raw: &Json) -> OrmError {
        OrmError::Decode(format!(
            "Field '{}' ({}) cannot decode {}",
            self.name,
            self.kind.name(),
            raw
        ))
    }
}

fn parse_int(raw: &Json) -> Option<i64> {
    match raw {
        Json::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_float(raw: &Json) -> Option<f64> {
    match raw {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_bool(raw: &Json) -> Option<bool> {
    match raw {
        Json::Bool(b) => Some(*b),
        Json::Number(n) => n.as_i64().map(|i| i != 0),
        Json::String(s) => match s.trim() {
            "true" | "True" | "1" => Some(true),
            "false" | "False" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Floats are read back rounded to two decimal places.
pub(crate) fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn float_json(value: f64) -> Json {
    serde_json::Number::from_f64(value)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

fn wide_cell_text(native: &Json) -> String {
    match native {
        Json::String(s) => s.clone(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_reads_round_to_two_places() {
        let field = Field::float("score");
        assert_eq!(field.to_native(&json!("3.14159")).unwrap(), Value::Float(3.14));
        assert_eq!(field.to_native(&json!(2.005)).unwrap(), Value::Float(2.01));
    }

    #[test]
    fn test_wide_column_storage_is_text() {
        let field = Field::int("age");
        assert_eq!(
            field.to_storage(&Value::Integer(42), StorageMode::WideColumn).unwrap(),
            json!("42")
        );
        assert_eq!(
            field.to_storage(&Value::Integer(42), StorageMode::Relational).unwrap(),
            json!(42)
        );
        assert_eq!(
            Field::boolean("on")
                .to_storage(&Value::Boolean(true), StorageMode::WideColumn)
                .unwrap(),
            json!("true")
        );
    }

    #[test]
    fn test_timestamp_accepts_millis_and_datetime() {
        let field = Field::timestamp("create_time");
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(
            field.to_storage(&Value::Timestamp(ts), StorageMode::Relational).unwrap(),
            json!(1_700_000_000_123i64)
        );
        assert_eq!(
            field
                .to_storage(&Value::Integer(1_700_000_000_123), StorageMode::Relational)
                .unwrap(),
            json!(1_700_000_000_123i64)
        );
        assert_eq!(field.to_native(&json!("1700000000123")).unwrap(), Value::Timestamp(ts));
        assert_eq!(field.accept(Value::Integer(1_700_000_000_123)).unwrap(), Some(Value::Timestamp(ts)));
    }

    #[test]
    fn test_unset_reads_return_defaults() {
        assert_eq!(Field::string("s").default_value(), Value::Text(String::new()));
        assert_eq!(Field::int("i").default_value(), Value::Integer(0));
        assert_eq!(Field::int("i").with_default(5).default_value(), Value::Integer(5));
        assert_eq!(Field::int("i").to_native(&Json::Null).unwrap(), Value::Integer(0));
        assert_eq!(Field::float("f").to_native(&json!("")).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_lenient_assignment_coerces_or_drops() {
        let field = Field::float("price");
        assert_eq!(field.accept(Value::Integer(3)).unwrap(), Some(Value::Float(3.0)));
        assert_eq!(field.accept(Value::Text("3".into())).unwrap(), None);
        assert_eq!(Field::int("n").accept(Value::Float(1.5)).unwrap(), None);
    }

    #[test]
    fn test_enum_assignment_requires_member_integer() {
        let status = Arc::new(EnumType::new("Status").member("On", 1).member("Off", 2));
        let field = Field::enumeration("status", status);
        assert_eq!(field.accept(Value::Integer(2)).unwrap(), Some(Value::Integer(2)));
        assert_eq!(field.accept(Value::Integer(3)).unwrap(), None);
        assert_eq!(field.accept(Value::Text("On".into())).unwrap(), None);
        assert_eq!(
            field.to_native(&json!("1")).unwrap(),
            Value::Enum(crate::schema::EnumMember::new("On", 1))
        );
        assert!(field.to_native(&json!(9)).is_err());
    }

    #[test]
    fn test_qualified_names() {
        assert_eq!(Field::string("name").qualified_name(), "name:");
        assert_eq!(
            Field::string("email").column("em").in_family("info").qualified_name(),
            "info:em"
        );
    }

    #[test]
    fn test_scalar_list_round_trip() {
        let field = Field::list("tags");
        let value = Value::List(vec![Value::Text("a".into()), Value::Integer(2)]);
        let stored = field.to_storage(&value, StorageMode::Relational).unwrap();
        assert_eq!(stored, json!(["a", 2]));
        assert_eq!(field.to_native(&stored).unwrap(), value);
    }
}
