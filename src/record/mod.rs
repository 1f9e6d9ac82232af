pub mod list;

pub use list::ListHandle;

use crate::core::{
    COLUMN_SEPARATOR, JsonMap, OrmError, PK_KEY, PrimaryKey, RawRow, Result, RowData, StorageMode,
    Value,
};
use crate::schema::{Field, FieldKind, Schema};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One instance of a [`Schema`]: an optional key plus the assigned field values.
///
/// Unassigned fields are not stored and read back as their defaults.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    key: Option<PrimaryKey>,
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            key: None,
            values: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The record key: the primary-key field's value when the schema declares one,
    /// otherwise the key assigned by the store.
    pub fn key(&self) -> Option<PrimaryKey> {
        match self.schema.primary_key_field() {
            Some(field) => self.values.get(field.name()).and_then(PrimaryKey::from_value),
            None => self.key.clone(),
        }
    }

    pub fn set_key(&mut self, key: PrimaryKey) {
        if let Some(field) = self.schema.primary_key_field() {
            self.values.insert(field.name().to_string(), key.to_value());
        }
        self.key = Some(key);
    }

    pub fn clear_key(&mut self) {
        if let Some(field) = self.schema.primary_key_field() {
            self.values.remove(field.name());
        }
        self.key = None;
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.schema
            .field(name)
            .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), self.schema.name().to_string()))
    }

    /// Reads a field; unset fields return the field default.
    pub fn get(&self, name: &str) -> Result<Value> {
        let field = self.field(name)?;
        Ok(match self.values.get(name) {
            Some(stored) => field.read_view(stored.clone()),
            None => field.default_value(),
        })
    }

    /// Assigns a field. Returns `Ok(false)` when a lenient field dropped the value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let field = self.field(name)?;
        match field.accept(value.into())? {
            Some(accepted) => {
                self.values.insert(name.to_string(), accepted);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn unset(&mut self, name: &str) -> Result<()> {
        self.field(name)?;
        self.values.remove(name);
        Ok(())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Reads a dotted path through object fields, e.g. `address.city`.
    pub fn get_in(&self, path: &str) -> Result<Value> {
        match path.split_once('.') {
            None => self.get(path),
            Some((head, rest)) => match self.get(head)? {
                Value::Object(nested) => nested.get_in(rest),
                other => Err(OrmError::TypeMismatch(format!(
                    "'{}' is {}, not an object",
                    head,
                    other.type_name()
                ))),
            },
        }
    }

    /// Assigns through a dotted path, creating nested records on the way.
    pub fn set_in(&mut self, path: &str, value: impl Into<Value>) -> Result<bool> {
        match path.split_once('.') {
            None => self.set(path, value),
            Some((head, rest)) => self.object_mut(head)?.set_in(rest, value),
        }
    }

    /// Mutable access to a nested record; an unset object field is created empty.
    pub fn object_mut(&mut self, name: &str) -> Result<&mut Record> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), self.schema.name().to_string()))?;
        let FieldKind::Object(nested) = field.kind() else {
            return Err(OrmError::TypeMismatch(format!(
                "'{}' is {}, not an object",
                name,
                field.kind().name()
            )));
        };
        let slot = self
            .values
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Box::new(Record::new(nested.clone()))));
        match slot {
            Value::Object(record) => Ok(record.as_mut()),
            other => Err(OrmError::TypeMismatch(format!(
                "'{}' holds {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Mutable access to a list field; an unset list is created empty.
    pub fn list_mut(&mut self, name: &str) -> Result<ListHandle<'_>> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), self.schema.name().to_string()))?;
        if !matches!(field.kind(), FieldKind::List(_)) {
            return Err(OrmError::TypeMismatch(format!(
                "'{}' is {}, not a list",
                name,
                field.kind().name()
            )));
        }
        let slot = self
            .values
            .entry(name.to_string())
            .or_insert_with(|| Value::List(Vec::new()));
        match slot {
            Value::List(items) => Ok(ListHandle::new(field, items)),
            other => Err(OrmError::TypeMismatch(format!(
                "'{}' holds {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Serializes the assigned fields into the wire form of the schema's storage mode.
    pub fn serialize(&self) -> Result<RowData> {
        let mut row = RowData::new(self.key());
        match self.schema.mode() {
            StorageMode::WideColumn => {
                for field in self.schema.fields() {
                    if field.is_primary_key() {
                        continue;
                    }
                    match self.values.get(field.name()) {
                        Some(value) if !value.is_null() => {
                            row.cells.insert(
                                field.qualified_name(),
                                field.to_storage(value, StorageMode::WideColumn)?,
                            );
                        }
                        _ => {}
                    }
                }
                for family in self.schema.families() {
                    row.cells
                        .extend(family.serialize(&self.values, StorageMode::WideColumn)?);
                }
            }
            StorageMode::Relational => {
                row.cells = self.to_document()?;
                for field in self.schema.physical_columns() {
                    if let Some(value) = self.values.get(field.name()) {
                        row.columns.insert(
                            field.storage_name().to_string(),
                            field.to_storage(value, StorageMode::Relational)?,
                        );
                    }
                }
            }
        }
        Ok(row)
    }

    /// Document of the assigned fields keyed by storage name, in native JSON types.
    ///
    /// Family members are nested under their family name.
    pub fn to_document(&self) -> Result<JsonMap> {
        let mut document = JsonMap::new();
        for field in self.schema.fields() {
            if let Some(value) = self.values.get(field.name()) {
                document.insert(
                    field.storage_name().to_string(),
                    field.to_storage(value, StorageMode::Relational)?,
                );
            }
        }
        for family in self.schema.families() {
            let mut members = JsonMap::new();
            for field in family.fields() {
                if let Some(value) = self.values.get(field.name()) {
                    members.insert(
                        field.storage_name().to_string(),
                        field.to_storage(value, StorageMode::Relational)?,
                    );
                }
            }
            if !members.is_empty() {
                document.insert(family.name().to_string(), Json::Object(members));
            }
        }
        Ok(document)
    }

    /// Field name → plain JSON of every assigned field. Used for display.
    pub fn plain_document(&self) -> JsonMap {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_plain_json()))
            .collect()
    }

    /// Rebuilds a record from a native-typed document, taking the key from `pk`.
    pub fn from_document(schema: Arc<Schema>, document: &JsonMap) -> Result<Self> {
        let mut record = Self::new(schema);
        record.load_document(document)?;
        if let Some(key) = document.get(PK_KEY).and_then(PrimaryKey::from_json) {
            record.adopt_key(key);
        }
        Ok(record)
    }

    /// Rehydrates this record in place from a document, replacing present fields.
    pub fn load_document(&mut self, document: &JsonMap) -> Result<()> {
        let schema = self.schema.clone();
        for field in schema.fields() {
            if let Some(raw) = document.get(field.storage_name()) {
                self.store_native(field, raw)?;
            }
        }
        for family in schema.families() {
            if let Some(Json::Object(members)) = document.get(family.name()) {
                for (name, value) in family.deserialize(members)? {
                    self.values.insert(name, slot_value(value));
                }
            }
        }
        Ok(())
    }

    /// Deserializes a raw row returned by a connector for this schema's storage mode.
    pub fn from_raw(schema: Arc<Schema>, raw: &RawRow) -> Result<Self> {
        if schema.mode() == StorageMode::Relational {
            return Self::from_document(schema, raw);
        }

        let mut record = Self::new(schema.clone());
        for field in schema.fields() {
            let qualified = field.qualified_name();
            let cell = raw
                .get(&qualified)
                .or_else(|| raw.get(qualified.trim_end_matches(COLUMN_SEPARATOR)));
            if let Some(cell) = cell {
                record.store_native(field, cell)?;
            }
        }
        for family in schema.families() {
            let mut decoded = family.deserialize(raw)?;
            // rows may also arrive grouped as {family: {qualifier: cell}}
            if let Some(Json::Object(members)) = raw.get(family.name()) {
                decoded.extend(family.deserialize(members)?);
            }
            for (name, value) in decoded {
                record.values.insert(name, slot_value(value));
            }
        }
        if let Some(key) = raw.get(PK_KEY).and_then(PrimaryKey::from_json) {
            record.adopt_key(key);
        }
        Ok(record)
    }

    fn store_native(&mut self, field: &Field, raw: &Json) -> Result<()> {
        if raw.is_null() {
            return Ok(());
        }
        let value = field.to_native(raw)?;
        self.values.insert(field.name().to_string(), slot_value(value));
        Ok(())
    }

    /// Takes a key reported by the store without overriding a decoded key field.
    fn adopt_key(&mut self, key: PrimaryKey) {
        match self.schema.primary_key_field() {
            Some(field) if self.values.contains_key(field.name()) => {}
            Some(field) => {
                let value = match (field.kind(), &key) {
                    (FieldKind::Int, PrimaryKey::Text(text)) => text
                        .parse::<i64>()
                        .map(Value::Integer)
                        .unwrap_or_else(|_| key.to_value()),
                    _ => key.to_value(),
                };
                self.values.insert(field.name().to_string(), value);
                self.key = Some(key);
            }
            None => self.key = Some(key),
        }
    }
}

/// Enum slots hold the member's integer.
fn slot_value(value: Value) -> Value {
    match value {
        Value::Enum(member) => Value::Integer(member.value),
        other => other,
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.key() == other.key()
            && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumMember, EnumType, Family, SchemaBuilder};
    use serde_json::json;

    fn address() -> Arc<Schema> {
        SchemaBuilder::embedded("Address")
            .field(Field::string("city"))
            .field(Field::int("zip"))
            .build()
            .unwrap()
    }

    fn user() -> Arc<Schema> {
        let status = Arc::new(EnumType::new("Status").member("Active", 1).member("Banned", 2));
        SchemaBuilder::new("User")
            .table("users")
            .database("main")
            .field(Field::string("name").mapped())
            .field(Field::int("age").with_default(18))
            .field(Field::enumeration("status", status))
            .field(Field::object("address", address()))
            .field(Field::list_of("previous", address()))
            .field(Field::list("tags"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unset_fields_read_defaults() {
        let record = Record::new(user());
        assert_eq!(record.get("name").unwrap(), Value::from(""));
        assert_eq!(record.get("age").unwrap(), Value::from(18));
        assert_eq!(
            record.get("status").unwrap(),
            Value::Enum(EnumMember::new("Active", 1))
        );
        assert_eq!(record.get_in("address.city").unwrap(), Value::from(""));
        assert!(matches!(record.get("missing"), Err(OrmError::FieldNotFound(_, _))));
    }

    #[test]
    fn test_lenient_and_strict_assignment() {
        let mut record = Record::new(user());
        assert!(record.set("age", 30).unwrap());
        assert!(!record.set("age", "thirty").unwrap());
        assert_eq!(record.get("age").unwrap(), Value::from(30));

        assert!(record.set("status", 2).unwrap());
        assert!(!record.set("status", 5).unwrap());
        assert_eq!(record.get("status").unwrap().as_enum().map(|m| m.value), Some(2));

        assert!(matches!(record.set("address", 1), Err(OrmError::TypeMismatch(_))));
        assert!(matches!(record.set("tags", "x"), Err(OrmError::TypeMismatch(_))));
    }

    #[test]
    fn test_nested_object_and_list_access() {
        let mut record = Record::new(user());
        record.set_in("address.city", "Oslo").unwrap();
        assert_eq!(record.get_in("address.city").unwrap(), Value::from("Oslo"));

        let mut previous = Record::new(address());
        previous.set("city", "Bergen").unwrap();
        let mut list = record.list_mut("previous").unwrap();
        list.append(previous).unwrap();
        assert!(list.append(Value::from("not a record")).is_err());
        assert_eq!(list.len(), 1);

        let mut tags = record.list_mut("tags").unwrap();
        tags.append("a").unwrap();
        tags.insert(0, 1).unwrap();
        assert!(tags.remove(&Value::from("a")));
        assert_eq!(tags.pop(), Some(Value::from(1)));
    }

    #[test]
    fn test_relational_serialize_and_back() {
        let mut record = Record::new(user());
        record.set("name", "ann").unwrap();
        record.set("status", 2).unwrap();
        record.set_in("address.zip", 1234).unwrap();
        record.list_mut("tags").unwrap().append("x").unwrap();

        let row = record.serialize().unwrap();
        assert_eq!(row.cells.get("name"), Some(&json!("ann")));
        assert_eq!(row.cells.get("status"), Some(&json!(2)));
        assert_eq!(row.cells.get("address"), Some(&json!({"zip": 1234})));
        assert_eq!(row.cells.get("tags"), Some(&json!(["x"])));
        assert!(!row.cells.contains_key("age"));
        assert_eq!(row.columns.get("name"), Some(&json!("ann")));

        let mut raw = row.cells.clone();
        raw.insert(PK_KEY.into(), json!(7));
        let loaded = Record::from_raw(user(), &raw).unwrap();
        assert_eq!(loaded.key(), Some(PrimaryKey::Int(7)));
        assert_eq!(loaded.get("status").unwrap(), Value::Enum(EnumMember::new("Banned", 2)));
        assert_eq!(loaded.get_in("address.zip").unwrap(), Value::from(1234));
        assert_eq!(loaded.get("tags").unwrap(), Value::List(vec![Value::from("x")]));
    }

    #[test]
    fn test_wide_column_serialize_and_back() {
        let schema = SchemaBuilder::new("Profile")
            .wide_column()
            .field(Field::string("nick"))
            .field(Field::float("score"))
            .family(Family::new("info").field(Field::string("email").column("em")))
            .build()
            .unwrap();
        let mut record = Record::new(schema.clone());
        record.set_key(PrimaryKey::from("row-1"));
        record.set("nick", "neo").unwrap();
        record.set("score", 9.5).unwrap();
        record.set("email", "n@x.io").unwrap();

        let row = record.serialize().unwrap();
        assert_eq!(row.key, Some(PrimaryKey::from("row-1")));
        assert_eq!(row.cells.get("nick:"), Some(&json!("neo")));
        assert_eq!(row.cells.get("score:"), Some(&json!("9.5")));
        assert_eq!(row.cells.get("info:em"), Some(&json!("n@x.io")));

        let mut raw = row.cells.clone();
        raw.insert(PK_KEY.into(), json!("row-1"));
        let loaded = Record::from_raw(schema, &raw).unwrap();
        assert_eq!(loaded, record);
    }
}
