//! Declarative schema files.
//!
//! A schema file is a JSON document with three lists: `enums`, `embedded`
//! (schemas for nested records, resolved in order so later entries may refer to
//! earlier ones) and `schemas` (table schemas).

use super::{
    ColumnOptions, EnumMember, EnumType, Family, Field, FieldKind, Index, Schema, SchemaBuilder,
    SchemaRegistry,
};
use crate::core::{OrmError, Result, StorageMode, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub enums: Vec<EnumDefinition>,
    #[serde(default)]
    pub embedded: Vec<SchemaDefinition>,
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    pub members: Vec<EnumMember>,
    #[serde(default)]
    pub default: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: StorageMode,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub families: Vec<FamilyDefinition>,
    #[serde(default)]
    pub queryable: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub version_field: Option<String>,
    #[serde(default)]
    pub create_time_field: Option<String>,
    #[serde(default)]
    pub update_time_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(flatten)]
    pub options: ColumnOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    /// One of `string`, `int`, `float`, `bool`, `timestamp`, `enum`, `object`, `list`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Enum name for `enum`, embedded schema name for `object` and `list`.
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub default: Option<Json>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub queryable: bool,
    #[serde(default)]
    pub mapped: bool,
    #[serde(flatten)]
    pub options: ColumnOptions,
}

fn default_mode() -> StorageMode {
    StorageMode::Relational
}

struct Scope {
    enums: HashMap<String, Arc<EnumType>>,
    embedded: HashMap<String, Arc<Schema>>,
}

impl SchemaFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Builds every table schema, in file order.
    pub fn resolve(&self) -> Result<Vec<Arc<Schema>>> {
        let mut scope = Scope {
            enums: HashMap::new(),
            embedded: HashMap::new(),
        };
        for definition in &self.enums {
            let mut enum_type = EnumType::new(&definition.name);
            for member in &definition.members {
                enum_type = enum_type.member(&member.name, member.value);
            }
            if let Some(default) = definition.default {
                enum_type = enum_type.default_value(default);
            }
            enum_type.validate()?;
            scope.enums.insert(definition.name.clone(), Arc::new(enum_type));
        }
        for definition in &self.embedded {
            let schema = definition.build(&scope, true)?;
            scope.embedded.insert(definition.name.clone(), schema);
        }
        self.schemas
            .iter()
            .map(|definition| definition.build(&scope, false))
            .collect()
    }

    pub fn into_registry(self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for schema in self.resolve()? {
            registry.register(schema)?;
        }
        Ok(registry)
    }
}

impl SchemaDefinition {
    fn build(&self, scope: &Scope, embedded: bool) -> Result<Arc<Schema>> {
        let mut builder = if embedded {
            SchemaBuilder::embedded(&self.name)
        } else {
            SchemaBuilder::new(&self.name)
        }
        .mode(self.mode);

        if let Some(table) = &self.table {
            builder = builder.table(table);
        }
        if let Some(database) = &self.database {
            builder = builder.database(database);
        }
        for field in &self.fields {
            builder = builder.field(field.build(scope)?);
        }
        for family in &self.families {
            let mut built = Family::new(&family.name).options(family.options.clone());
            for field in &family.fields {
                built = built.field(field.build(scope)?);
            }
            builder = builder.family(built);
        }
        for name in &self.queryable {
            builder = builder.queryable(name);
        }
        for index in &self.indexes {
            builder = builder.index(index.clone());
        }
        if let Some(name) = &self.version_field {
            builder = builder.version_field(name);
        }
        if let Some(name) = &self.create_time_field {
            builder = builder.create_time_field(name);
        }
        if let Some(name) = &self.update_time_field {
            builder = builder.update_time_field(name);
        }
        builder.build()
    }
}

impl FieldDefinition {
    fn build(&self, scope: &Scope) -> Result<Field> {
        let kind = match self.kind.as_str() {
            "string" => FieldKind::String,
            "int" => FieldKind::Int,
            "float" => FieldKind::Float,
            "bool" => FieldKind::Bool,
            "timestamp" => FieldKind::Timestamp,
            "enum" => FieldKind::Enum(self.lookup(&scope.enums, "enum")?),
            "object" => FieldKind::Object(self.lookup(&scope.embedded, "embedded schema")?),
            "list" => match &self.reference {
                Some(_) => FieldKind::List(Some(self.lookup(&scope.embedded, "embedded schema")?)),
                None => FieldKind::List(None),
            },
            other => {
                return Err(OrmError::SchemaDefinition(format!(
                    "field '{}' has unknown type '{}'",
                    self.name, other
                )));
            }
        };

        let mut field = Field::new(&self.name, kind).options(self.options.clone());
        if let Some(column) = &self.column {
            field = field.column(column);
        }
        if self.primary_key {
            field = field.primary_key();
        }
        if self.queryable {
            field = field.queryable();
        }
        if self.mapped {
            field = field.mapped();
        }
        if let Some(raw) = &self.default {
            let value = match field.to_native(raw)? {
                Value::Enum(member) => Value::Integer(member.value),
                other => other,
            };
            field = field.with_default(value);
        }
        Ok(field)
    }

    fn lookup<T>(&self, table: &HashMap<String, Arc<T>>, what: &str) -> Result<Arc<T>> {
        let name = self.reference.as_deref().ok_or_else(|| {
            OrmError::SchemaDefinition(format!("field '{}' needs a {} reference", self.name, what))
        })?;
        table.get(name).cloned().ok_or_else(|| {
            OrmError::SchemaDefinition(format!(
                "field '{}' refers to unknown {} '{}'",
                self.name, what, name
            ))
        })
    }
}
