use super::{ColumnOptions, Family, Field, FieldKind, Index};
use crate::core::{DEFAULT_PRIMARY_KEY, OrmError, ROW_KEY, Result, StorageMode};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles");
}

pub const VERSION_FIELD: &str = "dver";
pub const CREATE_TIME_FIELD: &str = "create_time";
pub const UPDATE_TIME_FIELD: &str = "update_time";

pub const DEFAULT_DATABASE: &str = "default";

/// Resolved, immutable description of one record type.
#[derive(Debug)]
pub struct Schema {
    name: String,
    table: String,
    database: String,
    mode: StorageMode,
    primary_key: String,
    fields: Vec<Field>,
    families: Vec<Family>,
    queryable: Vec<String>,
    indexes: Vec<Index>,
    version_field: Option<String>,
    create_time_field: Option<String>,
    update_time_field: Option<String>,
    embedded: bool,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Name of the key column: the primary-key field, `id` or `rowkey`.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// The field flagged as primary key, if any.
    pub fn primary_key_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.is_primary_key())
    }

    /// True when the backend assigns keys on insert.
    pub fn uses_identity(&self) -> bool {
        self.mode == StorageMode::Relational && self.primary_key == DEFAULT_PRIMARY_KEY
    }

    /// Top-level fields, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    /// Every field, top-level first, then family members.
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .chain(self.families.iter().flat_map(|family| family.fields().iter()))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.all_fields().find(|f| f.name() == name)
    }

    pub fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name() == name)
    }

    pub fn queryable(&self) -> &[String] {
        &self.queryable
    }

    pub fn is_queryable(&self, field: &str) -> bool {
        self.queryable.iter().any(|q| q == field)
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn version_field(&self) -> Option<&str> {
        self.version_field.as_deref()
    }

    pub fn create_time_field(&self) -> Option<&str> {
        self.create_time_field.as_deref()
    }

    pub fn update_time_field(&self) -> Option<&str> {
        self.update_time_field.as_deref()
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Relational fields stored in their own physical column.
    pub fn physical_columns(&self) -> Vec<&Field> {
        if self.mode != StorageMode::Relational {
            return Vec::new();
        }
        self.fields.iter().filter(|f| f.is_mapped()).collect()
    }

    /// Whether rows can be looked up by `column`: the primary key, the identity
    /// column or a mapped physical column.
    pub fn is_key_column(&self, column: &str) -> bool {
        column == self.primary_key
            || column == DEFAULT_PRIMARY_KEY
            || self
                .physical_columns()
                .iter()
                .any(|field| field.storage_name() == column)
    }

    /// Column-family options used to create the wide-column table.
    ///
    /// Every family gets an entry, as does every top-level field (its own family).
    pub fn table_options(&self) -> BTreeMap<String, ColumnOptions> {
        let mut options = BTreeMap::new();
        for field in &self.fields {
            if field.is_primary_key() {
                continue;
            }
            options.insert(field.storage_name().to_string(), field.column_options().clone());
        }
        for family in &self.families {
            options.insert(family.name().to_string(), family.column_options().clone());
        }
        options
    }
}

/// Collects declarations and resolves them into a [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    table: Option<String>,
    database: Option<String>,
    mode: StorageMode,
    fields: Vec<Field>,
    families: Vec<Family>,
    queryable: Vec<String>,
    indexes: Vec<Index>,
    version_field: Option<String>,
    create_time_field: Option<String>,
    update_time_field: Option<String>,
    embedded: bool,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            database: None,
            mode: StorageMode::Relational,
            fields: Vec::new(),
            families: Vec::new(),
            queryable: Vec::new(),
            indexes: Vec::new(),
            version_field: None,
            create_time_field: None,
            update_time_field: None,
            embedded: false,
        }
    }

    /// Schema of nested records for object and list fields. Has no table.
    pub fn embedded(name: impl Into<String>) -> Self {
        let mut builder = Self::new(name);
        builder.embedded = true;
        builder
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn wide_column(self) -> Self {
        self.mode(StorageMode::WideColumn)
    }

    pub fn relational(self) -> Self {
        self.mode(StorageMode::Relational)
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn family(mut self, family: Family) -> Self {
        self.families.push(family);
        self
    }

    /// Adds a field name to the query allow-list.
    pub fn queryable(mut self, field: impl Into<String>) -> Self {
        self.queryable.push(field.into());
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    pub fn create_time_field(mut self, field: impl Into<String>) -> Self {
        self.create_time_field = Some(field.into());
        self
    }

    pub fn update_time_field(mut self, field: impl Into<String>) -> Self {
        self.update_time_field = Some(field.into());
        self
    }

    pub fn build(self) -> Result<Arc<Schema>> {
        check_identifier("schema", &self.name)?;
        if self.embedded {
            if self.mode != StorageMode::Relational || !self.families.is_empty() {
                return Err(self.error("an embedded schema cannot declare families"));
            }
            if self.fields.iter().any(Field::is_primary_key) {
                return Err(self.error("an embedded schema cannot declare a primary key"));
            }
        }

        let table = self.table.clone().unwrap_or_else(|| self.name.clone());
        let database = self
            .database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        check_identifier("table", &table)?;
        check_identifier("database", &database)?;

        self.check_fields()?;
        let primary_key = self.resolve_primary_key()?;

        let mut queryable: Vec<String> = Vec::new();
        let flagged = self
            .fields
            .iter()
            .chain(self.families.iter().flat_map(|f| f.fields().iter()))
            .filter(|f| f.is_queryable())
            .map(|f| f.name().to_string());
        for name in self.queryable.iter().cloned().chain(flagged) {
            if !self.has_field(&name) {
                return Err(self.error(&format!("queryable field '{}' is not declared", name)));
            }
            if !queryable.contains(&name) {
                queryable.push(name);
            }
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            check_identifier("index", &index.name)?;
            if !index_names.insert(index.name.as_str()) {
                return Err(self.error(&format!("index '{}' is declared twice", index.name)));
            }
            if index.fields.is_empty() {
                return Err(self.error(&format!("index '{}' has no fields", index.name)));
            }
            if let Some(missing) = index.fields.iter().find(|f| !self.has_field(f)) {
                return Err(self.error(&format!(
                    "index '{}' names unknown field '{}'",
                    index.name, missing
                )));
            }
        }

        let version_field = self.bookkeeping(&self.version_field, VERSION_FIELD, |kind| {
            matches!(kind, FieldKind::Int)
        })?;
        let time_kind = |kind: &FieldKind| matches!(kind, FieldKind::Timestamp | FieldKind::Int);
        let create_time_field = self.bookkeeping(&self.create_time_field, CREATE_TIME_FIELD, time_kind)?;
        let update_time_field = self.bookkeeping(&self.update_time_field, UPDATE_TIME_FIELD, time_kind)?;

        let mut fields = self.fields;
        if self.mode == StorageMode::Relational && primary_key != DEFAULT_PRIMARY_KEY {
            // custom keys are looked up by their physical column
            fields = fields
                .into_iter()
                .map(|f| if f.is_primary_key() && !f.is_mapped() { f.mapped() } else { f })
                .collect();
        }

        Ok(Arc::new(Schema {
            name: self.name,
            table,
            database,
            mode: self.mode,
            primary_key,
            fields,
            families: self.families,
            queryable,
            indexes: self.indexes,
            version_field,
            create_time_field,
            update_time_field,
            embedded: self.embedded,
        }))
    }

    fn check_fields(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut top_level_columns = HashSet::new();
        for field in &self.fields {
            self.check_field(field, &mut names)?;
            if !top_level_columns.insert(field.storage_name()) {
                return Err(self.error(&format!(
                    "storage name '{}' is used twice",
                    field.storage_name()
                )));
            }
        }

        let mut family_names = HashSet::new();
        for family in &self.families {
            if self.mode != StorageMode::WideColumn {
                return Err(self.error(&format!(
                    "family '{}' is only supported by wide-column schemas",
                    family.name()
                )));
            }
            check_identifier("family", family.name())?;
            if !family_names.insert(family.name()) || top_level_columns.contains(family.name()) {
                return Err(self.error(&format!("family name '{}' is used twice", family.name())));
            }
            let mut qualifiers = HashSet::new();
            for field in family.fields() {
                self.check_field(field, &mut names)?;
                if field.is_primary_key() {
                    return Err(self.error(&format!(
                        "family field '{}' cannot be the primary key",
                        field.name()
                    )));
                }
                if !qualifiers.insert(field.storage_name()) {
                    return Err(self.error(&format!(
                        "qualifier '{}' is used twice in family '{}'",
                        field.storage_name(),
                        family.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_field<'a>(&self, field: &'a Field, names: &mut HashSet<&'a str>) -> Result<()> {
        check_identifier("field", field.name())?;
        check_identifier("column", field.storage_name())?;
        if !names.insert(field.name()) {
            return Err(self.error(&format!("field '{}' is declared twice", field.name())));
        }
        match field.kind() {
            FieldKind::Enum(enum_type) => enum_type.validate()?,
            FieldKind::Object(nested) | FieldKind::List(Some(nested)) if !nested.is_embedded() => {
                return Err(self.error(&format!(
                    "field '{}' refers to '{}', which is not an embedded schema",
                    field.name(),
                    nested.name()
                )));
            }
            _ => {}
        }
        if field.kind().is_structured() && self.mode == StorageMode::WideColumn {
            return Err(self.error(&format!(
                "{} field '{}' is only supported by relational schemas",
                field.kind().name(),
                field.name()
            )));
        }
        if field.is_mapped() && (self.mode != StorageMode::Relational || field.family().is_some()) {
            return Err(self.error(&format!(
                "field '{}' can only be mapped in a relational schema",
                field.name()
            )));
        }
        if let Some(default) = field.declared_default() {
            if field.coerce(default.clone()).is_none() {
                return Err(self.error(&format!(
                    "default {} does not fit {} field '{}'",
                    default,
                    field.kind().name(),
                    field.name()
                )));
            }
        }
        Ok(())
    }

    fn resolve_primary_key(&self) -> Result<String> {
        let keys: Vec<&Field> = self.fields.iter().filter(|f| f.is_primary_key()).collect();
        match keys.as_slice() {
            [] => Ok(match self.mode {
                StorageMode::Relational => DEFAULT_PRIMARY_KEY.to_string(),
                StorageMode::WideColumn => ROW_KEY.to_string(),
            }),
            [key] => {
                if !matches!(key.kind(), FieldKind::Int | FieldKind::String) {
                    return Err(self.error(&format!(
                        "primary key '{}' must be an int or string field",
                        key.name()
                    )));
                }
                Ok(key.name().to_string())
            }
            several => Err(self.error(&format!(
                "{} primary keys declared ({})",
                several.len(),
                several.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    fn bookkeeping(
        &self,
        explicit: &Option<String>,
        conventional: &str,
        kind_ok: impl Fn(&FieldKind) -> bool,
    ) -> Result<Option<String>> {
        let name = match explicit {
            Some(name) => name.as_str(),
            None if self.has_field(conventional) => conventional,
            None => return Ok(None),
        };
        let field = self
            .find_field(name)
            .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), self.name.clone()))?;
        if !kind_ok(field.kind()) {
            return Err(self.error(&format!(
                "bookkeeping field '{}' cannot be {}",
                name,
                field.kind().name()
            )));
        }
        Ok(Some(name.to_string()))
    }

    fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .chain(self.families.iter().flat_map(|f| f.fields().iter()))
            .find(|f| f.name() == name)
    }

    fn has_field(&self, name: &str) -> bool {
        self.find_field(name).is_some()
    }

    fn error(&self, message: &str) -> OrmError {
        OrmError::SchemaDefinition(format!("{}: {}", self.name, message))
    }
}

/// Table, column and field names are plain SQL identifiers.
pub(crate) fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(OrmError::SchemaDefinition(format!(
            "invalid {} name '{}'",
            what, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relational_defaults_to_identity_key() {
        let schema = SchemaBuilder::new("User")
            .database("main")
            .field(Field::string("name").queryable())
            .field(Field::int("dver"))
            .field(Field::timestamp("create_time"))
            .field(Field::int("update_time"))
            .build()
            .unwrap();

        assert_eq!(schema.table(), "User");
        assert_eq!(schema.primary_key(), "id");
        assert!(schema.uses_identity());
        assert_eq!(schema.queryable(), &["name".to_string()]);
        assert_eq!(schema.version_field(), Some("dver"));
        assert_eq!(schema.create_time_field(), Some("create_time"));
        assert_eq!(schema.update_time_field(), Some("update_time"));
    }

    #[test]
    fn test_several_primary_keys_fail() {
        let err = SchemaBuilder::new("Pair")
            .field(Field::int("a").primary_key())
            .field(Field::int("b").primary_key())
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::SchemaDefinition(_)));
    }

    #[test]
    fn test_custom_key_becomes_physical_column() {
        let schema = SchemaBuilder::new("Account")
            .field(Field::string("uid").primary_key())
            .field(Field::string("name"))
            .build()
            .unwrap();
        assert_eq!(schema.primary_key(), "uid");
        assert!(!schema.uses_identity());
        let physical: Vec<&str> = schema.physical_columns().iter().map(|f| f.name()).collect();
        assert_eq!(physical, vec!["uid"]);
    }

    #[test]
    fn test_mode_specific_kinds() {
        let address = SchemaBuilder::embedded("Address")
            .field(Field::string("city"))
            .build()
            .unwrap();
        assert!(SchemaBuilder::new("Wide")
            .wide_column()
            .field(Field::object("address", address.clone()))
            .build()
            .is_err());
        assert!(SchemaBuilder::new("Rel")
            .family(Family::new("info").field(Field::string("email")))
            .build()
            .is_err());
        assert!(SchemaBuilder::new("Rel")
            .field(Field::object("address", address))
            .build()
            .is_ok());
    }

    #[test]
    fn test_rejects_bad_declarations() {
        assert!(SchemaBuilder::new("Bad name").build().is_err());
        assert!(SchemaBuilder::new("Dup")
            .field(Field::int("a"))
            .field(Field::string("a"))
            .build()
            .is_err());
        assert!(SchemaBuilder::new("Idx")
            .field(Field::int("a"))
            .index(Index::new("by_b", ["b"]))
            .build()
            .is_err());
        assert!(SchemaBuilder::new("Ver")
            .field(Field::string("dver"))
            .build()
            .is_err());
        assert!(SchemaBuilder::new("Def")
            .field(Field::int("n").with_default("x"))
            .build()
            .is_err());
    }

    #[test]
    fn test_wide_table_options() {
        let schema = SchemaBuilder::new("Profile")
            .wide_column()
            .field(Field::string("name").max_versions(3))
            .family(
                Family::new("info")
                    .field(Field::string("email"))
                    .options(ColumnOptions {
                        compression: Some("GZ".into()),
                        ..ColumnOptions::default()
                    }),
            )
            .build()
            .unwrap();

        assert_eq!(schema.primary_key(), "rowkey");
        assert!(!schema.uses_identity());
        let options = schema.table_options();
        assert_eq!(options["name"].max_versions, Some(3));
        assert_eq!(options["info"].compression.as_deref(), Some("GZ"));
    }
}
