use super::Schema;
use crate::core::{OrmError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table name → schema map owned by the application.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table schema. Embedded schemas and duplicate tables are rejected.
    pub fn register(&mut self, schema: Arc<Schema>) -> Result<()> {
        if schema.is_embedded() {
            return Err(OrmError::SchemaDefinition(format!(
                "embedded schema '{}' has no table to register",
                schema.name()
            )));
        }
        if self.schemas.contains_key(schema.table()) {
            return Err(OrmError::TableRegistered(schema.table().to_string()));
        }
        self.schemas.insert(schema.table().to_string(), schema);
        Ok(())
    }

    pub fn get(&self, table: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, SchemaBuilder};

    #[test]
    fn test_duplicate_table_rejected() {
        let mut registry = SchemaRegistry::new();
        let first = SchemaBuilder::new("User").table("users").build().unwrap();
        let second = SchemaBuilder::new("Member")
            .table("users")
            .field(Field::string("name"))
            .build()
            .unwrap();

        registry.register(first).unwrap();
        assert!(matches!(registry.register(second), Err(OrmError::TableRegistered(_))));
        assert_eq!(registry.tables().collect::<Vec<_>>(), vec!["users"]);
    }

    #[test]
    fn test_embedded_schema_not_registered() {
        let mut registry = SchemaRegistry::new();
        let nested = SchemaBuilder::embedded("Address").build().unwrap();
        assert!(registry.register(nested).is_err());
        assert!(registry.is_empty());
    }
}
