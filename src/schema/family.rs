use super::{ColumnOptions, Field};
use crate::core::{COLUMN_SEPARATOR, JsonMap, Result, StorageMode, Value};
use std::collections::BTreeMap;

/// Group of fields stored under one wide-column family.
#[derive(Debug, Clone)]
pub struct Family {
    name: String,
    fields: Vec<Field>,
    options: ColumnOptions,
}

impl Family {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            options: ColumnOptions::default(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field.in_family(&self.name));
        self
    }

    pub fn options(mut self, options: ColumnOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn column_options(&self) -> &ColumnOptions {
        &self.options
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    fn field_by_qualifier(&self, qualifier: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.storage_name() == qualifier)
    }

    /// Flattens assigned sub-values into `family:qualifier` cells. Nulls are skipped.
    pub fn serialize(&self, values: &BTreeMap<String, Value>, mode: StorageMode) -> Result<JsonMap> {
        let mut cells = JsonMap::new();
        for field in &self.fields {
            let Some(value) = values.get(field.name()) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            cells.insert(field.qualified_name(), field.to_storage(value, mode)?);
        }
        Ok(cells)
    }

    /// Routes raw cells back to sub-fields by qualifier.
    ///
    /// Keys may be `family:qualifier` or an already split bare qualifier. Cells of
    /// other families and unknown qualifiers are ignored.
    pub fn deserialize(&self, raw: &JsonMap) -> Result<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();
        for (key, cell) in raw {
            let qualifier = match key.split_once(COLUMN_SEPARATOR) {
                Some((family, qualifier)) if family == self.name => qualifier,
                Some(_) => continue,
                None => key.as_str(),
            };
            if let Some(field) = self.field_by_qualifier(qualifier) {
                values.insert(field.name().to_string(), field.to_native(cell)?);
            }
        }
        Ok(values)
    }
}
