use crate::core::{Result, Value};
use crate::schema::Field;

/// Mutable view of a list field. Every insertion is checked against the item schema.
pub struct ListHandle<'a> {
    field: &'a Field,
    items: &'a mut Vec<Value>,
}

impl<'a> ListHandle<'a> {
    pub(crate) fn new(field: &'a Field, items: &'a mut Vec<Value>) -> Self {
        Self { field, items }
    }

    pub fn append(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.field.check_list_item(&value)?;
        self.items.push(value);
        Ok(())
    }

    /// Inserts before `index`; an index past the end appends.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.field.check_list_item(&value)?;
        let index = index.min(self.items.len());
        self.items.insert(index, value);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop()
    }

    /// Removes the first element equal to `value`.
    pub fn remove(&mut self, value: &Value) -> bool {
        match self.items.iter().position(|item| item == value) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }
}
