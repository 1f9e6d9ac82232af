use super::filter::{Filter, Operator, parse_key};
use super::index_select::select_index;
use crate::core::{OrmError, PrimaryKey, Result, StorageMode, Value};
use crate::schema::{Field, Schema};
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Where a predicate's value lives in a stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// Relational physical column of a mapped field.
    Physical(String),
    /// Key inside the relational `data` document.
    Document(String),
    /// Wide-column cell; top-level fields use their name as family and an empty qualifier.
    Cell { family: String, qualifier: String },
    /// The wide-column row key.
    RowKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub column: ColumnRef,
    pub op: Operator,
    /// Comparison operand in the storage representation of the schema's mode.
    pub value: Json,
}

/// Equality predicates answered by the selected index, in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSeek {
    pub name: String,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub index: Option<IndexSeek>,
    pub predicates: Vec<Predicate>,
    pub cursor: Option<PrimaryKey>,
    pub limit: usize,
    pub descending: bool,
    pub primary_key: String,
}

impl QueryPlan {
    /// Index-seek predicates first, then the generic ones.
    pub fn all_predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.index
            .iter()
            .flat_map(|seek| seek.predicates.iter())
            .chain(self.predicates.iter())
    }

    pub fn index_fields(&self) -> Vec<&str> {
        self.index
            .iter()
            .flat_map(|seek| seek.predicates.iter().map(|p| p.field.as_str()))
            .collect()
    }
}

/// Keyset page request: newest first, ten rows, no cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub cursor: Option<PrimaryKey>,
    pub limit: usize,
    pub descending: bool,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
            descending: true,
        }
    }
}

impl PageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(mut self, cursor: impl Into<PrimaryKey>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Rows per page, at least one.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.descending = false;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Turns a [`Filter`] into a [`QueryPlan`] for one schema.
pub struct QueryBuilder {
    schema: Arc<Schema>,
}

impl QueryBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Allow-listed predicates in filter order. Disallowed fields, which include
    /// keys with an unknown operator suffix, are dropped.
    pub fn predicates(&self, filter: &Filter) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::with_capacity(filter.len());
        for (key, value) in filter.entries() {
            let (name, op) = parse_key(key);
            if !self.schema.is_queryable(name) {
                debug!(table = %self.schema.table(), key = %key, "field not queryable, dropped");
                continue;
            }
            let field = self
                .schema
                .field(name)
                .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), self.schema.name().to_string()))?;
            let Some(operand) = self.operand(field, value)? else {
                warn!(
                    table = %self.schema.table(),
                    key = %key,
                    expected = field.kind().name(),
                    got = value.type_name(),
                    "filter value does not match field, dropped"
                );
                continue;
            };
            predicates.push(Predicate {
                field: name.to_string(),
                column: self.column_ref(field),
                op,
                value: operand,
            });
        }
        Ok(predicates)
    }

    pub fn plan(&self, filter: &Filter, page: &PageRequest) -> Result<QueryPlan> {
        let mut predicates = self.predicates(filter)?;

        let index = match select_index(self.schema.indexes(), &predicates) {
            Some((index, matched)) => {
                let mut seek = Vec::with_capacity(matched);
                for field in index.fields.iter().take(matched) {
                    if let Some(pos) = predicates
                        .iter()
                        .position(|p| p.op == Operator::Eq && p.field == *field)
                    {
                        seek.push(predicates.remove(pos));
                    }
                }
                debug!(table = %self.schema.table(), index = %index.name, matched, "index selected");
                Some(IndexSeek {
                    name: index.name.clone(),
                    predicates: seek,
                })
            }
            None => None,
        };

        Ok(QueryPlan {
            index,
            predicates,
            cursor: page.cursor.clone().filter(PrimaryKey::is_usable),
            limit: page.limit.max(1),
            descending: page.descending,
            primary_key: self.schema.primary_key().to_string(),
        })
    }

    fn column_ref(&self, field: &Field) -> ColumnRef {
        match self.schema.mode() {
            StorageMode::Relational if field.is_mapped() => {
                ColumnRef::Physical(field.storage_name().to_string())
            }
            StorageMode::Relational => ColumnRef::Document(field.storage_name().to_string()),
            StorageMode::WideColumn if field.is_primary_key() => ColumnRef::RowKey,
            StorageMode::WideColumn => match field.family() {
                Some(family) => ColumnRef::Cell {
                    family: family.to_string(),
                    qualifier: field.storage_name().to_string(),
                },
                None => ColumnRef::Cell {
                    family: field.storage_name().to_string(),
                    qualifier: String::new(),
                },
            },
        }
    }

    /// Storage-form operand for `value`, or `None` when it cannot be read as
    /// the field's kind. Scalars that only differ in representation (`"1"`,
    /// `1.0` for an int) go through the field's storage decoder.
    fn operand(&self, field: &Field, value: &Value) -> Result<Option<Json>> {
        let value = match value {
            Value::Enum(member) => Value::Integer(member.value),
            other => other.clone(),
        };
        let coerced = match field.coerce(value.clone()) {
            Some(coerced) => Some(coerced),
            None if field.kind().is_structured() => None,
            None => match value.to_plain_json() {
                Json::Null => None,
                Json::String(s) if s.trim().is_empty() => None,
                plain => field.to_native(&plain).ok(),
            },
        };
        match coerced {
            Some(coerced) => field.to_storage(&coerced, self.schema.mode()).map(Some),
            None => Ok(None),
        }
    }
}
