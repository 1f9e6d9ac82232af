//! Parameterised SQL for the relational layout: an `id` identity column, a `data`
//! JSON document column and one physical column per mapped field.

use super::plan::{ColumnRef, Predicate, QueryPlan};
use crate::core::{OrmError, PrimaryKey, Result, RowData};
use crate::schema::model::is_identifier;
use serde_json::Value as Json;

pub const ID_COLUMN: &str = "id";
pub const DATA_COLUMN: &str = "data";

/// SQL text with `?` placeholders and their values in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Json>,
}

impl SqlStatement {
    fn new(sql: String, params: Vec<Json>) -> Self {
        Self { sql, params }
    }
}

/// Key columns are spliced into the statement text, never bound.
fn key_column(pk_name: &str) -> Result<&str> {
    if is_identifier(pk_name) {
        Ok(pk_name)
    } else {
        Err(OrmError::UnsupportedOperation(format!(
            "'{}' is not a column name",
            pk_name
        )))
    }
}

fn column_expr(predicate: &Predicate) -> Result<String> {
    match &predicate.column {
        ColumnRef::Physical(column) => Ok(column.clone()),
        ColumnRef::Document(key) => Ok(format!("JSON_EXTRACT({}, '$.{}')", DATA_COLUMN, key)),
        other => Err(OrmError::UnsupportedOperation(format!(
            "{:?} is not a relational column",
            other
        ))),
    }
}

fn conditions(plan: &QueryPlan, with_cursor: bool) -> Result<(Vec<String>, Vec<Json>)> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for predicate in plan.all_predicates() {
        clauses.push(format!("{} {} ?", column_expr(predicate)?, predicate.op.sql()));
        params.push(predicate.value.clone());
    }
    if with_cursor {
        if let Some(cursor) = &plan.cursor {
            let op = if plan.descending { "<" } else { ">" };
            clauses.push(format!("{} {} ?", key_column(&plan.primary_key)?, op));
            params.push(cursor.to_json());
        }
    }
    Ok((clauses, params))
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn document_param(row: &RowData) -> Result<Json> {
    Ok(Json::String(serde_json::to_string(&row.cells)?))
}

/// One keyset page, ordered by primary key.
pub fn select(table: &str, plan: &QueryPlan) -> Result<SqlStatement> {
    let (clauses, mut params) = conditions(plan, true)?;
    let direction = if plan.descending { "DESC" } else { "ASC" };
    params.push(Json::from(plan.limit as u64));
    Ok(SqlStatement::new(
        format!(
            "SELECT {}, {} FROM {}{} ORDER BY {} {} LIMIT ?",
            ID_COLUMN,
            DATA_COLUMN,
            table,
            where_sql(&clauses),
            key_column(&plan.primary_key)?,
            direction
        ),
        params,
    ))
}

/// Row count of the predicates; cursor and limit do not apply.
pub fn count(table: &str, plan: &QueryPlan) -> Result<SqlStatement> {
    let (clauses, params) = conditions(plan, false)?;
    Ok(SqlStatement::new(
        format!("SELECT COUNT(1) FROM {}{}", table, where_sql(&clauses)),
        params,
    ))
}

/// Insert of a document and its mapped columns. A supplied key fills the identity column.
pub fn insert(table: &str, row: &RowData) -> Result<SqlStatement> {
    let mut columns = vec![DATA_COLUMN.to_string()];
    let mut params = vec![document_param(row)?];
    for (column, value) in &row.columns {
        columns.push(column.clone());
        params.push(value.clone());
    }
    if let Some(key) = &row.key {
        columns.push(ID_COLUMN.to_string());
        params.push(key.to_json());
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    Ok(SqlStatement::new(
        format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders),
        params,
    ))
}

pub fn update(table: &str, key: &PrimaryKey, row: &RowData, pk_name: &str) -> Result<SqlStatement> {
    let mut assignments = vec![format!("{} = ?", DATA_COLUMN)];
    let mut params = vec![document_param(row)?];
    for (column, value) in &row.columns {
        assignments.push(format!("{} = ?", column));
        params.push(value.clone());
    }
    params.push(key.to_json());
    Ok(SqlStatement::new(
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            table,
            assignments.join(", "),
            key_column(pk_name)?
        ),
        params,
    ))
}

pub fn delete(table: &str, key: &PrimaryKey, pk_name: &str) -> Result<SqlStatement> {
    Ok(SqlStatement::new(
        format!("DELETE FROM {} WHERE {} = ?", table, key_column(pk_name)?),
        vec![key.to_json()],
    ))
}

pub fn select_by_keys(table: &str, keys: &[PrimaryKey], pk_name: &str) -> Result<SqlStatement> {
    let placeholders = vec!["?"; keys.len()].join(", ");
    Ok(SqlStatement::new(
        format!(
            "SELECT {}, {} FROM {} WHERE {} IN ({})",
            ID_COLUMN,
            DATA_COLUMN,
            table,
            key_column(pk_name)?,
            placeholders
        ),
        keys.iter().map(PrimaryKey::to_json).collect(),
    ))
}
