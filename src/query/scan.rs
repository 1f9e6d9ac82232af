//! Wide-column scans expressed in the HBase filter language.

use super::plan::{ColumnRef, Predicate, QueryPlan};
use crate::core::{OrmError, Result};
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSpec {
    pub filter: Option<String>,
    pub limit: Option<usize>,
    /// Scan from the highest row key down.
    pub reversed: bool,
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn operand_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn predicate_filter(predicate: &Predicate) -> Result<String> {
    let operand = quote(&format!("binary:{}", operand_text(&predicate.value)));
    match &predicate.column {
        ColumnRef::Cell { family, qualifier } => Ok(format!(
            "SingleColumnValueFilter({}, {}, {}, {}, true, true)",
            quote(family),
            quote(qualifier),
            predicate.op.scan(),
            operand
        )),
        ColumnRef::RowKey => Ok(format!("RowFilter({}, {})", predicate.op.scan(), operand)),
        other => Err(OrmError::UnsupportedOperation(format!(
            "{:?} is not a wide-column cell",
            other
        ))),
    }
}

fn build(plan: &QueryPlan, with_cursor: bool) -> Result<Option<String>> {
    let mut filters = plan
        .all_predicates()
        .map(predicate_filter)
        .collect::<Result<Vec<_>>>()?;
    if with_cursor {
        if let Some(cursor) = &plan.cursor {
            let op = if plan.descending { "<" } else { ">" };
            filters.push(format!(
                "RowFilter({}, {})",
                op,
                quote(&format!("binary:{}", cursor))
            ));
        }
    }
    Ok((!filters.is_empty()).then(|| filters.join(" AND ")))
}

/// Filter string, limit and direction of one keyset page.
pub fn compile(plan: &QueryPlan) -> Result<ScanSpec> {
    Ok(ScanSpec {
        filter: build(plan, true)?,
        limit: Some(plan.limit),
        reversed: plan.descending,
    })
}

/// Full scan over the predicates, for counting.
pub fn compile_count(plan: &QueryPlan) -> Result<ScanSpec> {
    Ok(ScanSpec {
        filter: build(plan, false)?,
        limit: None,
        reversed: false,
    })
}
