use crate::core::Value;
use serde_json::Value as Json;
use std::cmp::Ordering;

/// Separator between a field name and its operator suffix, as in `age__gte`.
pub const OPERATOR_DELIMITER: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Gte,
    Gt,
    Lte,
    Lt,
    Ne,
}

impl Operator {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gte" => Some(Self::Gte),
            "gt" => Some(Self::Gt),
            "lte" => Some(Self::Lte),
            "lt" => Some(Self::Lt),
            "ne" => Some(Self::Ne),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gte => ">=",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Lt => "<",
            Self::Ne => "<>",
        }
    }

    /// Comparison operator of the wide-column filter language.
    pub fn scan(&self) -> &'static str {
        match self {
            Self::Ne => "!=",
            other => other.sql(),
        }
    }

    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Gte => ordering != Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
            Self::Lte => ordering != Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
            Self::Ne => ordering != Ordering::Equal,
        }
    }
}

/// Splits `field__op` into the field name and operator.
///
/// A suffix that names no operator is part of the field name, so `a__b` is an
/// equality test on the field `a__b`.
pub fn parse_key(key: &str) -> (&str, Operator) {
    key.rsplit_once(OPERATOR_DELIMITER)
        .and_then(|(field, suffix)| Operator::from_suffix(suffix).map(|op| (field, op)))
        .unwrap_or((key, Operator::Eq))
}

/// Ordered query mapping. Assigning a key twice replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for (key, value) in iter {
            filter.insert(key, value);
        }
        filter
    }
}

/// Orders two storage values: numbers numerically, strings lexically.
pub fn compare_json(left: &Json, right: &Json) -> Option<Ordering> {
    match (left, right) {
        (Json::Number(a), Json::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        (Json::Bool(a), Json::Bool(b)) => Some(a.cmp(b)),
        (Json::Null, Json::Null) => Some(Ordering::Equal),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}
