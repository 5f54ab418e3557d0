//! The production database query seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use delivery_core::nested::get_nested;
use delivery_core::types::{EntityId, Record};

use crate::error::ShotGridError;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Is,
    IsNot,
    In,
    NotIn,
}

/// One `[field, operator, value]` condition. A filter list is ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, FilterOperator, Value)", into = "(String, FilterOperator, Value)")]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl From<(String, FilterOperator, Value)> for Filter {
    fn from((field, operator, value): (String, FilterOperator, Value)) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }
}

impl From<Filter> for (String, FilterOperator, Value) {
    fn from(filter: Filter) -> Self {
        (filter.field, filter.operator, filter.value)
    }
}

impl Filter {
    pub fn is(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Is,
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::In,
            value: Value::Array(values),
        }
    }

    /// `{"type": ..., "id": ...}` link value.
    pub fn link(entity_type: &str, id: EntityId) -> Value {
        serde_json::json!({"type": entity_type, "id": id})
    }

    /// Whether `record` satisfies this condition. Dotted fields follow
    /// links, and multi-entity fields match when any element matches.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = lookup(record, &self.field).unwrap_or(&Value::Null);
        let is = |expected: &Value| value_matches(actual, expected);

        match self.operator {
            FilterOperator::Is => is(&self.value),
            FilterOperator::IsNot => !is(&self.value),
            FilterOperator::In => self.value.as_array().is_some_and(|v| v.iter().any(is)),
            FilterOperator::NotIn => !self.value.as_array().is_some_and(|v| v.iter().any(is)),
        }
    }
}

fn lookup<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    match field.split_once('.') {
        None => record.get(field),
        Some((head, rest)) => get_nested(record.get(head)?, rest),
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(items), expected) if !expected.is_array() => {
            items.iter().any(|item| value_matches(item, expected))
        }
        (Value::Object(a), Value::Object(e)) if e.contains_key("id") => {
            a.get("id") == e.get("id")
                && match (a.get("type"), e.get("type")) {
                    (Some(at), Some(et)) => at == et,
                    _ => true,
                }
        }
        _ => actual == expected,
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Entity-oriented query API of the production database.
#[async_trait]
pub trait ShotGridConnection: Send + Sync {
    /// Records of `entity_type` matching every filter. An empty `fields`
    /// list returns every field.
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Vec<Record>, ShotGridError>;

    async fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Option<Record>, ShotGridError> {
        Ok(self.find(entity_type, filters, fields).await?.into_iter().next())
    }

    /// Write `data` onto a record and return the updated fields.
    async fn update(
        &self,
        entity_type: &str,
        id: EntityId,
        data: Record,
    ) -> Result<Record, ShotGridError>;

    /// Field names of `entity_type`.
    async fn schema_field_read(&self, entity_type: &str) -> Result<Vec<String>, ShotGridError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
