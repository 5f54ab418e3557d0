//! Declarative field overrides for cached records.
//!
//! An override matches records of one entity type on field values and
//! replaces dotted paths with resolved field templates:
//!
//! ```json
//! {
//!   "entity_type": "Version",
//!   "match": {"sg_task.name": "comp"},
//!   "replace": {"sg_path_to_movie": "<version.sg_path_to_frames>"}
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::field_template::FieldTemplate;
use crate::nested::{get_nested, set_nested};
use crate::types::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionOverride {
    pub entity_type: String,
    #[serde(default, rename = "match")]
    pub match_fields: Map<String, Value>,
    /// Dotted path to the template producing its new value.
    #[serde(default)]
    pub replace: BTreeMap<String, FieldTemplate>,
}

impl VersionOverride {
    /// Whether `entity` matches. An empty match always matches. Fields the
    /// record does not carry (or carries as `null`) are skipped, and the
    /// last compared field decides.
    pub fn matches(&self, entity: &Record) -> bool {
        let root = Value::Object(entity.clone());
        let mut matched = self.match_fields.is_empty();

        for (field, expected) in &self.match_fields {
            match get_nested(&root, field) {
                None | Some(Value::Null) => continue,
                Some(actual) => matched = actual == expected,
            }
        }

        matched
    }

    /// Apply the override to a copy of `entity`. Replacement templates
    /// that fail to resolve write an empty string.
    pub fn process(&self, entity: &Record, context: &Context<'_>) -> Record {
        if !self.matches(entity) {
            return entity.clone();
        }

        let mut root = Value::Object(entity.clone());
        let context = context.with_entity(entity);

        for (path, template) in &self.replace {
            let value = match template.apply_context(&context) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(
                        entity_type = %self.entity_type,
                        path = %path,
                        error = %e,
                        "Failed to resolve override value",
                    );
                    String::new()
                }
            };
            set_nested(&mut root, path, Value::String(value));
        }

        match root {
            Value::Object(map) => map,
            _ => entity.clone(),
        }
    }

    /// Leading field names the match clause reads.
    pub fn fields(&self) -> Vec<String> {
        self.match_fields
            .keys()
            .map(|key| key.split('.').next().unwrap_or_default().to_string())
            .collect()
    }
}

/// Apply every override for `entity_type` to each record.
pub fn apply_overrides(
    overrides: &[VersionOverride],
    entity_type: &str,
    records: &[Record],
    context: &Context<'_>,
) -> Vec<Record> {
    let applicable: Vec<&VersionOverride> = overrides
        .iter()
        .filter(|o| o.entity_type == entity_type)
        .collect();

    if applicable.is_empty() {
        return records.to_vec();
    }

    records
        .iter()
        .map(|record| {
            tracing::info!(count = applicable.len(), entity_type, "Applying overrides");
            applicable
                .iter()
                .fold(record.clone(), |current, o| o.process(&current, context))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
