//! Read access to cached production-database records.
//!
//! The template engine and overrides only need to look records up, so
//! they depend on this trait instead of on the cache itself.

use crate::types::{EntityId, FieldSchema, Record};

pub trait RecordSource {
    /// Id of the project the current session works in.
    fn project_id(&self) -> EntityId;

    /// Records as returned by the database, before overrides.
    fn raw_records(&self, entity_type: &str) -> &[Record];

    /// Records after configured overrides were applied.
    fn processed_records(&self, entity_type: &str) -> &[Record];

    /// Known field names per entity type, empty when no schema was read.
    fn schema(&self) -> &FieldSchema;

    fn raw_by_id(&self, entity_type: &str, id: EntityId) -> Option<&Record> {
        self.raw_records(entity_type)
            .iter()
            .find(|r| record_id(r) == Some(id))
    }

    fn processed_by_id(&self, entity_type: &str, id: EntityId) -> Option<&Record> {
        self.processed_records(entity_type)
            .iter()
            .find(|r| record_id(r) == Some(id))
    }
}

/// `id` field of a record.
pub fn record_id(record: &Record) -> Option<EntityId> {
    record.get("id").and_then(|v| v.as_i64())
}

/// `{type, id}` of an entity link field such as `Version.entity`.
pub fn link_of(record: &Record, field: &str) -> Option<(String, EntityId)> {
    let link = record.get(field)?.as_object()?;
    let entity_type = link.get("type")?.as_str()?.to_string();
    let id = link.get("id")?.as_i64()?;
    Some((entity_type, id))
}

/// In-memory record store, used where no database cache is involved.
#[derive(Debug, Clone, Default)]
pub struct StaticRecords {
    pub project_id: EntityId,
    pub raw: std::collections::HashMap<String, Vec<Record>>,
    pub processed: std::collections::HashMap<String, Vec<Record>>,
    pub schema: FieldSchema,
}

impl StaticRecords {
    pub fn new(project_id: EntityId) -> Self {
        Self {
            project_id,
            ..Self::default()
        }
    }

    /// Insert a record into both the raw and the processed view.
    pub fn insert(&mut self, entity_type: &str, record: Record) {
        self.raw
            .entry(entity_type.to_string())
            .or_default()
            .push(record.clone());
        self.processed
            .entry(entity_type.to_string())
            .or_default()
            .push(record);
    }
}

impl RecordSource for StaticRecords {
    fn project_id(&self) -> EntityId {
        self.project_id
    }

    fn raw_records(&self, entity_type: &str) -> &[Record] {
        self.raw.get(entity_type).map(Vec::as_slice).unwrap_or_default()
    }

    fn processed_records(&self, entity_type: &str) -> &[Record] {
        self.processed
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn schema(&self) -> &FieldSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lookups_by_id_and_link() {
        let mut records = StaticRecords::new(5);
        let version = json!({"id": 11, "entity": {"type": "Shot", "id": 3}});
        records.insert("Version", version.as_object().cloned().unwrap());

        let found = records.raw_by_id("Version", 11).unwrap();
        assert_eq!(link_of(found, "entity"), Some(("Shot".to_string(), 3)));
        assert!(records.processed_by_id("Version", 12).is_none());
        assert!(records.raw_records("Shot").is_empty());
    }
}
