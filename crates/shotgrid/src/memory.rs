//! Snapshot-backed connection.
//!
//! A snapshot is a JSON document with every record per entity type and,
//! optionally, the schema:
//!
//! ```json
//! {
//!   "schema": {"Shot": ["code", "sg_status_list"]},
//!   "entities": {"Shot": [{"type": "Shot", "id": 2, "code": "sh010"}]}
//! }
//! ```
//!
//! Without a schema entry, the fields of an entity type are the union of
//! the keys of its records. Updates are applied to the in-memory records
//! and kept in order for inspection.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use delivery_core::records::record_id;
use delivery_core::types::{EntityId, Record};

use crate::connection::{Filter, ShotGridConnection};
use crate::error::ShotGridError;

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    schema: HashMap<String, Vec<String>>,
    #[serde(default)]
    entities: HashMap<String, Vec<Record>>,
}

/// A recorded `update` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub entity_type: String,
    pub id: EntityId,
    pub data: Record,
}

#[derive(Debug, Default)]
pub struct InMemoryShotGrid {
    schema: HashMap<String, Vec<String>>,
    entities: Mutex<HashMap<String, Vec<Record>>>,
    updates: Mutex<Vec<Update>>,
}

impl InMemoryShotGrid {
    pub fn from_snapshot(path: &Path) -> Result<Self, ShotGridError> {
        let text = std::fs::read_to_string(path).map_err(|source| ShotGridError::Snapshot {
            path: path.to_path_buf(),
            source,
        })?;
        let connection = Self::from_json(&serde_json::from_str(&text)?)?;
        tracing::info!(path = %path.display(), "Loaded database snapshot");
        Ok(connection)
    }

    pub fn from_json(value: &Value) -> Result<Self, ShotGridError> {
        let snapshot = Snapshot::deserialize(value)?;
        Ok(Self {
            schema: snapshot.schema,
            entities: Mutex::new(snapshot.entities),
            updates: Mutex::default(),
        })
    }

    /// Add a record, tagging it with its entity type.
    pub fn insert(&self, entity_type: &str, mut record: Record) {
        record
            .entry("type")
            .or_insert_with(|| Value::String(entity_type.to_string()));
        self.lock_entities()
            .entry(entity_type.to_string())
            .or_default()
            .push(record);
    }

    pub fn updates(&self) -> Vec<Update> {
        self.updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }

    fn lock_entities(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Record>>> {
        self.entities
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn project(record: &Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return record.clone();
    }
    record
        .iter()
        .filter(|(key, _)| key.as_str() == "id" || key.as_str() == "type" || fields.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl ShotGridConnection for InMemoryShotGrid {
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Vec<Record>, ShotGridError> {
        let entities = self.lock_entities();
        let found = entities
            .get(entity_type)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| filters.iter().all(|f| f.matches(record)))
                    .map(|record| project(record, fields))
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }

    async fn update(
        &self,
        entity_type: &str,
        id: EntityId,
        data: Record,
    ) -> Result<Record, ShotGridError> {
        {
            let mut entities = self.lock_entities();
            let record = entities
                .get_mut(entity_type)
                .and_then(|records| records.iter_mut().find(|r| record_id(r) == Some(id)))
                .ok_or_else(|| ShotGridError::NotFound {
                    entity_type: entity_type.to_string(),
                    id,
                })?;
            for (key, value) in &data {
                record.insert(key.clone(), value.clone());
            }
        }

        tracing::info!(entity_type, id, fields = ?data.keys().collect::<Vec<_>>(), "Updated record");
        self.updates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Update {
                entity_type: entity_type.to_string(),
                id,
                data: data.clone(),
            });
        Ok(data)
    }

    async fn schema_field_read(&self, entity_type: &str) -> Result<Vec<String>, ShotGridError> {
        if let Some(fields) = self.schema.get(entity_type) {
            return Ok(fields.clone());
        }

        let entities = self.lock_entities();
        let records = entities
            .get(entity_type)
            .ok_or_else(|| ShotGridError::UnknownEntityType(entity_type.to_string()))?;
        let fields: BTreeSet<&String> = records.iter().flat_map(|r| r.keys()).collect();
        Ok(fields.into_iter().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn connection() -> InMemoryShotGrid {
        InMemoryShotGrid::from_json(&json!({
            "schema": {"Project": ["name", "sg_short_name"]},
            "entities": {
                "Project": [{"type": "Project", "id": 1, "name": "Show", "sg_short_name": "shw"}],
                "Shot": [
                    {"type": "Shot", "id": 2, "code": "sh010", "sg_status_list": "fin"},
                    {"type": "Shot", "id": 3, "code": "sh020", "sg_status_list": "ip"}
                ]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn find_filters_and_projects_fields() {
        let sg = connection();
        let shots = sg
            .find("Shot", &[Filter::is("sg_status_list", "fin")], &["code".to_string()])
            .await
            .unwrap();

        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0]["code"], "sh010");
        assert_eq!(shots[0]["type"], "Shot");
        assert!(shots[0].get("sg_status_list").is_none());

        assert!(sg.find("Asset", &[], &[]).await.unwrap().is_empty());
        let one = sg.find_one("Shot", &[Filter::is("id", 3)], &[]).await.unwrap();
        assert_eq!(one.unwrap()["code"], "sh020");
    }

    #[tokio::test]
    async fn schema_falls_back_to_record_keys() {
        let sg = connection();
        assert_eq!(sg.schema_field_read("Project").await.unwrap(), vec!["name", "sg_short_name"]);
        assert_eq!(
            sg.schema_field_read("Shot").await.unwrap(),
            vec!["code", "id", "sg_status_list", "type"]
        );
        assert_matches!(
            sg.schema_field_read("Asset").await,
            Err(ShotGridError::UnknownEntityType(_))
        );
    }

    #[tokio::test]
    async fn updates_are_applied_and_recorded() {
        let sg = connection();
        let data = json!({"sg_status_list": "dlvd"}).as_object().cloned().unwrap();
        sg.update("Shot", 3, data.clone()).await.unwrap();

        let shot = sg.find_one("Shot", &[Filter::is("id", 3)], &[]).await.unwrap().unwrap();
        assert_eq!(shot["sg_status_list"], "dlvd");
        assert_eq!(sg.updates().len(), 1);
        assert_eq!(sg.updates()[0].data, data);

        assert_matches!(
            sg.update("Shot", 99, Record::new()).await,
            Err(ShotGridError::NotFound { .. })
        );
    }
}
