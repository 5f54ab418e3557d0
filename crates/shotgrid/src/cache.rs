//! Memoizing read-through cache over a [`ShotGridConnection`].
//!
//! Every record fetched is kept twice: as returned by the database (raw)
//! and after the configured overrides were applied (processed). Template
//! resolution reads the raw view, the delivery model is built from the
//! processed view.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use delivery_core::context::{Context, ResolveSettings};
use delivery_core::records::{link_of, record_id, RecordSource};
use delivery_core::settings::Settings;
use delivery_core::types::{EntityId, FieldSchema, Record};
use delivery_core::version_override::{apply_overrides, VersionOverride};

use crate::connection::{Filter, ShotGridConnection};
use crate::error::ShotGridError;

pub struct ShotGridCache {
    connection: Arc<dyn ShotGridConnection>,
    project_id: EntityId,
    overrides: Vec<VersionOverride>,
    resolve: ResolveSettings,
    schema: FieldSchema,
    raw: HashMap<String, Vec<Record>>,
    processed: HashMap<String, Vec<Record>>,
    /// Query key to the ids it returned.
    queries: HashMap<String, Vec<EntityId>>,
}

impl ShotGridCache {
    pub fn new(connection: Arc<dyn ShotGridConnection>, project_id: EntityId, settings: &Settings) -> Self {
        Self::with_overrides(
            connection,
            project_id,
            settings.version_overrides.clone(),
            settings.resolve_settings().clone(),
        )
    }

    pub fn with_overrides(
        connection: Arc<dyn ShotGridConnection>,
        project_id: EntityId,
        overrides: Vec<VersionOverride>,
        resolve: ResolveSettings,
    ) -> Self {
        Self {
            connection,
            project_id,
            overrides,
            resolve,
            schema: FieldSchema::new(),
            raw: HashMap::new(),
            processed: HashMap::new(),
            queries: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Eagerly fetch the project, its footage formats, the versions waiting
    /// for delivery, their parent entities and their published files.
    pub async fn load(&mut self, settings: &Settings) -> Result<(), ShotGridError> {
        tracing::info!(project_id = self.project_id, "Loading database cache");
        let project = Filter::link("Project", self.project_id);

        self.find_raw("Project", &[Filter::is("id", self.project_id)]).await?;

        if let Some(entity_type) = &settings.footage_format_entity {
            self.find_raw(entity_type, &[Filter::is("project", project.clone())])
                .await?;
        }

        let versions = self
            .find_raw(
                "Version",
                &[
                    Filter::is("project", project),
                    Filter::is(
                        settings.version_status_field.as_str(),
                        settings.version_delivery_status.as_str(),
                    ),
                ],
            )
            .await?;
        tracing::info!(count = versions.len(), "Found versions");

        let mut parents: Vec<(String, EntityId)> = versions
            .iter()
            .filter_map(|v| link_of(v, "entity"))
            .collect();
        parents.sort();
        parents.dedup();
        for (entity_type, id) in &parents {
            self.find_raw(entity_type, &[Filter::is("id", *id)]).await?;
        }
        tracing::info!(count = parents.len(), "Found parent entities");

        let published: Vec<EntityId> = versions
            .iter()
            .filter_map(first_published_file)
            .collect();
        for id in published {
            self.find_raw("PublishedFile", &[Filter::is("id", id)]).await?;
        }

        Ok(())
    }

    /// Apply overrides to every raw record, replacing the processed view.
    pub fn process(&mut self) {
        let context = Context::new(&*self, &self.resolve);
        let processed: HashMap<String, Vec<Record>> = self
            .raw
            .iter()
            .map(|(entity_type, records)| {
                (
                    entity_type.clone(),
                    apply_overrides(&self.overrides, entity_type, records, &context),
                )
            })
            .collect();

        self.processed = processed;
        tracing::info!("Processed all cached records");
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Field names of `entity_type`, read from the database once.
    async fn fields_for(&mut self, entity_type: &str) -> Result<Vec<String>, ShotGridError> {
        if let Some(fields) = self.schema.get(entity_type) {
            return Ok(fields.clone());
        }
        let fields = self.connection.schema_field_read(entity_type).await?;
        self.schema.insert(entity_type.to_string(), fields.clone());
        Ok(fields)
    }

    /// Query the database with every schema field and merge the result
    /// into the raw view. Returns the records as fetched.
    pub async fn find_raw(
        &mut self,
        entity_type: &str,
        filters: &[Filter],
    ) -> Result<Vec<Record>, ShotGridError> {
        let fields = self.fields_for(entity_type).await?;
        let found = self.connection.find(entity_type, filters, &fields).await?;

        merge_by_id(
            self.raw.entry(entity_type.to_string()).or_default(),
            found.iter().cloned(),
        );
        Ok(found)
    }

    /// Processed records matching `filters`. Repeated queries are answered
    /// from the cache unless `ignore_cache` is set.
    pub async fn find(
        &mut self,
        entity_type: &str,
        filters: &[Filter],
        ignore_cache: bool,
    ) -> Result<Vec<Record>, ShotGridError> {
        let key = query_key(entity_type, filters)?;

        if !ignore_cache {
            if let Some(ids) = self.queries.get(&key) {
                return Ok(self
                    .get(entity_type)
                    .iter()
                    .filter(|r| record_id(r).is_some_and(|id| ids.contains(&id)))
                    .cloned()
                    .collect());
            }
        }

        let found = self.find_raw(entity_type, filters).await?;
        let processed = apply_overrides(
            &self.overrides,
            entity_type,
            &found,
            &Context::new(&*self, &self.resolve),
        );

        self.queries
            .insert(key, processed.iter().filter_map(record_id).collect());
        merge_by_id(
            self.processed.entry(entity_type.to_string()).or_default(),
            processed.iter().cloned(),
        );

        tracing::info!(count = processed.len(), entity_type, "Found records");
        Ok(processed)
    }

    pub async fn find_one(
        &mut self,
        entity_type: &str,
        filters: &[Filter],
    ) -> Result<Option<Record>, ShotGridError> {
        Ok(self.find(entity_type, filters, false).await?.into_iter().next())
    }

    pub fn get_raw(&self, entity_type: &str) -> &[Record] {
        self.raw.get(entity_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn get(&self, entity_type: &str) -> &[Record] {
        self.processed
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Write fields to the database. Cached records are left untouched.
    pub async fn update(
        &self,
        entity_type: &str,
        id: EntityId,
        data: Record,
    ) -> Result<Record, ShotGridError> {
        self.connection.update(entity_type, id, data).await
    }
}

impl RecordSource for ShotGridCache {
    fn project_id(&self) -> EntityId {
        self.project_id
    }

    fn raw_records(&self, entity_type: &str) -> &[Record] {
        self.get_raw(entity_type)
    }

    fn processed_records(&self, entity_type: &str) -> &[Record] {
        self.get(entity_type)
    }

    fn schema(&self) -> &FieldSchema {
        &self.schema
    }
}

impl std::fmt::Debug for ShotGridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShotGridCache")
            .field("project_id", &self.project_id)
            .field("entity_types", &self.raw.keys().collect::<Vec<_>>())
            .field("queries", &self.queries.len())
            .finish()
    }
}

fn query_key(entity_type: &str, filters: &[Filter]) -> Result<String, ShotGridError> {
    Ok(format!("{entity_type}:{}", serde_json::to_string(filters)?))
}

fn first_published_file(version: &Record) -> Option<EntityId> {
    version
        .get("published_files")
        .and_then(Value::as_array)
        .and_then(|files| files.first())
        .and_then(|file| file.get("id"))
        .and_then(Value::as_i64)
}

/// Insert `records` into `existing`, replacing records with the same id
/// in place and appending new ones.
fn merge_by_id(existing: &mut Vec<Record>, records: impl IntoIterator<Item = Record>) {
    for record in records {
        let id = record_id(&record);
        match existing.iter_mut().find(|r| id.is_some() && record_id(r) == id) {
            Some(slot) => *slot = record,
            None => existing.push(record),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
