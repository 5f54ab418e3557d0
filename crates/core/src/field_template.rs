//! `<entity.field>` template strings.
//!
//! A field template such as `<shot.code>_<file.name_ranged>` names values
//! on the project, shot, version, delivered file or the current date.
//! Templates are validated when constructed and resolved against a
//! [`Context`] with [`FieldTemplate::apply_context`]. Resolution is all or
//! nothing: one unresolvable field fails the whole template.

use std::path::Path;
use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::exr;
use crate::frames;
use crate::nested::{display_value, get_nested};
use crate::path_template::format_timestamp;
use crate::records::{link_of, record_id};
use crate::types::{FieldSchema, Record};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

static FIELD_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([\w.%]+)>").expect("valid regex"));

/// Entities a template may reference.
pub const ALLOWED_ENTITIES: &[&str] = &["file", "project", "shot", "version", "date"];

/// Fields available on the `file` entity.
pub const FILE_FIELDS: &[&str] = &[
    "name",
    "name_ranged",
    "codec",
    "compression",
    "bit_depth",
    "folder",
];

/// Fields accepted on database entities regardless of schema.
const ALWAYS_KNOWN_FIELDS: &[&str] = &["code", "description"];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Validation of field template string \"{template}\" failed: {}", problems.join("; "))]
    Invalid {
        template: String,
        problems: Vec<String>,
    },

    #[error("No {entity} context supplied for resolving field template string \"{template}\"")]
    MissingContext { entity: String, template: String },

    #[error("Active project {0} is not in the cache")]
    ProjectNotFound(i64),

    #[error("Failed to convert date to format \"date.{0}\"")]
    DateFormat(String),

    #[error("Failed to resolve template field: \"{entity}.{field}\"")]
    Unresolved { entity: String, field: String },
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldTemplate {
    template: String,
    fields: Vec<String>,
    /// Fields grouped by entity, entities in order of first appearance.
    ordered_fields: Vec<(String, Vec<String>)>,
}

impl FieldTemplate {
    /// Parse and validate without a schema. Database fields are accepted
    /// unchecked.
    pub fn new(template: impl Into<String>) -> Result<Self, TemplateError> {
        Self::build(template.into(), None)
    }

    /// Parse and validate against a database schema.
    pub fn with_schema(
        template: impl Into<String>,
        schema: &FieldSchema,
    ) -> Result<Self, TemplateError> {
        Self::build(template.into(), Some(schema))
    }

    /// The literal `"-"`, used in place of templates that failed to load.
    pub fn placeholder() -> Self {
        Self {
            template: "-".to_string(),
            fields: Vec::new(),
            ordered_fields: Vec::new(),
        }
    }

    fn build(template: String, schema: Option<&FieldSchema>) -> Result<Self, TemplateError> {
        let fields: Vec<String> = FIELD_TOKEN_RE
            .captures_iter(&template)
            .map(|caps| caps[1].to_string())
            .collect();

        let mut ordered_fields: Vec<(String, Vec<String>)> = Vec::new();
        for field in &fields {
            let (entity, rest) = field.split_once('.').unwrap_or((field.as_str(), ""));
            match ordered_fields.iter_mut().find(|(e, _)| e == entity) {
                Some((_, list)) => list.push(rest.to_string()),
                None => ordered_fields.push((entity.to_string(), vec![rest.to_string()])),
            }
        }

        let parsed = Self {
            template,
            fields,
            ordered_fields,
        };

        let problems = parsed.validate(schema, ALLOWED_ENTITIES);
        if !problems.is_empty() {
            return Err(TemplateError::Invalid {
                template: parsed.template,
                problems,
            });
        }

        Ok(parsed)
    }

    /// Check every field reference. Returns one message per problem.
    pub fn validate(&self, schema: Option<&FieldSchema>, allowed_entities: &[&str]) -> Vec<String> {
        let mut problems = Vec::new();
        if self.template.is_empty() {
            return problems;
        }

        tracing::debug!(template = %self.template, fields = ?self.fields, "Validating template");

        for field in &self.fields {
            let Some((entity, field_name)) = field.split_once('.') else {
                problems.push(format!("\"{field}\" only provides an entity"));
                continue;
            };

            if !allowed_entities.contains(&entity) {
                problems.push(format!("Entity \"{entity}\" is not allowed"));
                continue;
            }

            match entity {
                "file" => {
                    if !FILE_FIELDS.contains(&field_name) {
                        problems.push(format!(
                            "Field \"{field_name}\" is not available for a file entity"
                        ));
                    }
                }
                "project" | "shot" | "version" => {
                    let Some(schema) = schema else {
                        continue;
                    };
                    let entity_type = capitalize(entity);
                    let base = field_name.split('.').next().unwrap_or_default();
                    let known = schema
                        .get(&entity_type)
                        .is_some_and(|fields| fields.iter().any(|f| f == base));
                    if !known && !ALWAYS_KNOWN_FIELDS.contains(&base) {
                        problems.push(format!(
                            "Field \"{field_name}\" could not be found in \"{entity}\""
                        ));
                    }
                }
                _ => {}
            }
        }

        problems
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// All `entity.field` references in template order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn ordered_fields(&self) -> &[(String, Vec<String>)] {
        &self.ordered_fields
    }

    pub fn references_entity(&self, entity: &str) -> bool {
        self.ordered_fields.iter().any(|(e, _)| e == entity)
    }

    pub fn references(&self, entity: &str, field: &str) -> bool {
        self.fields.iter().any(|f| {
            f.split_once('.')
                .is_some_and(|(e, rest)| e == entity && rest == field)
        })
    }

    /// Resolve every field against `context`.
    pub fn apply_context(&self, context: &Context<'_>) -> Result<String, TemplateError> {
        if context.file.is_none() && self.references_entity("file") {
            tracing::debug!(?context, "Missing file context");
            return Err(self.missing("file"));
        }

        let records = context.records;
        let project = records
            .raw_by_id("Project", records.project_id())
            .ok_or(TemplateError::ProjectNotFound(records.project_id()))?;

        let mut version: Option<&Record> = None;
        let mut shot: Option<&Record> = None;

        if let Some(entity) = context.entity {
            let id = record_id(entity);
            match (entity.get("type").and_then(Value::as_str), id) {
                (Some("Version"), Some(id)) => version = records.raw_by_id("Version", id),
                (Some("Shot"), Some(id)) => shot = records.raw_by_id("Shot", id),
                _ => {}
            }
        }

        if version.is_none() {
            if let Some(v) = context.version {
                version = records.raw_by_id("Version", v.id);
                if version.is_none() {
                    tracing::debug!(version_id = v.id, "Could not resolve version from context");
                }
            }
        }

        if version.is_none() && self.references_entity("version") {
            tracing::debug!(?context, "Missing version context");
            return Err(self.missing("version"));
        }

        if let Some((parent_type, parent_id)) = version.and_then(|v| link_of(v, "entity")) {
            if parent_type == "Shot" {
                shot = records.raw_by_id("Shot", parent_id);
            }
        }

        if shot.is_none() {
            if let Some(entity) = context.shot {
                shot = records.raw_by_id(entity.entity_type(), entity.id);
            }
        }

        if shot.is_none() && self.references_entity("shot") {
            tracing::debug!(?context, "Missing shot context");
            return Err(self.missing("shot"));
        }

        let shot = shot.map(|s| expand_footage_formats(s, context));

        let mut output = self.template.clone();

        for (entity, fields) in &self.ordered_fields {
            for field in fields {
                let value = match entity.as_str() {
                    "file" => resolve_file_field(field, context)?,
                    "date" => format_timestamp(&Local::now().naive_local(), field)
                        .ok_or_else(|| TemplateError::DateFormat(field.clone()))?,
                    "version"
                        if context.settings.attachment_field.as_deref() == Some(field.as_str()) =>
                    {
                        context
                            .version
                            .and_then(|v| v.attachment.as_ref())
                            .filter(|a| a.is_deliverable())
                            .map(|a| a.name.clone())
                            .unwrap_or_default()
                    }
                    "project" => resolve_record_field(entity, field, project)?,
                    "shot" => match shot.as_ref() {
                        Some(record) => resolve_record_field(entity, field, record)?,
                        None => return Err(self.missing("shot")),
                    },
                    "version" => match version {
                        Some(record) => resolve_record_field(entity, field, record)?,
                        None => return Err(self.missing("version")),
                    },
                    _ => {
                        return Err(TemplateError::Unresolved {
                            entity: entity.clone(),
                            field: field.clone(),
                        })
                    }
                };

                output = output.replace(&format!("<{entity}.{field}>"), &value);
            }
        }

        Ok(output)
    }

    fn missing(&self, entity: &str) -> TemplateError {
        TemplateError::MissingContext {
            entity: entity.to_string(),
            template: self.template.clone(),
        }
    }
}

impl TryFrom<String> for FieldTemplate {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FieldTemplate> for String {
    fn from(value: FieldTemplate) -> Self {
        value.template
    }
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

fn capitalize(entity: &str) -> String {
    let mut chars = entity.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Replace the shot's footage-format links with the full processed
/// footage-format records.
fn expand_footage_formats(shot: &Record, context: &Context<'_>) -> Record {
    let mut shot = shot.clone();
    let (Some(entity_type), Some(field)) = (
        context.settings.footage_format_entity.as_deref(),
        context.settings.shot_footage_formats_field.as_deref(),
    ) else {
        return shot;
    };

    let Some(Value::Array(links)) = shot.get(field) else {
        return shot;
    };

    let formats = context.records.processed_records(entity_type);
    let expanded: Vec<Value> = links
        .iter()
        .filter_map(|link| link.get("id").and_then(Value::as_i64))
        .filter_map(|id| formats.iter().find(|f| record_id(f) == Some(id)))
        .map(|f| Value::Object(f.clone()))
        .collect();

    shot.insert(field.to_string(), Value::Array(expanded));
    shot
}

fn resolve_record_field(entity: &str, field: &str, record: &Record) -> Result<String, TemplateError> {
    let root = Value::Object(record.clone());
    match get_nested(&root, field) {
        Some(Value::Null) => {
            tracing::error!(
                field,
                entity,
                id = ?record.get("id"),
                "Template field value is empty",
            );
            Ok(String::new())
        }
        Some(value) => Ok(display_value(value)),
        None => {
            tracing::error!(field, entity, "Template field value could not be found");
            Err(TemplateError::Unresolved {
                entity: entity.to_string(),
                field: field.to_string(),
            })
        }
    }
}

fn resolve_file_field(field: &str, context: &Context<'_>) -> Result<String, TemplateError> {
    let unresolved = || TemplateError::Unresolved {
        entity: "file".to_string(),
        field: field.to_string(),
    };
    let file = context.file.ok_or_else(unresolved)?;
    let file_name = file.file_name();

    match field {
        "name" => Ok(file_name),
        "name_ranged" => {
            if !frames::has_frame_placeholder(&file_name) {
                return Ok(file_name);
            }
            let (first, last) = context
                .version
                .and_then(|v| v.frame_range())
                .ok_or_else(unresolved)?;
            let first = if file.has_slate { first - 1 } else { first };
            Ok(frames::ranged_name(&file_name, first, last))
        }
        "codec" | "compression" => {
            if !file.codec.is_empty() {
                return Ok(file.codec.clone());
            }
            Ok(last_frame_header(file, context)
                .and_then(|h| h.compression_name())
                .unwrap_or_default()
                .to_string())
        }
        "bit_depth" => {
            if !file.bit_depth.is_empty() {
                return Ok(file.bit_depth.clone());
            }
            Ok(last_frame_header(file, context)
                .and_then(|h| h.bit_depth_label())
                .unwrap_or_default()
                .to_string())
        }
        "folder" => Ok(file
            .directory_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()),
        _ => Err(unresolved()),
    }
}

/// Header of the delivered file's last frame, for `.exr` files only.
fn last_frame_header(
    file: &crate::context::FileContext,
    context: &Context<'_>,
) -> Option<exr::ExrHeader> {
    if !file.file_name().ends_with(".exr") {
        return None;
    }
    let path = file.file_path.to_string_lossy();
    let frame_path = match context.version.and_then(|v| v.last_frame) {
        Some(last) => frames::format_frame(&path, last).unwrap_or_else(|| path.to_string()),
        None => path.to_string(),
    };
    exr::read_exr_header(Path::new(&frame_path)).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::context::{FileContext, ResolveSettings};
    use crate::entity::Entity;
    use crate::records::StaticRecords;
    use crate::version::{Attachment, AttachmentLinkType, Version};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn records() -> StaticRecords {
        let mut records = StaticRecords::new(1);
        records.insert("Project", record(json!({"id": 1, "type": "Project", "sg_short_name": "ABC"})));
        records.insert(
            "Shot",
            record(json!({
                "id": 10,
                "type": "Shot",
                "code": "sh010",
                "description": null,
                "sg_sequence": {"type": "Sequence", "id": 3, "name": "SQ010"},
                "sg_footage_formats": [{"type": "CustomEntity01", "id": 50}],
            })),
        );
        records.insert(
            "Version",
            record(json!({
                "id": 100,
                "type": "Version",
                "code": "sh010_comp_v003",
                "entity": {"type": "Shot", "id": 10},
                "sg_task": {"type": "Task", "id": 7, "name": "comp"},
            })),
        );
        records.insert(
            "CustomEntity01",
            record(json!({"id": 50, "type": "CustomEntity01", "sg_resolution": "4096x2160"})),
        );
        records
    }

    fn settings() -> ResolveSettings {
        ResolveSettings {
            attachment_field: Some("sg_attachment".into()),
            footage_format_entity: Some("CustomEntity01".into()),
            shot_footage_formats_field: Some("sg_footage_formats".into()),
        }
    }

    fn version() -> Version {
        let mut version = Version::new(100, "sh010_comp_v003");
        version.first_frame = Some(1001);
        version.last_frame = Some(1010);
        version
    }

    // -- parsing and validation --

    #[test]
    fn orders_fields_by_first_entity_occurrence() {
        let template =
            FieldTemplate::new("<shot.code>_<version.code>_<shot.sg_sequence.name>").unwrap();
        assert_eq!(
            template.ordered_fields(),
            &[
                ("shot".to_string(), vec!["code".to_string(), "sg_sequence.name".to_string()]),
                ("version".to_string(), vec!["code".to_string()]),
            ]
        );
    }

    #[test]
    fn empty_and_literal_templates_are_valid() {
        assert!(FieldTemplate::new("").is_ok());
        assert!(FieldTemplate::new("-").is_ok());
    }

    #[test]
    fn rejects_unknown_entities_and_file_fields() {
        assert_matches!(FieldTemplate::new("<sequence.code>"), Err(TemplateError::Invalid { .. }));
        assert_matches!(FieldTemplate::new("<file.size>"), Err(TemplateError::Invalid { .. }));
        assert_matches!(FieldTemplate::new("<code>"), Err(TemplateError::Invalid { .. }));
        assert!(FieldTemplate::new("<date.%Y%m%d>").is_ok());
    }

    #[test]
    fn schema_validation_checks_leading_segment() {
        let schema: FieldSchema =
            HashMap::from([("Shot".to_string(), vec!["sg_sequence".to_string()])]);
        assert!(FieldTemplate::with_schema("<shot.sg_sequence.name>", &schema).is_ok());
        assert!(FieldTemplate::with_schema("<shot.code>", &schema).is_ok());
        assert!(FieldTemplate::with_schema("<shot.sg_cut_in>", &schema).is_err());
        assert!(FieldTemplate::with_schema("<version.description>", &schema).is_ok());
    }

    #[test]
    fn deserializes_with_validation() {
        let ok: Result<FieldTemplate, _> = serde_json::from_value(json!("<shot.code>"));
        assert!(ok.is_ok());
        let bad: Result<FieldTemplate, _> = serde_json::from_value(json!("<nope.code>"));
        assert!(bad.is_err());
    }

    // -- resolution --

    #[test]
    fn resolves_database_fields_through_version_parent() {
        let records = records();
        let settings = settings();
        let version = version();
        let context = Context::new(&records, &settings).with_version(&version);

        let template = FieldTemplate::new(
            "<project.sg_short_name>_<shot.code>_<version.sg_task.name>_<shot.sg_sequence.name>",
        )
        .unwrap();
        assert_eq!(template.apply_context(&context).unwrap(), "ABC_sh010_comp_SQ010");
    }

    #[test]
    fn null_value_resolves_to_empty_and_missing_fails() {
        let records = records();
        let settings = settings();
        let version = version();
        let context = Context::new(&records, &settings).with_version(&version);

        let empty = FieldTemplate::new("[<shot.description>]").unwrap();
        assert_eq!(empty.apply_context(&context).unwrap(), "[]");

        let missing = FieldTemplate::new("<shot.sg_cut_in>").unwrap();
        assert_matches!(
            missing.apply_context(&context),
            Err(TemplateError::Unresolved { field, .. }) if field == "sg_cut_in"
        );
    }

    #[test]
    fn footage_format_links_are_expanded() {
        let records = records();
        let settings = settings();
        let version = version();
        let context = Context::new(&records, &settings).with_version(&version);

        let template = FieldTemplate::new("<shot.sg_footage_formats.sg_resolution>").unwrap();
        assert_eq!(template.apply_context(&context).unwrap(), "4096x2160");
    }

    #[test]
    fn entity_record_takes_priority() {
        let records = records();
        let settings = settings();
        let entity = record(json!({"id": 100, "type": "Version"}));
        let context = Context::new(&records, &settings).with_entity(&entity);

        let template = FieldTemplate::new("<version.code>/<shot.code>").unwrap();
        assert_eq!(template.apply_context(&context).unwrap(), "sh010_comp_v003/sh010");
    }

    #[test]
    fn missing_contexts_fail() {
        let records = records();
        let settings = settings();
        let context = Context::new(&records, &settings);

        assert_matches!(
            FieldTemplate::new("<version.code>").unwrap().apply_context(&context),
            Err(TemplateError::MissingContext { entity, .. }) if entity == "version"
        );
        assert_matches!(
            FieldTemplate::new("<shot.code>").unwrap().apply_context(&context),
            Err(TemplateError::MissingContext { entity, .. }) if entity == "shot"
        );
        assert_matches!(
            FieldTemplate::new("<file.name>").unwrap().apply_context(&context),
            Err(TemplateError::MissingContext { entity, .. }) if entity == "file"
        );
    }

    #[test]
    fn shot_context_used_without_version() {
        let records = records();
        let settings = settings();
        let shot = Entity::new_shot(10, "sh010", "SQ010", None, "ABC");
        let context = Context::new(&records, &settings).with_shot(&shot);
        let template = FieldTemplate::new("<shot.code>").unwrap();
        assert_eq!(template.apply_context(&context).unwrap(), "sh010");
    }

    #[test]
    fn file_name_keeps_frame_placeholder() {
        let records = records();
        let settings = settings();
        let version = version();
        let file = FileContext::new("/deliveries/ABC_v001/shot010_v003.%04d.exr");
        let context = Context::new(&records, &settings)
            .with_version(&version)
            .with_file(&file);

        let template = FieldTemplate::new("<file.name>").unwrap();
        assert_eq!(template.apply_context(&context).unwrap(), "shot010_v003.%04d.exr");

        let folder = FieldTemplate::new("<file.folder>").unwrap();
        assert_eq!(folder.apply_context(&context).unwrap(), "ABC_v001");
    }

    #[test]
    fn ranged_name_accounts_for_slate() {
        let records = records();
        let settings = settings();
        let version = version();
        let mut file = FileContext::new("/deliveries/shot010_v003.%04d.exr");
        let template = FieldTemplate::new("<file.name_ranged>").unwrap();

        let context = Context::new(&records, &settings)
            .with_version(&version)
            .with_file(&file);
        assert_eq!(
            template.apply_context(&context).unwrap(),
            "shot010_v003.[1001-1010].exr"
        );

        file.has_slate = true;
        let context = Context::new(&records, &settings)
            .with_version(&version)
            .with_file(&file);
        assert_eq!(
            template.apply_context(&context).unwrap(),
            "shot010_v003.[1000-1010].exr"
        );
    }

    #[test]
    fn declared_codec_wins_and_missing_exr_header_is_empty() {
        let records = records();
        let settings = settings();
        let version = version();
        let mut file = FileContext::new("/nonexistent/shot010_v003.%04d.exr");
        let template = FieldTemplate::new("<file.codec>|<file.bit_depth>").unwrap();

        let context = Context::new(&records, &settings)
            .with_version(&version)
            .with_file(&file);
        assert_eq!(template.apply_context(&context).unwrap(), "|");

        file.codec = "ProRes 4444".into();
        file.bit_depth = "12-bit".into();
        let context = Context::new(&records, &settings)
            .with_version(&version)
            .with_file(&file);
        assert_eq!(template.apply_context(&context).unwrap(), "ProRes 4444|12-bit");
    }

    #[test]
    fn attachment_field_uses_deliverable_attachments_only() {
        let records = records();
        let settings = settings();
        let mut version = version();
        let template = FieldTemplate::new("<version.sg_attachment>").unwrap();

        version.attachment = Some(Attachment {
            name: "notes.pdf".into(),
            link_type: AttachmentLinkType::Upload,
            url: Some("https://example.invalid/notes.pdf".into()),
            local_path: None,
        });
        let context = Context::new(&records, &settings).with_version(&version);
        assert_eq!(template.apply_context(&context).unwrap(), "notes.pdf");

        version.attachment.as_mut().unwrap().link_type = AttachmentLinkType::Web;
        let context = Context::new(&records, &settings).with_version(&version);
        assert_eq!(template.apply_context(&context).unwrap(), "");
    }

    #[test]
    fn date_fields_format_now_and_reject_bad_patterns() {
        let records = records();
        let settings = settings();
        let context = Context::new(&records, &settings);

        let year = FieldTemplate::new("<date.%Y>").unwrap().apply_context(&context).unwrap();
        assert_eq!(year.len(), 4);

        assert_matches!(
            FieldTemplate::new("<date.%Q>").unwrap().apply_context(&context),
            Err(TemplateError::DateFormat(_))
        );
    }

    #[test]
    fn project_must_be_cached() {
        let records = StaticRecords::new(1);
        let settings = settings();
        let context = Context::new(&records, &settings);
        assert_matches!(
            FieldTemplate::new("x").unwrap().apply_context(&context),
            Err(TemplateError::ProjectNotFound(1))
        );
    }
}
