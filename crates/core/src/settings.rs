//! Application settings.
//!
//! Settings are a JSON document. Loading is fail-fast: every field template,
//! override and slate field must parse and every required path template
//! must exist, otherwise [`Settings::load`] returns a configuration error
//! and nothing runs with a known-bad configuration.
//!
//! ```json
//! {
//!   "shot_status_field": "sg_status_list",
//!   "version_status_field": "sg_status_list",
//!   "shot_delivery_status": "fin",
//!   "version_delivery_status": "dlvr",
//!   "version_delivered_status": "dlvd",
//!   "version_preview_delivered_status": "pdlv",
//!   "shot_delivered_status": "dlvd",
//!   "default_csv": {"Filename": "<file.name_ranged>", "Shot": "<shot.code>"},
//!   "templates": {"keys": {...}, "paths": {"delivery_folder": "..."}},
//!   "renderer": {"nuke_path": "/opt/nuke/Nuke15.0", ...}
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::{Context, ResolveSettings};
use crate::error::CoreError;
use crate::field_template::FieldTemplate;
use crate::manifest::CsvColumn;
use crate::outputs::{PreviewOutput, SequenceOutput};
use crate::path_template::{PathTemplate, TemplateConfig, TemplateFields, TemplateKey, TemplateSet};
use crate::types::FieldSchema;
use crate::version_override::VersionOverride;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DELIVERY_FOLDER: &str = "delivery_folder";
pub const CSV_SUBMISSION_FORM: &str = "csv_submission_form";
pub const INPUT_SHOT_LUT: &str = "input_shot_lut";
pub const DELIVERY_SHOT_LUT: &str = "delivery_shot_lut";

/// Path templates every configuration must define.
pub const REQUIRED_TEMPLATES: &[&str] = &[
    DELIVERY_FOLDER,
    CSV_SUBMISSION_FORM,
    "input_shot_sequence",
    "input_shot_preview",
    "delivery_shot_sequence",
    "delivery_shot_preview",
    "input_asset_sequence",
    "input_asset_preview",
    "delivery_asset_sequence",
    "delivery_asset_preview",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// External renderer locations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RendererConfig {
    pub nuke_path: PathBuf,
    pub slate_script: PathBuf,
    pub plate_script: PathBuf,
    #[serde(default)]
    pub logo_path: PathBuf,
    #[serde(default)]
    pub font_path: PathBuf,
    #[serde(default)]
    pub font_bold_path: PathBuf,
}

/// A slate extra field: literal text, a path template or a field template.
#[derive(Debug, Clone)]
pub enum SlateField {
    Literal(String),
    Path(PathTemplate),
    Field(FieldTemplate),
}

/// Input and delivery templates for one entity kind.
#[derive(Debug, Clone, Copy)]
pub struct EntityTemplates<'a> {
    pub input_sequence: &'a PathTemplate,
    pub input_preview: &'a PathTemplate,
    pub delivery_sequence: &'a PathTemplate,
    pub delivery_preview: &'a PathTemplate,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    delivery_preview_outputs: Vec<PreviewOutput>,
    #[serde(default)]
    delivery_sequence_outputs: Vec<SequenceOutput>,
    #[serde(default)]
    version_overrides: Vec<VersionOverride>,
    #[serde(default)]
    default_csv: Map<String, Value>,

    shot_status_field: String,
    version_status_field: String,
    #[serde(default)]
    show_name_field: Option<String>,
    #[serde(default)]
    vfx_scope_of_work_field: Option<String>,
    #[serde(default)]
    submitting_for_field: Option<String>,
    #[serde(default)]
    submission_note_field: Option<String>,
    #[serde(default)]
    short_submission_note_field: Option<String>,
    #[serde(default)]
    attachment_field: Option<String>,
    #[serde(default)]
    delivery_sequence_outputs_field: Option<String>,

    shot_delivery_status: String,
    version_delivery_status: String,
    version_delivered_status: String,
    version_preview_delivered_status: String,
    shot_delivered_status: String,

    #[serde(default)]
    preview_colorspace_idt: String,
    #[serde(default)]
    preview_colorspace_odt: String,
    #[serde(default)]
    sequence_colorspace: String,

    #[serde(default)]
    add_slate_to_sequence: bool,
    #[serde(default)]
    override_preview_submission_note: bool,
    #[serde(default)]
    continuous_versioning: bool,
    #[serde(default = "default_true")]
    remove_alpha_from_sequence: bool,

    #[serde(default)]
    slate_extra_fields: Map<String, Value>,

    #[serde(default)]
    footage_format_entity: Option<String>,
    #[serde(default)]
    footage_format_fields: BTreeMap<String, String>,
    #[serde(default)]
    shot_footage_formats_field: Option<String>,
    #[serde(default)]
    asset_footage_formats_field: Option<String>,

    #[serde(default)]
    templates: TemplateConfig,
    #[serde(default)]
    renderer: RendererConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub delivery_preview_outputs: Vec<PreviewOutput>,
    pub delivery_sequence_outputs: Vec<SequenceOutput>,
    pub version_overrides: Vec<VersionOverride>,
    pub default_csv: Vec<CsvColumn>,

    // Fields
    pub shot_status_field: String,
    pub version_status_field: String,
    pub show_name_field: Option<String>,
    pub vfx_scope_of_work_field: Option<String>,
    pub submitting_for_field: Option<String>,
    pub submission_note_field: Option<String>,
    pub short_submission_note_field: Option<String>,
    pub attachment_field: Option<String>,
    pub delivery_sequence_outputs_field: Option<String>,

    // Statuses
    pub shot_delivery_status: String,
    pub version_delivery_status: String,
    pub version_delivered_status: String,
    pub version_preview_delivered_status: String,
    pub shot_delivered_status: String,

    pub preview_colorspace_idt: String,
    pub preview_colorspace_odt: String,
    pub sequence_colorspace: String,

    pub add_slate_to_sequence: bool,
    pub override_preview_submission_note: bool,
    pub continuous_versioning: bool,
    pub remove_alpha_from_sequence: bool,

    pub slate_extra_fields: Vec<(String, SlateField)>,

    pub footage_format_entity: Option<String>,
    pub footage_format_fields: BTreeMap<String, String>,
    pub shot_footage_formats_field: Option<String>,
    pub asset_footage_formats_field: Option<String>,

    pub templates: TemplateSet,
    pub renderer: RendererConfig,

    resolve: ResolveSettings,
}

impl Settings {
    /// Load and validate settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("Failed to read settings {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let raw: RawSettings = serde_json::from_str(text)
            .map_err(|e| CoreError::Configuration(format!("Invalid settings: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, CoreError> {
        tracing::info!("Loading settings");

        let templates = TemplateSet::from_config(&raw.templates)
            .map_err(|e| CoreError::Configuration(e.to_string()))?;

        let default_csv = raw
            .default_csv
            .iter()
            .map(|(name, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(_) | Value::Bool(_) => value.to_string(),
                    _ => {
                        return Err(CoreError::Configuration(
                            "One or more values of the \"default_csv\" setting is of an invalid type."
                                .to_string(),
                        ))
                    }
                };
                let template = FieldTemplate::new(text)
                    .map_err(|e| CoreError::Configuration(e.to_string()))?;
                Ok(CsvColumn::new(name.clone(), template))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let slate_keys = slate_template_keys(&templates);
        let slate_extra_fields = raw
            .slate_extra_fields
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let field = if text.contains('{') && text.contains('}') {
                    tracing::debug!(key = %key, value = %text, "Slate field path template");
                    SlateField::Path(
                        PathTemplate::new(key, &text, &slate_keys)
                            .map_err(|e| CoreError::Configuration(e.to_string()))?,
                    )
                } else if text.contains('<') && text.contains('>') {
                    tracing::debug!(key = %key, value = %text, "Slate field template");
                    SlateField::Field(
                        FieldTemplate::new(text)
                            .map_err(|e| CoreError::Configuration(e.to_string()))?,
                    )
                } else {
                    tracing::debug!(key = %key, value = %text, "Slate field literal");
                    SlateField::Literal(text)
                };
                Ok((key.clone(), field))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let resolve = ResolveSettings {
            attachment_field: raw.attachment_field.clone(),
            footage_format_entity: raw.footage_format_entity.clone(),
            shot_footage_formats_field: raw.shot_footage_formats_field.clone(),
        };

        let settings = Self {
            delivery_preview_outputs: raw.delivery_preview_outputs,
            delivery_sequence_outputs: raw.delivery_sequence_outputs,
            version_overrides: raw.version_overrides,
            default_csv,
            shot_status_field: raw.shot_status_field,
            version_status_field: raw.version_status_field,
            show_name_field: raw.show_name_field,
            vfx_scope_of_work_field: raw.vfx_scope_of_work_field,
            submitting_for_field: raw.submitting_for_field,
            submission_note_field: raw.submission_note_field,
            short_submission_note_field: raw.short_submission_note_field,
            attachment_field: raw.attachment_field,
            delivery_sequence_outputs_field: raw.delivery_sequence_outputs_field,
            shot_delivery_status: raw.shot_delivery_status,
            version_delivery_status: raw.version_delivery_status,
            version_delivered_status: raw.version_delivered_status,
            version_preview_delivered_status: raw.version_preview_delivered_status,
            shot_delivered_status: raw.shot_delivered_status,
            preview_colorspace_idt: raw.preview_colorspace_idt,
            preview_colorspace_odt: raw.preview_colorspace_odt,
            sequence_colorspace: raw.sequence_colorspace,
            add_slate_to_sequence: raw.add_slate_to_sequence,
            override_preview_submission_note: raw.override_preview_submission_note,
            continuous_versioning: raw.continuous_versioning,
            remove_alpha_from_sequence: raw.remove_alpha_from_sequence,
            slate_extra_fields,
            footage_format_entity: raw.footage_format_entity,
            footage_format_fields: raw.footage_format_fields,
            shot_footage_formats_field: raw.shot_footage_formats_field,
            asset_footage_formats_field: raw.asset_footage_formats_field,
            templates,
            renderer: raw.renderer,
            resolve,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Structural checks that do not need the database.
    pub fn validate(&self) -> Result<(), CoreError> {
        let missing: Vec<&str> = REQUIRED_TEMPLATES
            .iter()
            .copied()
            .filter(|name| self.templates.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::Configuration(format!(
                "Missing path templates: {}",
                missing.join(", ")
            )));
        }

        let folder = self.templates.require(DELIVERY_FOLDER)?;
        if !folder.has_key("delivery_version") {
            return Err(CoreError::Configuration(
                "The delivery_folder template must contain {delivery_version}".to_string(),
            ));
        }

        Ok(())
    }

    pub fn resolve_settings(&self) -> &ResolveSettings {
        &self.resolve
    }

    /// Input and delivery templates for shots or assets.
    pub fn entity_templates(&self, is_shot: bool) -> Result<EntityTemplates<'_>, CoreError> {
        let kind = if is_shot { "shot" } else { "asset" };
        Ok(EntityTemplates {
            input_sequence: self.templates.require(&format!("input_{kind}_sequence"))?,
            input_preview: self.templates.require(&format!("input_{kind}_preview"))?,
            delivery_sequence: self.templates.require(&format!("delivery_{kind}_sequence"))?,
            delivery_preview: self.templates.require(&format!("delivery_{kind}_preview"))?,
        })
    }

    /// LUT templates, when both are configured.
    pub fn lut_templates(&self) -> Option<(&PathTemplate, &PathTemplate)> {
        Some((
            self.templates.get(INPUT_SHOT_LUT)?,
            self.templates.get(DELIVERY_SHOT_LUT)?,
        ))
    }

    /// Database fields the configuration reads, per entity type.
    pub fn compile_extra_fields(&self) -> BTreeMap<String, Vec<String>> {
        let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut add = |entity_type: &str, fields: Vec<Option<String>>| {
            extra
                .entry(entity_type.to_string())
                .or_default()
                .extend(fields.into_iter().flatten());
        };

        add("Project", vec![self.show_name_field.clone()]);
        add(
            "Version",
            vec![
                Some(self.version_status_field.clone()),
                self.submitting_for_field.clone(),
                self.submission_note_field.clone(),
                self.short_submission_note_field.clone(),
                self.attachment_field.clone(),
                self.delivery_sequence_outputs_field.clone(),
            ],
        );
        add(
            "Shot",
            vec![
                Some(self.shot_status_field.clone()),
                self.shot_footage_formats_field.clone(),
                self.vfx_scope_of_work_field.clone(),
            ],
        );

        if let Some(entity) = &self.footage_format_entity {
            add(
                entity,
                self.footage_format_fields.values().cloned().map(Some).collect(),
            );
        }

        for o in &self.version_overrides {
            add(&o.entity_type, o.fields().into_iter().map(Some).collect());
        }

        for column in &self.default_csv {
            for (entity, fields) in column.template.ordered_fields() {
                if entity == "file" || entity == "date" {
                    continue;
                }
                let entity_type = capitalize(entity);
                add(
                    &entity_type,
                    fields
                        .iter()
                        .map(|f| Some(f.split('.').next().unwrap_or_default().to_string()))
                        .collect(),
                );
            }
        }

        extra
    }

    /// Fail when configured fields are missing from the database schema.
    pub fn validate_fields(&self, schema: &FieldSchema) -> Result<(), CoreError> {
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (entity_type, fields) in self.compile_extra_fields() {
            let known = schema.get(&entity_type);
            for field in fields {
                let exists = known.is_some_and(|k| k.contains(&field));
                if !exists {
                    let list = missing.entry(entity_type.clone()).or_default();
                    if !list.contains(&field) {
                        list.push(field);
                    }
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let mut msg =
            "Some fields that are configured, don't exist on the requested entities:".to_string();
        for (entity_type, fields) in missing {
            msg.push_str(&format!("\n    {entity_type}: {}", fields.join(", ")));
        }
        Err(CoreError::Configuration(msg))
    }

    /// Resolve the slate extra fields. Entries that fail to resolve are
    /// rendered as `"-"`.
    pub fn slate_extra_fields(&self, fields: &TemplateFields, context: &Context<'_>) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, field) in &self.slate_extra_fields {
            let value = match field {
                SlateField::Literal(text) => text.clone(),
                SlateField::Path(template) => template.apply_fields(fields).unwrap_or_else(|e| {
                    tracing::error!(key = %key, error = %e, "An error occurred while loading the slate extra fields");
                    "-".to_string()
                }),
                SlateField::Field(template) => template.apply_context(context).unwrap_or_else(|e| {
                    tracing::error!(key = %key, error = %e, "An error occurred while loading the slate extra fields");
                    "-".to_string()
                }),
            };
            out.insert(key.clone(), Value::String(value));
        }
        out
    }
}

fn capitalize(entity: &str) -> String {
    let mut chars = entity.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Keys available to slate path templates: every template key plus the
/// resolution fields computed per version.
fn slate_template_keys(templates: &TemplateSet) -> BTreeMap<String, TemplateKey> {
    let mut keys = BTreeMap::new();
    keys.insert("width".to_string(), TemplateKey::integer("width", Some(0)));
    keys.insert("height".to_string(), TemplateKey::integer("height", Some(0)));
    let mut aspect = TemplateKey::string("aspect_ratio");
    aspect.default = Some(Value::String("1".to_string()));
    keys.insert("aspect_ratio".to_string(), aspect);
    keys.extend(templates.all_keys());
    keys
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
