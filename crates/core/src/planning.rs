//! Destination paths and delivery numbering.
//!
//! Everything here is computed before any file is written: the path
//! template fields of a version, its preview/sequence/LUT destinations,
//! the timecode reference and the next free delivery version.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::entity::{Entity, EntityKind};
use crate::error::CoreError;
use crate::footage_format::FootageFormatType;
use crate::frames;
use crate::outputs::PreviewOutput;
use crate::path_template::{FieldValue, PathTemplate, TemplateFields};
use crate::records::RecordSource;
use crate::settings::Settings;
use crate::user_settings::UserSettings;
use crate::version::{Deliverables, Version};

// ---------------------------------------------------------------------------
// Template fields
// ---------------------------------------------------------------------------

/// Fields shared by every path of a delivery.
pub fn base_template_fields(project_code: &str, vendor: &str) -> TemplateFields {
    let mut fields = TemplateFields::new();
    fields.insert("prj".into(), project_code.into());
    fields.insert("delivery_version".into(), FieldValue::Int(1));
    fields.insert("vnd".into(), vendor.into());
    fields
}

/// `width / height` with two decimals, `"?"` when height is not positive.
pub fn aspect_ratio(width: i64, height: i64) -> String {
    if height <= 0 {
        "?".to_string()
    } else {
        format!("{:.2}", width as f64 / height as f64)
    }
}

/// Path template fields for one version.
///
/// Resolution fields come from the entity's footage formats: the output
/// preview format sets `width`/`height`, the input online format sets the
/// `input_*` values, and the aspect ratio is that of the input cropped by
/// the output format's margins.
pub fn version_template_fields(
    entity: &Entity,
    version: &Version,
    base: &TemplateFields,
    delivery_version: Option<i64>,
) -> TemplateFields {
    let mut fields = base.clone();
    fields.insert("version".into(), FieldValue::Int(version.display_version_number()));
    fields.insert("width".into(), FieldValue::Int(0));
    fields.insert("height".into(), FieldValue::Int(0));
    fields.insert("aspect_ratio".into(), "1".into());

    match &entity.kind {
        EntityKind::Shot {
            sequence, episode, ..
        } => {
            fields.insert("Sequence".into(), sequence.as_str().into());
            fields.insert("Shot".into(), entity.code.as_str().into());
            if let Some(episode) = episode {
                fields.insert("Episode".into(), episode.as_str().into());
            }
        }
        EntityKind::Asset => {
            fields.insert("Asset".into(), entity.code.as_str().into());
        }
    }

    if let Some(number) = delivery_version {
        fields.insert("delivery_version".into(), FieldValue::Int(number));
    }

    if let Some(task) = version.task_name() {
        fields.insert("task_name".into(), task.into());
    }

    if entity.footage_formats.is_none() {
        return fields;
    }

    let input = entity.footage_format(FootageFormatType::InputOnline);
    let output = entity.footage_format(FootageFormatType::OutputPreview);
    tracing::debug!(?input, ?output, "Footage formats");

    if let Some(output) = output {
        let width = output.width.unwrap_or(0);
        let height = output.height.unwrap_or(0);
        let ratio = aspect_ratio(width, height);
        fields.insert("output_width".into(), FieldValue::Int(width));
        fields.insert("output_height".into(), FieldValue::Int(height));
        fields.insert("width".into(), FieldValue::Int(width));
        fields.insert("height".into(), FieldValue::Int(height));
        fields.insert("output_aspect_ratio".into(), ratio.as_str().into());
        fields.insert("aspect_ratio".into(), ratio.into());
    }

    if let Some(input) = input {
        let width = input.width.unwrap_or(0);
        let height = input.height.unwrap_or(0);
        fields.insert("input_width".into(), FieldValue::Int(width));
        fields.insert("input_height".into(), FieldValue::Int(height));
        fields.insert("input_aspect_ratio".into(), aspect_ratio(width, height).into());

        let ratio = match output {
            None => {
                fields.insert("width".into(), FieldValue::Int(width));
                fields.insert("height".into(), FieldValue::Int(height));
                aspect_ratio(width, height)
            }
            Some(output) => {
                let (crop_x, crop_y) = output.crop();
                aspect_ratio(width - crop_x * 2, height - crop_y * 2)
            }
        };
        fields.insert("aspect_ratio".into(), ratio.into());
    }

    fields
}

/// Use the `input_*` resolution as the main resolution, for renders of
/// the full plate.
pub fn with_input_resolution(fields: &TemplateFields) -> TemplateFields {
    let mut out = fields.clone();
    for key in ["width", "height", "aspect_ratio"] {
        if let Some(value) = fields.get(&format!("input_{key}")) {
            out.insert(key.to_string(), value.clone());
        }
    }
    out
}

/// Insert `extra` without overwriting keys already in `fields`.
pub fn merge_under(fields: &mut TemplateFields, extra: TemplateFields) {
    for (key, value) in extra {
        fields.entry(key).or_insert(value);
    }
}

/// Fill keys bound to a database field (`shotgrid_field`) that are not
/// set yet, from the processed project, shot/asset and version records.
pub fn compile_extra_template_fields(
    template: &PathTemplate,
    records: &dyn RecordSource,
    entity: &Entity,
    version: &Version,
    fields: &mut TemplateFields,
) {
    for key in template.keys() {
        let Some((entity_type, field)) = key.shotgrid_binding() else {
            continue;
        };
        if fields.contains_key(&key.name) {
            continue;
        }

        let record = match entity_type {
            "Project" => records.processed_by_id("Project", records.project_id()),
            "Shot" | "Asset" if entity_type == entity.entity_type() => {
                records.processed_by_id(entity_type, entity.id)
            }
            "Shot" | "Asset" => None,
            "Version" => records.processed_by_id("Version", version.id),
            other => {
                tracing::error!(
                    key = %key.name,
                    template = %template.name(),
                    entity_type = other,
                    "Can't compile extra template field: unsupported entity",
                );
                continue;
            }
        };

        if let Some(value) = record
            .and_then(|r| r.get(field))
            .and_then(FieldValue::from_json)
        {
            fields.insert(key.name.clone(), value);
        }
    }
}

/// A published sequence to read timecode from.
///
/// Prefers the version 0 input plate, then the version's own sequence,
/// each only when its first frame exists.
pub fn timecode_ref(
    input_sequence: &PathTemplate,
    fields: &TemplateFields,
    version: &Version,
) -> Option<String> {
    let first = version.first_frame?;
    let frame_exists = |path: &str| {
        frames::format_frame(path, first).is_some_and(|frame| Path::new(&frame).is_file())
    };

    let mut plate_fields = fields.clone();
    plate_fields.insert("version".into(), FieldValue::Int(0));
    if let Ok(plate) = input_sequence.apply_fields(&plate_fields) {
        if frame_exists(&plate) {
            return Some(plate);
        }
    }

    version
        .sequence_path
        .as_deref()
        .filter(|path| frame_exists(path))
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Delivery location
// ---------------------------------------------------------------------------

/// Folder a delivery is written to: the templated folder, or the same
/// folder name under the user's location.
pub fn delivery_root(template_root: &Path, location: Option<&Path>) -> PathBuf {
    match (location, template_root.file_name()) {
        (Some(location), Some(name)) => location.join(name),
        (Some(location), None) => location.to_path_buf(),
        (None, _) => template_root.to_path_buf(),
    }
}

/// Move `path` from under `template_root` to under `delivery_root`,
/// keeping its relative tail. Paths outside the template root are
/// returned unchanged.
pub fn relocate(path: &Path, template_root: &Path, delivery_root: &Path) -> PathBuf {
    match path.strip_prefix(template_root) {
        Ok(tail) if tail.as_os_str().is_empty() => delivery_root.to_path_buf(),
        Ok(tail) => delivery_root.join(tail),
        Err(_) => path.to_path_buf(),
    }
}

/// Next free delivery version: one more than the highest version among
/// the existing delivery folders.
///
/// Folders are the directories next to the templated delivery folder, or
/// inside `location` when one is given. A folder counts when its name
/// parses with the folder template and its fixed fields agree with
/// `fields`. Unless `continuous` is set, only folders dated `today` count;
/// folders without a date always count.
pub fn next_delivery_version(
    folder_template: &PathTemplate,
    fields: &TemplateFields,
    location: Option<&Path>,
    continuous: bool,
    today: NaiveDate,
) -> Result<i64, CoreError> {
    let template_folder = PathBuf::from(folder_template.apply_fields(fields)?);
    let template_parent = template_folder
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let scan_root = location.unwrap_or(&template_parent);

    let entries = match std::fs::read_dir(scan_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
        Err(source) => {
            return Err(CoreError::Io {
                path: scan_root.to_path_buf(),
                source,
            })
        }
    };

    let mut highest = 0;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let candidate = template_parent.join(entry.file_name());
        let Some(found) = folder_template.validate_and_get_fields(&candidate.to_string_lossy())
        else {
            continue;
        };

        let agrees = found.iter().all(|(key, value)| {
            key == "delivery_version"
                || key == "delivery_date"
                || fields.get(key).map_or(true, |expected| expected == value)
        });
        if !agrees {
            continue;
        }

        let Some(number) = found.get("delivery_version").and_then(FieldValue::as_int) else {
            continue;
        };
        let counts = continuous
            || found
                .get("delivery_date")
                .and_then(FieldValue::as_timestamp)
                .map_or(true, |date| date.date() == today);

        if counts {
            highest = highest.max(number);
        }
    }

    tracing::debug!(root = %scan_root.display(), highest, "Scanned delivery folders");
    Ok(highest + 1)
}

// ---------------------------------------------------------------------------
// Version plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewTarget {
    pub output: PreviewOutput,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LutTarget {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Every destination of one version delivery.
#[derive(Debug, Clone)]
pub struct VersionPlan {
    pub fields: TemplateFields,
    /// Delivery folder as the template names it.
    pub template_root: PathBuf,
    /// Delivery folder actually written to.
    pub delivery_root: PathBuf,
    pub timecode_ref: Option<String>,
    pub previews: Vec<PreviewTarget>,
    pub sequence: Option<PathBuf>,
    /// Present for shots when both LUT templates are configured.
    pub lut: Option<LutTarget>,
}

impl VersionPlan {
    pub fn total_jobs(&self) -> usize {
        self.previews.len() + usize::from(self.sequence.is_some())
    }
}

/// Resolve the destinations of `version` for the requested deliverables.
#[allow(clippy::too_many_arguments)]
pub fn plan_version(
    settings: &Settings,
    user: &UserSettings,
    records: &dyn RecordSource,
    entity: &Entity,
    version: &Version,
    deliverables: Deliverables,
    base: &TemplateFields,
    delivery_version: i64,
) -> Result<VersionPlan, CoreError> {
    let templates = settings.entity_templates(entity.is_shot())?;
    let folder_template = settings.templates.require(crate::settings::DELIVERY_FOLDER)?;

    let mut fields = version_template_fields(entity, version, base, Some(delivery_version));
    if let Some(movie_fields) = version
        .path_to_movie
        .as_deref()
        .and_then(|movie| templates.input_preview.validate_and_get_fields(movie))
    {
        merge_under(&mut fields, movie_fields);
    }

    let timecode_ref = timecode_ref(templates.input_sequence, &fields, version);

    let template_root = PathBuf::from(folder_template.apply_fields(&fields)?);
    let delivery_root = delivery_root(&template_root, user.delivery_location.as_deref());
    let place = |path: String| relocate(Path::new(&path), &template_root, &delivery_root);

    let mut previews = Vec::new();
    if deliverables.deliver_preview {
        for output in user.delivery_preview_outputs() {
            let mut preview_fields = fields.clone();
            preview_fields.insert(
                "delivery_preview_extension".into(),
                output.extension.as_str().into(),
            );
            compile_extra_template_fields(
                templates.delivery_preview,
                records,
                entity,
                version,
                &mut preview_fields,
            );
            previews.push(PreviewTarget {
                output: output.clone(),
                path: place(templates.delivery_preview.apply_fields(&preview_fields)?),
            });
        }
    }

    let sequence = if deliverables.deliver_sequence {
        let mut sequence_fields = fields.clone();
        compile_extra_template_fields(
            templates.delivery_sequence,
            records,
            entity,
            version,
            &mut sequence_fields,
        );
        Some(place(templates.delivery_sequence.apply_fields(&sequence_fields)?))
    } else {
        None
    };

    let lut = match settings.lut_templates() {
        Some((input, delivery)) if entity.is_shot() => Some(LutTarget {
            source: PathBuf::from(input.apply_fields(&fields)?),
            destination: place(delivery.apply_fields(&fields)?),
        }),
        _ => None,
    };

    Ok(VersionPlan {
        fields,
        template_root,
        delivery_root,
        timecode_ref,
        previews,
        sequence,
        lut,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
