//! Build the delivery model from cached database records.
//!
//! Versions waiting in the delivery status are grouped under their parent
//! shot or asset. Shots already in the shot delivery status deliver their
//! frame sequence, everything else delivers previews.

use std::collections::BTreeMap;

use serde_json::Value;

use delivery_core::entity::Entity;
use delivery_core::footage_format::FootageFormat;
use delivery_core::nested::display_value;
use delivery_core::records::{link_of, RecordSource};
use delivery_core::settings::Settings;
use delivery_core::types::{EntityId, Record};
use delivery_core::version::{Attachment, AttachmentLinkType, Task, Version};
use delivery_shotgrid::{Filter, ShotGridCache, ShotGridError};

/// Project values used in paths and slates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectInfo {
    /// `sg_short_name`, the `{prj}` path key.
    pub code: String,
    /// `sg_vendorid`, the `{vnd}` path key.
    pub vendor: String,
    /// Value of the configured show name field.
    pub show: String,
}

impl ProjectInfo {
    pub fn from_records(records: &dyn RecordSource, settings: &Settings) -> Self {
        let Some(project) = records.processed_by_id("Project", records.project_id()) else {
            tracing::warn!(project_id = records.project_id(), "Project is not cached");
            return Self::default();
        };
        Self {
            code: text(project, Some("sg_short_name")),
            vendor: text(project, Some("sg_vendorid")),
            show: text(project, settings.show_name_field.as_deref()),
        }
    }
}

/// Load every shot and asset with versions waiting for delivery.
///
/// Shots come first, sorted by `(sequence, code)`, then assets by code.
pub async fn load_entities(
    cache: &mut ShotGridCache,
    settings: &Settings,
) -> Result<Vec<Entity>, ShotGridError> {
    let project_id = cache.project_id();
    let project_link = Filter::link("Project", project_id);

    let project = cache
        .find_one("Project", &[Filter::is("id", project_id)])
        .await?
        .ok_or_else(|| ShotGridError::NotFound {
            entity_type: "Project".to_string(),
            id: project_id,
        })?;
    let project_code = text(&project, Some("sg_short_name"));

    let versions = cache
        .find(
            "Version",
            &[
                Filter::is("project", project_link.clone()),
                Filter::is(
                    settings.version_status_field.as_str(),
                    settings.version_delivery_status.as_str(),
                ),
            ],
            true,
        )
        .await?;

    let footage_formats = load_footage_formats(cache, settings, &project_link).await?;

    let mut grouped: BTreeMap<(String, EntityId), Vec<Record>> = BTreeMap::new();
    for version in versions {
        match link_of(&version, "entity") {
            Some(parent) => grouped.entry(parent).or_default().push(version),
            None => tracing::warn!(
                version = %text(&version, Some("code")),
                "Version is not linked to a shot or asset, skipping",
            ),
        }
    }

    let mut shots = Vec::new();
    let mut assets = Vec::new();

    for ((entity_type, id), records) in grouped {
        let Some(parent) = cache.find_one(&entity_type, &[Filter::is("id", id)]).await? else {
            tracing::warn!(entity_type, id, "Parent entity not found, skipping its versions");
            continue;
        };

        let mut entity = match entity_type.as_str() {
            "Shot" => {
                let sequence = parent.get("sg_sequence").cloned().unwrap_or(Value::Null);
                let episode = episode_code(cache, &project_link, &sequence).await?;
                Entity::new_shot(
                    id,
                    text(&parent, Some("code")),
                    sequence
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    episode,
                    project_code.as_str(),
                )
            }
            "Asset" => Entity::new_asset(id, text(&parent, Some("code"))),
            other => {
                tracing::warn!(entity_type = other, id, "Unsupported parent entity type, skipping");
                continue;
            }
        };

        entity.description = text(&parent, Some("description"));
        entity.vfx_scope_of_work = text(&parent, settings.vfx_scope_of_work_field.as_deref());
        let formats_field = if entity.is_shot() {
            settings.shot_footage_formats_field.as_deref()
        } else {
            settings.asset_footage_formats_field.as_deref()
        };
        entity.footage_formats = linked_formats(&parent, formats_field, &footage_formats);

        // Shots already in delivery deliver frames, everything else previews.
        let deliver_sequence = entity.is_shot()
            && parent.get(&settings.shot_status_field).and_then(Value::as_str)
                == Some(settings.shot_delivery_status.as_str());

        for record in &records {
            let published = published_file(cache, record).await?;
            entity.add_version(build_version(record, published.as_ref(), settings, deliver_sequence));
        }

        if entity.is_shot() {
            shots.push(entity);
        } else {
            assets.push(entity);
        }
    }

    shots.sort_by(|a, b| (a.sequence(), &a.code).cmp(&(b.sequence(), &b.code)));
    assets.sort_by(|a, b| a.code.cmp(&b.code));
    tracing::info!(shots = shots.len(), assets = assets.len(), "Loaded entities to deliver");

    shots.extend(assets);
    Ok(shots)
}

async fn load_footage_formats(
    cache: &mut ShotGridCache,
    settings: &Settings,
    project_link: &Value,
) -> Result<Vec<FootageFormat>, ShotGridError> {
    let Some(entity_type) = &settings.footage_format_entity else {
        return Ok(Vec::new());
    };

    let records = cache
        .find(entity_type, &[Filter::is("project", project_link.clone())], false)
        .await?;
    Ok(records
        .iter()
        .filter_map(|record| {
            FootageFormat::from_record(&settings.footage_format_fields, record)
                .map_err(|e| tracing::warn!(error = %e, "Skipping footage format"))
                .ok()
        })
        .collect())
}

/// Code of the episode containing `sequence`, if any.
async fn episode_code(
    cache: &mut ShotGridCache,
    project_link: &Value,
    sequence: &Value,
) -> Result<Option<String>, ShotGridError> {
    if !sequence.is_object() {
        return Ok(None);
    }

    let filters = [
        Filter::is("project", project_link.clone()),
        Filter::is("sequences", sequence.clone()),
    ];
    match cache.find_one("Episode", &filters).await {
        Ok(episode) => Ok(episode
            .and_then(|e| e.get("code").and_then(Value::as_str).map(str::to_string))),
        Err(ShotGridError::UnknownEntityType(_)) => {
            tracing::debug!("No Episode entity, shots have no episode");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn published_file(
    cache: &mut ShotGridCache,
    version: &Record,
) -> Result<Option<Record>, ShotGridError> {
    let Some(id) = version
        .get("published_files")
        .and_then(Value::as_array)
        .and_then(|files| files.first())
        .and_then(|file| file.get("id"))
        .and_then(Value::as_i64)
    else {
        return Ok(None);
    };
    cache.find_one("PublishedFile", &[Filter::is("id", id)]).await
}

fn linked_formats(
    parent: &Record,
    field: Option<&str>,
    formats: &[FootageFormat],
) -> Option<Vec<FootageFormat>> {
    let links = parent.get(field?)?.as_array()?;
    let ids: Vec<EntityId> = links
        .iter()
        .filter_map(|link| link.get("id").and_then(Value::as_i64))
        .collect();
    Some(
        formats
            .iter()
            .filter(|f| f.id.is_some_and(|id| ids.contains(&id)))
            .cloned()
            .collect(),
    )
}

fn build_version(
    record: &Record,
    published: Option<&Record>,
    settings: &Settings,
    deliver_sequence: bool,
) -> Version {
    let id = record.get("id").and_then(Value::as_i64).unwrap_or_default();
    let mut version = Version::new(id, text(record, Some("code")));

    version.first_frame = record.get("sg_first_frame").and_then(Value::as_i64);
    version.last_frame = record.get("sg_last_frame").and_then(Value::as_i64);
    version.fps = record.get("sg_uploaded_movie_frame_rate").and_then(Value::as_f64);
    version.thumbnail = optional_text(record, "image");
    version.path_to_movie = optional_text(record, "sg_path_to_movie");
    version.frames_have_slate = flag(record, "sg_frames_have_slate");
    version.movie_has_slate = flag(record, "sg_movie_has_slate");
    version.task = record.get("sg_task").and_then(|task| {
        Some(Task {
            id: task.get("id")?.as_i64()?,
            name: task.get("name")?.as_str()?.to_string(),
        })
    });

    if let Some(published) = published {
        version.version_number = published.get("version_number").and_then(Value::as_i64);
        version.sequence_path = published
            .get("path")
            .and_then(|path| path.get(platform_path_key()))
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    version.submitting_for = text(record, settings.submitting_for_field.as_deref());
    version.submission_note = text(record, settings.submission_note_field.as_deref());
    version.submission_note_short = text(record, settings.short_submission_note_field.as_deref());
    version.attachment = settings
        .attachment_field
        .as_deref()
        .and_then(|field| record.get(field))
        .and_then(attachment);
    version.sequence_output_status = text(record, settings.delivery_sequence_outputs_field.as_deref());

    version.deliver_sequence = deliver_sequence;
    version.deliver_preview = !deliver_sequence;
    version
}

fn attachment(value: &Value) -> Option<Attachment> {
    let object = value.as_object()?;
    let link_type: AttachmentLinkType =
        serde_json::from_value(object.get("link_type")?.clone()).ok()?;
    let field = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

    Some(Attachment {
        name: field("name").unwrap_or_default(),
        link_type,
        url: field("url"),
        local_path: field(platform_path_key()),
    })
}

/// Key of the local path for the current platform in path and
/// attachment values.
fn platform_path_key() -> &'static str {
    if cfg!(target_os = "macos") {
        "local_path_mac"
    } else if cfg!(windows) {
        "local_path_windows"
    } else {
        "local_path_linux"
    }
}

fn text(record: &Record, field: Option<&str>) -> String {
    field
        .and_then(|f| record.get(f))
        .map(display_value)
        .unwrap_or_default()
}

fn optional_text(record: &Record, field: &str) -> Option<String> {
    record.get(field).and_then(Value::as_str).map(str::to_string)
}

fn flag(record: &Record, field: &str) -> bool {
    record.get(field).and_then(Value::as_bool).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn attachment_parses_link_types() {
        let upload = attachment(&json!({
            "name": "notes.pdf",
            "link_type": "upload",
            "url": "https://example.com/notes.pdf"
        }))
        .unwrap();
        assert_eq!(upload.link_type, AttachmentLinkType::Upload);
        assert_eq!(upload.url.as_deref(), Some("https://example.com/notes.pdf"));

        let local = attachment(&json!({
            "name": "notes.pdf",
            "link_type": "local",
            "local_path_linux": "/refs/notes.pdf",
            "local_path_mac": "/Volumes/refs/notes.pdf",
            "local_path_windows": "R:\\notes.pdf"
        }))
        .unwrap();
        assert_eq!(local.link_type, AttachmentLinkType::Local);
        assert!(local.local_path.is_some());

        assert!(attachment(&json!({"name": "x", "link_type": "ftp"})).is_none());
        assert!(attachment(&Value::Null).is_none());
    }

    #[test]
    fn footage_formats_follow_links() {
        let mut a = FootageFormat::new(
            delivery_core::footage_format::FootageFormatType::InputOnline,
            Some("4096x2160".into()),
        );
        a.id = Some(5);
        let mut b = a.clone();
        b.id = Some(6);
        let formats = vec![a, b];

        let shot = record(json!({"sg_footage_formats": [{"type": "CustomEntity01", "id": 6}]}));
        let linked = linked_formats(&shot, Some("sg_footage_formats"), &formats).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, Some(6));

        let unlinked = record(json!({"sg_footage_formats": null}));
        assert!(linked_formats(&unlinked, Some("sg_footage_formats"), &formats).is_none());
        assert!(linked_formats(&shot, None, &formats).is_none());
    }

    #[test]
    fn text_fields_render_non_strings() {
        let r = record(json!({"code": "sh010", "sg_cut_in": 1001, "description": null}));
        assert_eq!(text(&r, Some("code")), "sh010");
        assert_eq!(text(&r, Some("sg_cut_in")), "1001");
        assert_eq!(text(&r, Some("description")), "");
        assert_eq!(text(&r, None), "");
    }
}
