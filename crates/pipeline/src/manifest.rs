//! Submission manifest rows for delivered files.
//!
//! Every delivered artifact of a version becomes one row: the sequence
//! first, then each preview, then the shot LUT. Artifacts that are not on
//! disk (for example because their delivery failed) are skipped.

use std::path::{Path, PathBuf};

use delivery_core::context::{Context, FileContext};
use delivery_core::entity::Entity;
use delivery_core::error::CoreError;
use delivery_core::manifest::{artifact_exists, resolve_row, Manifest};
use delivery_core::outputs::find_sequence_output;
use delivery_core::planning::{relocate, VersionPlan};
use delivery_core::records::RecordSource;
use delivery_core::settings::{Settings, CSV_SUBMISSION_FORM};
use delivery_core::user_settings::UserSettings;
use delivery_core::version::Version;

use crate::deliver::sequence_file_info;
use crate::error::ExportError;
use crate::numbering::Bucket;

/// One artifact a manifest row describes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredFile {
    pub path: PathBuf,
    pub codec: String,
    pub bit_depth: String,
    pub has_slate: bool,
}

/// A delivered version and its artifacts.
#[derive(Debug)]
pub struct ManifestEntry<'a> {
    pub entity: &'a Entity,
    pub version: &'a Version,
    pub files: Vec<DeliveredFile>,
}

/// Artifacts `plan` delivers, in manifest order.
pub fn delivered_files(settings: &Settings, version: &Version, plan: &VersionPlan) -> Vec<DeliveredFile> {
    let mut files = Vec::new();

    if let Some(sequence) = &plan.sequence {
        let output = find_sequence_output(&settings.delivery_sequence_outputs, &version.sequence_output_status);
        let (codec, bit_depth) = match (&version.sequence_path, version.last_frame) {
            (Some(source), Some(last)) => sequence_file_info(output, source, last),
            _ => sequence_file_info(output, "", 0),
        };
        files.push(DeliveredFile {
            path: sequence.clone(),
            codec,
            bit_depth,
            has_slate: settings.add_slate_to_sequence,
        });
    }

    for preview in &plan.previews {
        files.push(DeliveredFile {
            path: preview.path.clone(),
            codec: preview.output.name.clone(),
            bit_depth: preview.output.bit_depth_hint().unwrap_or_default(),
            has_slate: true,
        });
    }

    if let Some(lut) = &plan.lut {
        files.push(DeliveredFile {
            path: lut.destination.clone(),
            codec: String::new(),
            bit_depth: String::new(),
            has_slate: false,
        });
    }

    files
}

/// Manifest location of a bucket, moved under its delivery root.
pub fn manifest_path(settings: &Settings, bucket: &Bucket) -> Result<PathBuf, ExportError> {
    let path = settings
        .templates
        .require(CSV_SUBMISSION_FORM)?
        .apply_fields(&bucket.fields)
        .map_err(CoreError::from)?;
    Ok(relocate(Path::new(&path), &bucket.template_root, &bucket.delivery_root))
}

/// Merge the rows of `entries` into the manifest of `bucket` and write it.
/// Returns the manifest path.
pub fn write_bucket_manifest(
    settings: &Settings,
    user: &UserSettings,
    records: &dyn RecordSource,
    bucket: &Bucket,
    entries: &[ManifestEntry<'_>],
) -> Result<PathBuf, ExportError> {
    let path = manifest_path(settings, bucket)?;
    let mut manifest = Manifest::load_or_new(&path, &user.csv_fields)?;
    let mut added = 0;

    for entry in entries {
        for file in &entry.files {
            let file_path = file.path.to_string_lossy();
            if !artifact_exists(&file_path, entry.version.last_frame) {
                tracing::error!(
                    path = %file_path,
                    "The file(s) of the delivered version \"{}\" could not be found! Skipping row in CSV.",
                    entry.version.code
                );
                continue;
            }

            let file_context = FileContext {
                file_path: file.path.clone(),
                directory_path: bucket.delivery_root.clone(),
                codec: file.codec.clone(),
                bit_depth: file.bit_depth.clone(),
                has_slate: file.has_slate,
            };
            let context = Context::new(records, settings.resolve_settings())
                .with_shot(entry.entity)
                .with_version(entry.version)
                .with_file(&file_context);

            let row = resolve_row(&user.csv_fields, &context);
            tracing::debug!(entity = entry.entity.id, version = entry.version.id, file = %file_context.file_name(), ?row, "Manifest row");
            if manifest.push_row(row) {
                added += 1;
            }
        }
    }

    manifest.write(&path)?;
    tracing::info!(manifest = %path.display(), rows = added, "Wrote delivery manifest");
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use delivery_core::field_template::FieldTemplate;
    use delivery_core::manifest::CsvColumn;
    use delivery_core::outputs::PreviewOutput;
    use delivery_core::path_template::FieldValue;
    use delivery_core::planning::{base_template_fields, LutTarget, PreviewTarget};
    use delivery_core::records::StaticRecords;

    use super::*;

    fn settings(root: &Path) -> Settings {
        let root = root.display();
        let text = json!({
            "shot_status_field": "sg_status_list",
            "version_status_field": "sg_status_list",
            "shot_delivery_status": "fin",
            "version_delivery_status": "dlvr",
            "version_delivered_status": "dlvd",
            "version_preview_delivered_status": "pdlv",
            "shot_delivered_status": "dlvd",
            "add_slate_to_sequence": true,
            "delivery_sequence_outputs": [
                {"name": "DWAA", "extension": "exr", "status": "dwaa", "settings": {"compression": "dwaa", "datatype": "16 bit half"}}
            ],
            "templates": {
                "keys": {"delivery_version": {"type": "int", "format_spec": "03"}},
                "paths": {
                    "delivery_folder": format!("{root}/{{prj}}_v{{delivery_version}}"),
                    "csv_submission_form": format!("{root}/{{prj}}_v{{delivery_version}}/{{prj}}_v{{delivery_version}}.csv"),
                    "input_shot_sequence": "/in/{Shot}.%04d.exr",
                    "input_shot_preview": "/in/{Shot}.mov",
                    "delivery_shot_sequence": format!("{root}/{{prj}}_v{{delivery_version}}/{{Shot}}.%04d.exr"),
                    "delivery_shot_preview": format!("{root}/{{prj}}_v{{delivery_version}}/{{Shot}}.mov"),
                    "input_asset_sequence": "/in/{Asset}.%04d.exr",
                    "input_asset_preview": "/in/{Asset}.mov",
                    "delivery_asset_sequence": format!("{root}/{{prj}}_v{{delivery_version}}/{{Asset}}.%04d.exr"),
                    "delivery_asset_preview": format!("{root}/{{prj}}_v{{delivery_version}}/{{Asset}}.mov")
                }
            },
            "renderer": {"nuke_path": "nuke", "slate_script": "slate.py", "plate_script": "plate.py"}
        });
        Settings::from_json(&text.to_string()).unwrap()
    }

    fn bucket(root: &Path) -> Bucket {
        let mut fields = base_template_fields("prj", "vnd");
        fields.insert("delivery_version".into(), FieldValue::Int(1));
        Bucket {
            episode: None,
            delivery_version: 1,
            fields,
            template_root: root.join("prj_v001"),
            delivery_root: root.join("prj_v001"),
        }
    }

    fn record(value: serde_json::Value) -> delivery_core::types::Record {
        value.as_object().cloned().unwrap()
    }

    fn version() -> Version {
        let mut version = Version::new(11, "sh010_comp_v003");
        version.first_frame = Some(1001);
        version.last_frame = Some(1002);
        version.sequence_output_status = "dwaa".into();
        version
    }

    fn plan(root: &Path) -> VersionPlan {
        let mut settings = Map::new();
        settings.insert("codec".into(), json!("ProRes 4444 10-bit"));
        VersionPlan {
            fields: Default::default(),
            template_root: root.to_path_buf(),
            delivery_root: root.to_path_buf(),
            timecode_ref: None,
            previews: vec![PreviewTarget {
                output: PreviewOutput {
                    name: "ProRes".into(),
                    extension: "mov".into(),
                    default_enabled: true,
                    settings,
                    use_letterbox: true,
                },
                path: root.join("sh010.mov"),
            }],
            sequence: Some(root.join("sh010.%04d.exr")),
            lut: Some(LutTarget {
                source: root.join("in.cube"),
                destination: root.join("sh010.cube"),
            }),
        }
    }

    #[test]
    fn files_follow_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let files = delivered_files(&settings, &version(), &plan(dir.path()));

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].path, dir.path().join("sh010.%04d.exr"));
        assert_eq!(files[0].codec, "dwaa");
        assert_eq!(files[0].bit_depth, "16 bit half");
        assert!(files[0].has_slate);
        assert_eq!(files[1].codec, "ProRes");
        assert_eq!(files[1].bit_depth, "10-bit");
        assert!(files[1].has_slate);
        assert_eq!(files[2].path, dir.path().join("sh010.cube"));
        assert!(!files[2].has_slate);
    }

    #[test]
    fn writes_rows_for_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let bucket = bucket(dir.path());
        std::fs::create_dir_all(&bucket.delivery_root).unwrap();
        std::fs::write(bucket.delivery_root.join("sh010.mov"), "movie").unwrap();

        let mut user = UserSettings::default();
        user.csv_fields = vec![
            CsvColumn::new("Filename", FieldTemplate::new("<file.name>").unwrap()),
            CsvColumn::new("Codec", FieldTemplate::new("<file.codec>").unwrap()),
            CsvColumn::new("Version", FieldTemplate::new("<version.code>").unwrap()),
        ];

        let shot = Entity::new_shot(1, "sh010", "SQ010", None, "prj");
        let version = version();
        let entries = [ManifestEntry {
            entity: &shot,
            version: &version,
            files: vec![
                DeliveredFile {
                    path: bucket.delivery_root.join("sh010.%04d.exr"),
                    codec: "dwaa".into(),
                    bit_depth: String::new(),
                    has_slate: true,
                },
                DeliveredFile {
                    path: bucket.delivery_root.join("sh010.mov"),
                    codec: "ProRes".into(),
                    bit_depth: String::new(),
                    has_slate: true,
                },
            ],
        }];

        let mut records = StaticRecords::new(1);
        records.insert("Project", record(json!({"type": "Project", "id": 1, "sg_short_name": "prj"})));
        records.insert(
            "Version",
            record(json!({"type": "Version", "id": 11, "code": "sh010_comp_v003", "entity": {"type": "Shot", "id": 1}})),
        );
        records.insert("Shot", record(json!({"type": "Shot", "id": 1, "code": "sh010"})));
        let path = write_bucket_manifest(&settings, &user, &records, &bucket, &entries).unwrap();
        assert_eq!(path, bucket.delivery_root.join("prj_v001.csv"));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["Filename,Codec,Version", "sh010.mov,ProRes,sh010_comp_v003"]);

        // Writing again merges instead of duplicating.
        write_bucket_manifest(&settings, &user, &records, &bucket, &entries).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
