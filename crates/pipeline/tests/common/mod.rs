//! Shared fixtures: a snapshot-backed database, settings rooted in a temp
//! directory and a bash script standing in for the renderer.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use delivery_core::entity::Entity;
use delivery_core::settings::Settings;
use delivery_pipeline::load_entities;
use delivery_shotgrid::{InMemoryShotGrid, ShotGridCache};

pub const PROJECT_ID: i64 = 1;

/// Renderer that reports progress and writes its output file.
pub const RENDER_OK: &str = "echo 'Nuke 15.0v4'\n\
     echo 'Frame 1001 (1 of 2)'\n\
     echo 'Frame 1002 (2 of 2)'\n\
     printf 'movie' > \"$7\"\n\
     exit 0\n";

/// Renderer that cannot check out a license.
pub const RENDER_NO_LICENSE: &str = "echo 'A license for nuke was not found'\nexit 1\n";

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub shotgrid: Arc<InMemoryShotGrid>,
    pub settings: Arc<Settings>,
}

impl Fixture {
    /// Fixture whose renderer runs `render_body`.
    pub fn new(render_body: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).expect("create input dir");

        for name in ["sh010_comp_v003", "sh020_comp_v001", "chair_mdl_v002"] {
            std::fs::write(input.join(format!("{name}.mov")), "movie").expect("write movie");
        }
        for frame in 1001..=1002 {
            std::fs::write(input.join(format!("sh010_comp_v003.{frame}.exr")), format!("frame {frame}"))
                .expect("write frame");
        }

        let renderer = dir.path().join("nuke.sh");
        std::fs::write(&renderer, format!("#!/bin/bash\n{render_body}")).expect("write renderer");
        std::fs::set_permissions(&renderer, std::fs::Permissions::from_mode(0o755)).expect("chmod renderer");

        let settings = Settings::from_json(&settings_json(dir.path(), &renderer).to_string()).expect("settings");
        let shotgrid = InMemoryShotGrid::from_json(&snapshot(&input)).expect("snapshot");

        Self {
            dir,
            shotgrid: Arc::new(shotgrid),
            settings: Arc::new(settings),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn out(&self, relative: &str) -> PathBuf {
        self.dir.path().join("out").join(relative)
    }

    /// Load the cache and the delivery set.
    pub async fn load(&self) -> (Arc<ShotGridCache>, Vec<Entity>) {
        let mut cache = ShotGridCache::new(self.shotgrid.clone(), PROJECT_ID, &self.settings);
        cache.load(&self.settings).await.expect("load cache");
        cache.process();
        let entities = load_entities(&mut cache, &self.settings).await.expect("load entities");
        (Arc::new(cache), entities)
    }
}

fn settings_json(root: &Path, renderer: &Path) -> Value {
    let root = root.display();
    json!({
        "delivery_preview_outputs": [
            {"name": "ProRes", "extension": "mov", "default_enabled": true, "settings": {"codec": "ProRes 4444 10-bit"}}
        ],
        "default_csv": {
            "Filename": "<file.name>",
            "Version": "<version.code>",
            "Codec": "<file.codec>"
        },
        "shot_status_field": "sg_status_list",
        "version_status_field": "sg_status_list",
        "shot_delivery_status": "fin",
        "version_delivery_status": "rtd",
        "version_delivered_status": "dlvd",
        "version_preview_delivered_status": "pdlv",
        "shot_delivered_status": "dlvd",
        "templates": {
            "keys": {"delivery_version": {"type": "int", "format_spec": "03"}},
            "paths": {
                "delivery_folder": format!("{root}/out/{{prj}}_v{{delivery_version}}"),
                "csv_submission_form": format!("{root}/out/{{prj}}_v{{delivery_version}}/{{prj}}_v{{delivery_version}}.csv"),
                "input_shot_sequence": format!("{root}/plates/{{Shot}}.%04d.exr"),
                "input_shot_preview": format!("{root}/plates/{{Shot}}.mov"),
                "delivery_shot_sequence": format!("{root}/out/{{prj}}_v{{delivery_version}}/{{Shot}}.%04d.exr"),
                "delivery_shot_preview": format!("{root}/out/{{prj}}_v{{delivery_version}}/{{Shot}}_preview.mov"),
                "input_asset_sequence": format!("{root}/plates/{{Asset}}.%04d.exr"),
                "input_asset_preview": format!("{root}/plates/{{Asset}}.mov"),
                "delivery_asset_sequence": format!("{root}/out/{{prj}}_v{{delivery_version}}/{{Asset}}.%04d.exr"),
                "delivery_asset_preview": format!("{root}/out/{{prj}}_v{{delivery_version}}/{{Asset}}_preview.mov")
            }
        },
        "renderer": {
            "nuke_path": renderer,
            "slate_script": "slate.py",
            "plate_script": "plate.py"
        }
    })
}

fn snapshot(input: &Path) -> Value {
    let path = |name: &str| input.join(name).to_string_lossy().into_owned();
    let project = json!({"type": "Project", "id": PROJECT_ID});
    let sequence = json!({"type": "Sequence", "id": 5, "name": "SQ010"});
    let sequence_path = path("sh010_comp_v003.%04d.exr");

    json!({
        "entities": {
            "Project": [
                {"type": "Project", "id": PROJECT_ID, "name": "Show", "sg_short_name": "prj", "sg_vendorid": "vnd"}
            ],
            "Shot": [
                {"type": "Shot", "id": 2, "code": "sh010", "sg_status_list": "fin", "sg_sequence": sequence, "project": project},
                {"type": "Shot", "id": 3, "code": "sh020", "sg_status_list": "ip", "sg_sequence": sequence, "project": project}
            ],
            "Asset": [
                {"type": "Asset", "id": 4, "code": "chair", "project": project}
            ],
            "Version": [
                {
                    "type": "Version", "id": 10, "code": "sh010_comp_v003", "project": project,
                    "entity": {"type": "Shot", "id": 2}, "sg_status_list": "rtd",
                    "sg_first_frame": 1001, "sg_last_frame": 1002, "sg_uploaded_movie_frame_rate": 24.0,
                    "sg_path_to_movie": path("sh010_comp_v003.mov"),
                    "published_files": [{"type": "PublishedFile", "id": 20}]
                },
                {
                    "type": "Version", "id": 11, "code": "sh020_comp_v001", "project": project,
                    "entity": {"type": "Shot", "id": 3}, "sg_status_list": "rtd",
                    "sg_first_frame": 1001, "sg_last_frame": 1002, "sg_uploaded_movie_frame_rate": 24.0,
                    "sg_path_to_movie": path("sh020_comp_v001.mov"),
                    "published_files": []
                },
                {
                    "type": "Version", "id": 12, "code": "chair_mdl_v002", "project": project,
                    "entity": {"type": "Asset", "id": 4}, "sg_status_list": "rtd",
                    "sg_first_frame": 1001, "sg_last_frame": 1002, "sg_uploaded_movie_frame_rate": 24.0,
                    "sg_path_to_movie": path("chair_mdl_v002.mov"),
                    "published_files": []
                },
                {
                    "type": "Version", "id": 13, "code": "sh030_comp_v001", "project": project,
                    "entity": {"type": "Shot", "id": 2}, "sg_status_list": "ip"
                }
            ],
            "PublishedFile": [
                {
                    "type": "PublishedFile", "id": 20, "version_number": 3,
                    "path": {
                        "local_path_linux": sequence_path,
                        "local_path_mac": sequence_path,
                        "local_path_windows": sequence_path
                    }
                }
            ]
        }
    })
}
