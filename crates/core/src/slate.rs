//! Data burned into the slate frame.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::{Entity, EntityKind};
use crate::version::Version;

/// Payload of the renderer's `--slate-data` argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlateData {
    pub version_name: String,
    pub submission_note: String,
    pub submission_note_short: String,
    pub submitting_for: String,
    pub shot_name: String,
    pub shot_types: String,
    pub vfx_scope_of_work: String,
    pub show: String,
    pub episode: String,
    pub scene: String,
    pub sequence_name: String,
    pub vendor: String,
    pub input_has_slate: bool,
    pub optional_fields: Map<String, Value>,
}

impl SlateData {
    pub fn new(
        entity: &Entity,
        version: &Version,
        show: impl Into<String>,
        vendor: impl Into<String>,
        optional_fields: Map<String, Value>,
    ) -> Self {
        let (episode, scene, sequence_name) = episode_and_scene(entity);
        Self {
            version_name: version.code.clone(),
            submission_note: version.submission_note.clone(),
            submission_note_short: version.submission_note_short.clone(),
            submitting_for: version.submitting_for.clone(),
            shot_name: entity.code.clone(),
            shot_types: version.task_name().unwrap_or_default().to_string(),
            vfx_scope_of_work: entity.vfx_scope_of_work.clone(),
            show: show.into(),
            episode,
            scene,
            sequence_name,
            vendor: vendor.into(),
            input_has_slate: version.movie_has_slate,
            optional_fields,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// `(episode, scene, sequence)` for the slate. Shots without an episode
/// entity split an `EP_SC` sequence name instead.
pub fn episode_and_scene(entity: &Entity) -> (String, String, String) {
    match &entity.kind {
        EntityKind::Shot {
            episode: Some(episode),
            sequence,
            ..
        } => (episode.clone(), String::new(), sequence.clone()),
        EntityKind::Shot { sequence, .. } => match sequence.split_once('_') {
            Some((episode, scene)) => (episode.to_string(), scene.to_string(), sequence.clone()),
            None => (String::new(), String::new(), sequence.clone()),
        },
        EntityKind::Asset => Default::default(),
    }
}
