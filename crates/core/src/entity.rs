//! Shots and assets with their delivery versions.

use serde::Serialize;

use crate::footage_format::{FootageFormat, FootageFormatType};
use crate::types::EntityId;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EntityKind {
    Shot {
        sequence: String,
        episode: Option<String>,
        project_code: String,
    },
    Asset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub id: EntityId,
    pub code: String,
    pub description: String,
    pub vfx_scope_of_work: String,
    pub footage_formats: Option<Vec<FootageFormat>>,
    pub kind: EntityKind,
    pub progress: f64,
    versions: Vec<Version>,
}

impl Entity {
    pub fn new_shot(
        id: EntityId,
        code: impl Into<String>,
        sequence: impl Into<String>,
        episode: Option<String>,
        project_code: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            id,
            code.into(),
            EntityKind::Shot {
                sequence: sequence.into(),
                episode,
                project_code: project_code.into(),
            },
        )
    }

    pub fn new_asset(id: EntityId, code: impl Into<String>) -> Self {
        Self::with_kind(id, code.into(), EntityKind::Asset)
    }

    fn with_kind(id: EntityId, code: String, kind: EntityKind) -> Self {
        Self {
            id,
            code,
            description: String::new(),
            vfx_scope_of_work: String::new(),
            footage_formats: None,
            kind,
            progress: 0.0,
            versions: Vec::new(),
        }
    }

    /// Database entity type name.
    pub fn entity_type(&self) -> &'static str {
        match self.kind {
            EntityKind::Shot { .. } => "Shot",
            EntityKind::Asset => "Asset",
        }
    }

    pub fn is_shot(&self) -> bool {
        matches!(self.kind, EntityKind::Shot { .. })
    }

    pub fn sequence(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Shot { sequence, .. } => Some(sequence),
            EntityKind::Asset => None,
        }
    }

    /// Episode bucket used for delivery numbering and manifests. Assets
    /// and shots without an episode share the default (`None`) bucket.
    pub fn episode_bucket(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Shot { episode, .. } => episode.as_deref(),
            EntityKind::Asset => None,
        }
    }

    /// Versions, always ascending by published version number.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn versions_mut(&mut self) -> &mut [Version] {
        &mut self.versions
    }

    pub fn version_mut(&mut self, id: EntityId) -> Option<&mut Version> {
        self.versions.iter_mut().find(|v| v.id == id)
    }

    pub fn add_version(&mut self, version: Version) {
        self.versions.push(version);
        self.versions.sort_by_key(Version::display_version_number);
    }

    pub fn footage_format(&self, footage_type: FootageFormatType) -> Option<&FootageFormat> {
        self.footage_formats
            .as_ref()?
            .iter()
            .find(|f| f.footage_type == footage_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: EntityId, number: Option<i64>) -> Version {
        let mut v = Version::new(id, format!("v{id}"));
        v.version_number = number;
        v
    }

    #[test]
    fn versions_stay_sorted_regardless_of_insert_order() {
        let mut shot = Entity::new_shot(1, "sh010", "SQ010", None, "PRJ");
        shot.add_version(version(10, Some(3)));
        shot.add_version(version(11, Some(1)));
        shot.add_version(version(12, None));
        shot.add_version(version(13, Some(2)));

        let ids: Vec<_> = shot.versions().iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![12, 11, 13, 10]);
    }

    #[test]
    fn episode_bucket_by_kind() {
        let shot = Entity::new_shot(1, "sh010", "EP01_SC02", Some("EP01".into()), "PRJ");
        assert_eq!(shot.episode_bucket(), Some("EP01"));
        assert_eq!(shot.entity_type(), "Shot");

        let asset = Entity::new_asset(2, "chair");
        assert_eq!(asset.episode_bucket(), None);
        assert_eq!(asset.sequence(), None);
        assert_eq!(asset.entity_type(), "Asset");
    }

    #[test]
    fn footage_format_lookup_by_role() {
        let mut shot = Entity::new_shot(1, "sh010", "SQ010", None, "PRJ");
        assert!(shot.footage_format(FootageFormatType::InputOnline).is_none());
        shot.footage_formats = Some(vec![FootageFormat::new(
            FootageFormatType::InputOnline,
            Some("1920x1080".into()),
        )]);
        assert!(shot.footage_format(FootageFormatType::InputOnline).is_some());
        assert!(shot.footage_format(FootageFormatType::OutputPreview).is_none());
    }
}
