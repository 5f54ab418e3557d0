//! Resolution context for field templates.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::entity::Entity;
use crate::records::RecordSource;
use crate::types::Record;
use crate::version::Version;

/// Configured field names the template engine needs while resolving.
#[derive(Debug, Clone, Default)]
pub struct ResolveSettings {
    /// Version field holding the submission attachment.
    pub attachment_field: Option<String>,
    /// Entity type footage formats are stored as.
    pub footage_format_entity: Option<String>,
    /// Shot field linking to footage formats.
    pub shot_footage_formats_field: Option<String>,
}

/// A delivered artifact a manifest row describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileContext {
    pub file_path: PathBuf,
    pub directory_path: PathBuf,
    pub codec: String,
    pub bit_depth: String,
    pub has_slate: bool,
}

impl FileContext {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let directory_path = file_path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            file_path,
            directory_path,
            ..Self::default()
        }
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Everything a template may draw values from.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub records: &'a dyn RecordSource,
    pub settings: &'a ResolveSettings,
    pub shot: Option<&'a Entity>,
    pub version: Option<&'a Version>,
    /// A raw record, used when resolving overrides for that record.
    pub entity: Option<&'a Record>,
    pub file: Option<&'a FileContext>,
}

impl<'a> Context<'a> {
    pub fn new(records: &'a dyn RecordSource, settings: &'a ResolveSettings) -> Self {
        Self {
            records,
            settings,
            shot: None,
            version: None,
            entity: None,
            file: None,
        }
    }

    pub fn with_shot(mut self, shot: &'a Entity) -> Self {
        self.shot = Some(shot);
        self
    }

    pub fn with_version(mut self, version: &'a Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_entity(mut self, entity: &'a Record) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_file(mut self, file: &'a FileContext) -> Self {
        self.file = Some(file);
        self
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("shot", &self.shot.map(|s| s.id))
            .field("version", &self.version.map(|v| v.id))
            .field("entity", &self.entity.and_then(|e| e.get("id")))
            .field("file", &self.file)
            .finish()
    }
}
