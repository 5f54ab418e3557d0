//! CSV manifest codec.
//!
//! A manifest has one header row of user-defined column names and one row
//! per delivered artifact. Writing merges with a manifest already on disk:
//! existing rows are re-keyed to the current header (unknown columns are
//! dropped, new ones backfilled empty) and rows identical to one already
//! present are not appended twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::context::Context;
use crate::field_template::FieldTemplate;
use crate::frames;
use crate::types::FrameNumber;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

static NON_PRINTABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x20-\x7E\n\r\t]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to access manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV template {0} must contain a row of names and a row of templates")]
    TemplateShape(PathBuf),

    #[error("Invalid CSV template name \"{0}\"")]
    InvalidTemplateName(String),
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// One manifest column: its header name and the template filling it.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvColumn {
    pub name: String,
    pub template: FieldTemplate,
}

impl CsvColumn {
    pub fn new(name: impl Into<String>, template: FieldTemplate) -> Self {
        Self {
            name: name.into(),
            template,
        }
    }
}

/// Strip characters that are neither printable ASCII nor line whitespace.
pub fn sanitize(value: &str) -> String {
    NON_PRINTABLE_RE.replace_all(value, "").into_owned()
}

/// Resolve one row. Cells that fail to resolve are left empty.
pub fn resolve_row(columns: &[CsvColumn], context: &Context<'_>) -> Vec<String> {
    columns
        .iter()
        .map(|column| match column.template.apply_context(context) {
            Ok(value) => sanitize(&value),
            Err(e) => {
                tracing::error!(column = %column.name, error = %e, "Failed to resolve CSV field");
                String::new()
            }
        })
        .collect()
}

/// Whether a delivered artifact is on disk, either at `path` itself or,
/// for frame sequences, at its last frame.
pub fn artifact_exists(path: &str, last_frame: Option<FrameNumber>) -> bool {
    if Path::new(path).exists() {
        return true;
    }
    last_frame
        .and_then(|frame| frames::format_frame(path, frame))
        .is_some_and(|framed| Path::new(&framed).exists())
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Manifest {
    pub fn new(columns: &[CsvColumn]) -> Self {
        Self {
            header: columns.iter().map(|c| c.name.clone()).collect(),
            rows: Vec::new(),
        }
    }

    /// Start from the manifest at `path` if one exists, re-keyed to the
    /// header of `columns`.
    pub fn load_or_new(path: &Path, columns: &[CsvColumn]) -> Result<Self, ManifestError> {
        let mut manifest = Self::new(columns);
        if !path.exists() {
            return Ok(manifest);
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)?;
        let existing: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let positions: HashMap<&str, usize> = existing
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        for record in reader.records() {
            let record = record?;
            let row = manifest
                .header
                .iter()
                .map(|name| {
                    positions
                        .get(name.as_str())
                        .and_then(|&i| record.get(i))
                        .unwrap_or_default()
                        .to_string()
                })
                .collect();
            manifest.rows.push(row);
        }

        tracing::debug!(path = %path.display(), rows = manifest.rows.len(), "Loaded existing manifest");
        Ok(manifest)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Append a row unless an identical one is present. Returns whether
    /// the row was added.
    pub fn push_row(&mut self, row: Vec<String>) -> bool {
        if self.rows.contains(&row) {
            return false;
        }
        self.rows.push(row);
        true
    }

    /// Write the manifest, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ManifestError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %path.display(), rows = self.rows.len(), "Wrote manifest");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CSV templates
// ---------------------------------------------------------------------------

/// Read a two-row CSV template: column names, then field templates.
/// Templates that fail to parse become the literal `"-"`.
pub fn load_csv_template(path: &Path) -> Result<Vec<CsvColumn>, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = reader.records();
    let (Some(names), Some(templates)) = (rows.next().transpose()?, rows.next().transpose()?) else {
        return Err(ManifestError::TemplateShape(path.to_path_buf()));
    };

    let columns = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let text = templates.get(i).unwrap_or_default();
            let template = FieldTemplate::new(text).unwrap_or_else(|e| {
                tracing::error!(column = %name, error = %e, "Invalid CSV template field");
                FieldTemplate::placeholder()
            });
            CsvColumn::new(name, template)
        })
        .collect();

    Ok(columns)
}

/// Write columns as a two-row CSV template.
pub fn save_csv_template(path: &Path, columns: &[CsvColumn]) -> Result<(), ManifestError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ManifestError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
    writer.write_record(columns.iter().map(|c| c.template.template()))?;
    writer.flush().map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
