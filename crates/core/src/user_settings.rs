//! Run-scoped delivery options.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::manifest::{self, CsvColumn, ManifestError};
use crate::outputs::{dedup_preview_outputs, Letterbox, PreviewOutput};
use crate::settings::Settings;

static TEMPLATE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9 _-]+$").expect("valid regex"));

/// Options chosen for one export. Immutable once the export starts.
#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    /// Explicit delivery version. Auto-numbered when absent.
    pub delivery_version: Option<i64>,
    /// Root replacing the templated delivery location.
    pub delivery_location: Option<PathBuf>,
    pub letterbox: Option<Letterbox>,
    delivery_preview_outputs: Vec<PreviewOutput>,
    pub csv_fields: Vec<CsvColumn>,
}

impl UserSettings {
    /// Defaults from the application settings: every default-enabled
    /// preview output and the default CSV columns.
    pub fn from_settings(settings: &Settings) -> Self {
        let enabled: Vec<PreviewOutput> = settings
            .delivery_preview_outputs
            .iter()
            .filter(|o| o.default_enabled)
            .cloned()
            .collect();

        Self {
            delivery_preview_outputs: dedup_preview_outputs(&enabled),
            csv_fields: settings.default_csv.clone(),
            ..Self::default()
        }
    }

    pub fn with_preview_outputs(mut self, outputs: &[PreviewOutput]) -> Self {
        self.delivery_preview_outputs = dedup_preview_outputs(outputs);
        self
    }

    /// Selected preview outputs, at most one per extension.
    pub fn delivery_preview_outputs(&self) -> &[PreviewOutput] {
        &self.delivery_preview_outputs
    }

    /// Whether any CSV column reads `version.<attachment_field>`.
    pub fn attachment_referenced(&self, attachment_field: Option<&str>) -> bool {
        let Some(field) = attachment_field else {
            return false;
        };
        self.csv_fields
            .iter()
            .any(|column| column.template.references("version", field))
    }

    /// Replace the CSV columns with those of a template file.
    pub fn load_csv_template(&mut self, path: &Path) -> Result<(), ManifestError> {
        self.csv_fields = manifest::load_csv_template(path)?;
        tracing::info!(path = %path.display(), columns = self.csv_fields.len(), "Loaded CSV template");
        Ok(())
    }

    /// Save the CSV columns as `<dir>/<name>.csv`.
    pub fn save_csv_template(&self, dir: &Path, name: &str) -> Result<PathBuf, ManifestError> {
        if !TEMPLATE_NAME_RE.is_match(name) {
            return Err(ManifestError::InvalidTemplateName(name.to_string()));
        }
        let path = dir.join(format!("{name}.csv"));
        manifest::save_csv_template(&path, &self.csv_fields)?;
        tracing::info!(path = %path.display(), "Saved CSV template");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::field_template::FieldTemplate;

    fn output(name: &str, extension: &str, default_enabled: bool) -> PreviewOutput {
        PreviewOutput {
            name: name.to_string(),
            extension: extension.to_string(),
            default_enabled,
            settings: json!({}).as_object().cloned().unwrap(),
            use_letterbox: true,
        }
    }

    #[test]
    fn preview_outputs_are_deduplicated_by_extension() {
        let user = UserSettings::default().with_preview_outputs(&[
            output("ProRes", "mov", true),
            output("H264", "mp4", true),
            output("DNx", "mov", true),
        ]);
        let names: Vec<_> = user.delivery_preview_outputs().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["DNx", "H264"]);
    }

    #[test]
    fn attachment_reference_detection() {
        let mut user = UserSettings::default();
        assert!(!user.attachment_referenced(Some("sg_attachment")));

        user.csv_fields = vec![CsvColumn::new(
            "Attachment",
            FieldTemplate::new("<version.sg_attachment>").unwrap(),
        )];
        assert!(user.attachment_referenced(Some("sg_attachment")));
        assert!(!user.attachment_referenced(Some("sg_other")));
        assert!(!user.attachment_referenced(None));
    }

    #[test]
    fn csv_template_names_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let mut user = UserSettings::default();
        user.csv_fields = vec![CsvColumn::new("Shot", FieldTemplate::new("<shot.code>").unwrap())];

        assert_matches!(
            user.save_csv_template(dir.path(), "../escape"),
            Err(ManifestError::InvalidTemplateName(_))
        );

        let path = user.save_csv_template(dir.path(), "Vendor A_v2").unwrap();
        assert!(path.ends_with("Vendor A_v2.csv"));

        let mut loaded = UserSettings::default();
        loaded.load_csv_template(&path).unwrap();
        assert_eq!(loaded.csv_fields, user.csv_fields);
    }
}
