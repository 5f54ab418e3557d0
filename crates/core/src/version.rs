//! Versions: the unit of delivery.

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, FrameNumber};

/// Pipeline task a version was made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub name: String,
}

/// How an attachment is stored in the production database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentLinkType {
    Upload,
    Local,
    Web,
}

/// A file attached to a version (submission notes, reference PDFs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub link_type: AttachmentLinkType,
    #[serde(default)]
    pub url: Option<String>,
    /// Local path for the current platform, for `local` links.
    #[serde(default)]
    pub local_path: Option<String>,
}

impl Attachment {
    /// Only uploaded and local attachments are delivered as files.
    pub fn is_deliverable(&self) -> bool {
        matches!(
            self.link_type,
            AttachmentLinkType::Upload | AttachmentLinkType::Local
        )
    }
}

/// Effective deliverables for one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deliverables {
    pub deliver_sequence: bool,
    pub deliver_preview: bool,
}

impl Deliverables {
    pub fn any(&self) -> bool {
        self.deliver_sequence || self.deliver_preview
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Version {
    pub id: EntityId,
    pub code: String,
    pub first_frame: Option<FrameNumber>,
    pub last_frame: Option<FrameNumber>,
    pub fps: Option<f64>,
    /// Published file version. `None` when no published file is linked.
    pub version_number: Option<i64>,
    pub thumbnail: Option<String>,
    /// Frame sequence path with a single `%0Nd` placeholder.
    pub sequence_path: Option<String>,
    pub path_to_movie: Option<String>,
    pub frames_have_slate: bool,
    pub movie_has_slate: bool,
    pub task: Option<Task>,
    pub submitting_for: String,
    pub submission_note: String,
    pub submission_note_short: String,
    pub attachment: Option<Attachment>,
    pub deliver_preview: bool,
    pub deliver_sequence: bool,
    pub sequence_output_status: String,

    pub validation_message: String,
    pub validation_error: String,
    pub progress: f64,
}

impl Version {
    pub fn new(id: EntityId, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            first_frame: None,
            last_frame: None,
            fps: None,
            version_number: None,
            thumbnail: None,
            sequence_path: None,
            path_to_movie: None,
            frames_have_slate: false,
            movie_has_slate: false,
            task: None,
            submitting_for: String::new(),
            submission_note: String::new(),
            submission_note_short: String::new(),
            attachment: None,
            deliver_preview: true,
            deliver_sequence: true,
            sequence_output_status: String::new(),
            validation_message: String::new(),
            validation_error: String::new(),
            progress: 0.0,
        }
    }

    /// Published version number for path templates, never negative.
    pub fn display_version_number(&self) -> i64 {
        self.version_number.unwrap_or(0).max(0)
    }

    /// Frame range when both ends are known and non-negative.
    pub fn frame_range(&self) -> Option<(FrameNumber, FrameNumber)> {
        match (self.first_frame, self.last_frame) {
            (Some(first), Some(last)) if first >= 0 && last >= 0 => Some((first, last)),
            _ => None,
        }
    }

    /// Default deliverables as decided at load time.
    pub fn default_deliverables(&self) -> Deliverables {
        Deliverables {
            deliver_sequence: self.deliver_sequence,
            deliver_preview: self.deliver_preview,
        }
    }

    pub fn task_name(&self) -> Option<&str> {
        self.task.as_ref().map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_version_is_clamped() {
        let mut version = Version::new(1, "sh010_comp_v001");
        assert_eq!(version.display_version_number(), 0);
        version.version_number = Some(-1);
        assert_eq!(version.display_version_number(), 0);
        version.version_number = Some(12);
        assert_eq!(version.display_version_number(), 12);
    }

    #[test]
    fn frame_range_requires_both_ends() {
        let mut version = Version::new(1, "v");
        version.first_frame = Some(1001);
        assert_eq!(version.frame_range(), None);
        version.last_frame = Some(-1);
        assert_eq!(version.frame_range(), None);
        version.last_frame = Some(1010);
        assert_eq!(version.frame_range(), Some((1001, 1010)));
    }

    #[test]
    fn attachment_link_types() {
        let attachment: Attachment =
            serde_json::from_str(r#"{"name": "notes.pdf", "link_type": "web", "url": "https://x"}"#)
                .unwrap();
        assert!(!attachment.is_deliverable());
    }
}
