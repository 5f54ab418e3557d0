//! Pre-delivery checks on versions.
//!
//! Failed checks are data: every problem of a version is collected into a
//! diagnostic list and reported through the observer. Nothing here
//! returns an error for a failing version.

use std::path::Path;

use crate::entity::Entity;
use crate::events::{report_error, report_message, DeliveryObserver};
use crate::frames;
use crate::version::Version;

pub const VALIDATION_PASSED: &str = "Initial validation checks passed!";

/// Required database fields and the published file link.
pub fn validate_fields(version: &Version) -> Vec<String> {
    let mut errors = Vec::new();

    if version.first_frame.map_or(true, |f| f < 0) {
        errors.push("The sg_first_frame field on this version is empty or invalid.".to_string());
    }
    if version.last_frame.map_or(true, |f| f < 0) {
        errors.push("The sg_last_frame field on this version is empty or invalid.".to_string());
    }
    if version.fps.is_none() {
        errors.push("The sg_uploaded_movie_frame_rate field on this version is empty.".to_string());
    }

    match version.path_to_movie.as_deref() {
        None | Some("") => {
            errors.push("The path_to_movie field on this version is empty.".to_string());
        }
        Some(movie) if !Path::new(movie).is_file() => {
            errors.push(
                "The path_to_movie field on this version points to a nonexistent file.".to_string(),
            );
        }
        Some(_) => {}
    }

    if version.deliver_sequence {
        match version.sequence_path.as_deref() {
            None | Some("") => errors.push("The published file(path) is empty.".to_string()),
            Some(path) => {
                if path.ends_with(".mov") {
                    errors.push(
                        "Linked version file on this version is a reference MOV, not an EXR sequence."
                            .to_string(),
                    );
                }
                if version.version_number.map_or(true, |n| n < 0) {
                    errors.push("The linked published file doesn't have a version.".to_string());
                }
            }
        }
    }

    errors
}

/// Check every frame in `[first_frame, last_frame)` exists on disk.
pub fn validate_all_frames_exist(version: &Version) -> Vec<String> {
    let Some((first, last)) = version.frame_range() else {
        return vec![
            "Shot version is missing frame range data (sg_first_frame, sg_last_frame).".to_string(),
        ];
    };
    let sequence_path = version.sequence_path.as_deref().unwrap_or_default();

    let mut errors = Vec::new();
    for frame in first..last {
        let Some(frame_path) = frames::format_frame(sequence_path, frame) else {
            return vec!["Could not format filepath. Are the EXRs correctly linked?".to_string()];
        };
        if !Path::new(&frame_path).is_file() {
            errors.push(format!("Can't find frame {frame}."));
        }
    }
    errors
}

/// All diagnostics for one version. Empty means the version passed.
pub fn validate_version(version: &Version) -> Vec<String> {
    let mut errors = validate_fields(version);
    if version.deliver_sequence && errors.is_empty() {
        errors.extend(validate_all_frames_exist(version));
    }
    errors
}

/// Validate every version of `entity`, reporting each outcome. Returns
/// whether all versions passed.
pub fn validate_entity(entity: &mut Entity, observer: &dyn DeliveryObserver) -> bool {
    match entity.sequence() {
        Some(sequence) => tracing::info!(sequence, shot = %entity.code, "Validating shot"),
        None => tracing::info!(asset = %entity.code, "Validating asset"),
    }

    let entity_type = entity.entity_type();
    let entity_code = entity.code.clone();
    let mut success = true;

    for version in entity.versions_mut() {
        let errors = validate_version(version);
        if errors.is_empty() {
            tracing::info!(version_id = version.id, "Validation passed");
            version.validation_error.clear();
            report_message(observer, version, VALIDATION_PASSED);
            continue;
        }

        success = false;
        tracing::error!(
            version_id = version.id,
            version = %version.code,
            entity_type,
            entity = %entity_code,
            errors = ?errors,
            "Version failed validation",
        );
        report_error(observer, version, errors.join("\n"));
    }

    success
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::events::DeliveryEvent;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DeliveryEvent>>);

    impl DeliveryObserver for Recorder {
        fn notify(&self, event: DeliveryEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn valid_version(dir: &Path) -> Version {
        let movie = dir.join("sh010_v003.mov");
        std::fs::write(&movie, b"").unwrap();
        for frame in 1001..=1003 {
            std::fs::write(dir.join(format!("sh010_v003.{frame:04}.exr")), b"").unwrap();
        }

        let mut version = Version::new(7, "sh010_comp_v003");
        version.first_frame = Some(1001);
        version.last_frame = Some(1003);
        version.fps = Some(24.0);
        version.version_number = Some(3);
        version.path_to_movie = Some(movie.to_string_lossy().into_owned());
        version.sequence_path = Some(dir.join("sh010_v003.%04d.exr").to_string_lossy().into_owned());
        version
    }

    #[test]
    fn complete_version_passes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_version(&valid_version(dir.path())).is_empty());
    }

    #[test]
    fn field_errors_are_collected() {
        let mut version = Version::new(1, "empty");
        version.first_frame = Some(-1);
        let errors = validate_fields(&version);
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&"The published file(path) is empty.".to_string()));
    }

    #[test]
    fn reference_movie_and_missing_version_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut version = valid_version(dir.path());
        version.sequence_path = Some("/renders/sh010_v003.mov".to_string());
        version.version_number = None;

        let errors = validate_fields(&version);
        assert_eq!(
            errors,
            vec![
                "Linked version file on this version is a reference MOV, not an EXR sequence.",
                "The linked published file doesn't have a version.",
            ]
        );
    }

    #[test]
    fn frame_sweep_excludes_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plate.0010.exr"), b"").unwrap();

        let mut version = Version::new(2, "plate");
        version.first_frame = Some(10);
        version.last_frame = Some(12);
        version.sequence_path = Some(dir.path().join("plate.%04d.exr").to_string_lossy().into_owned());

        assert_eq!(validate_all_frames_exist(&version), vec!["Can't find frame 11."]);
    }

    #[test]
    fn unformattable_sequence_path_reports_once() {
        let mut version = Version::new(2, "plate");
        version.first_frame = Some(1);
        version.last_frame = Some(5);
        version.sequence_path = Some("/renders/plate.exr".to_string());

        assert_eq!(
            validate_all_frames_exist(&version),
            vec!["Could not format filepath. Are the EXRs correctly linked?"]
        );
    }

    #[test]
    fn preview_only_versions_skip_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut version = valid_version(dir.path());
        version.deliver_sequence = false;
        version.sequence_path = None;
        assert!(validate_version(&version).is_empty());
    }

    #[test]
    fn validate_entity_reports_each_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut shot = Entity::new_shot(1, "sh010", "sq01", None, "prj");
        shot.add_version(valid_version(dir.path()));
        shot.add_version(Version::new(8, "broken"));

        let recorder = Recorder::default();
        assert!(!validate_entity(&mut shot, &recorder));

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(
            e,
            DeliveryEvent::ValidationMessage { version_id: 7, message } if message == VALIDATION_PASSED
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, DeliveryEvent::ValidationError { version_id: 8, .. })));
    }

    #[test]
    fn passing_again_clears_the_previous_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut shot = Entity::new_shot(1, "sh010", "sq01", None, "prj");
        let mut version = valid_version(dir.path());
        version.path_to_movie = None;
        shot.add_version(version);

        let recorder = Recorder::default();
        assert!(!validate_entity(&mut shot, &recorder));
        assert!(!shot.versions()[0].validation_error.is_empty());

        let movie = dir.path().join("sh010_v003.mov").to_string_lossy().into_owned();
        shot.versions_mut()[0].path_to_movie = Some(movie);
        assert!(validate_entity(&mut shot, &recorder));
        assert_eq!(shot.versions()[0].validation_error, "");
        assert_eq!(shot.versions()[0].validation_message, VALIDATION_PASSED);
    }
}
