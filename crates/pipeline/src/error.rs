use std::io;
use std::path::{Path, PathBuf};

use delivery_core::error::CoreError;
use delivery_core::manifest::ManifestError;
use delivery_nuke::RenderError;
use delivery_shotgrid::ShotGridError;

/// Shown when a destination file is already there.
pub const FILE_EXISTS_MESSAGE: &str = "Files already exist. Has this shot been exported before?";

/// Shown when the renderer could not check out a license.
pub const LICENSE_MESSAGE: &str = "A Nuke license error occurred!";

/// Shown for every other delivery failure.
pub const GENERIC_MESSAGE: &str = "An error occurred while making the delivery, please check logs!";

/// Failure of one version delivery. Contained per version by the export.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    ShotGrid(#[from] ShotGridError),

    #[error("Failed to download attachment from {url}: {source}")]
    Download { url: String, source: reqwest::Error },

    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error("Delivery was cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Map an I/O failure on `path`. An existing destination becomes
    /// [`DeliveryError::FileExists`].
    pub fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                Self::FileExists(path.to_path_buf())
            } else {
                Self::Io {
                    action,
                    path: path.to_path_buf(),
                    source,
                }
            }
        }
    }

    /// Whether the delivery stopped because the export was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Render(RenderError::Cancelled))
    }

    /// Message reported on the version.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::FileExists(_) => FILE_EXISTS_MESSAGE,
            Self::Render(RenderError::License(_)) => LICENSE_MESSAGE,
            _ => GENERIC_MESSAGE,
        }
    }
}

/// Failure of the export batch as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed to create delivery folder {path}: {source}")]
    CreateFolder { path: PathBuf, source: io::Error },

    #[error("Export was cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn already_exists_maps_to_file_exists() {
        let path = Path::new("/out/sh010.1001.exr");
        let err = DeliveryError::io("link", path)(io::Error::from(io::ErrorKind::AlreadyExists));
        assert_matches!(&err, DeliveryError::FileExists(p) if p == path);
        assert_eq!(err.user_message(), FILE_EXISTS_MESSAGE);

        let err = DeliveryError::io("copy", path)(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_matches!(err, DeliveryError::Io { action: "copy", .. });
    }

    #[test]
    fn user_messages() {
        let license = DeliveryError::Render(RenderError::License("no license".into()));
        assert_eq!(license.user_message(), LICENSE_MESSAGE);

        let failed = DeliveryError::Render(RenderError::Failed("boom".into()));
        assert_eq!(failed.user_message(), GENERIC_MESSAGE);
        assert_eq!(DeliveryError::Cancelled.user_message(), GENERIC_MESSAGE);
        assert!(DeliveryError::Render(RenderError::Cancelled).is_cancelled());
        assert!(!failed.is_cancelled());
    }
}
