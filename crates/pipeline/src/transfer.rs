//! Frame transfer for sequences delivered without rerendering.
//!
//! Frames are hard-linked when source and destination live on the same
//! volume, and copied otherwise.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use delivery_core::error::CoreError;
use delivery_core::frames::format_frame;
use delivery_core::types::FrameNumber;
use delivery_nuke::RenderObserver;

use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Link,
    Copy,
}

/// Link when both paths resolve to the same volume.
pub async fn transfer_mode(source: &Path, destination: &Path) -> TransferMode {
    if same_volume(source, destination).await {
        TransferMode::Link
    } else {
        TransferMode::Copy
    }
}

/// Transfer frames `first..=last` of `source` to `destination`, both
/// frame-sequence paths. Progress runs from 0 at the first frame to 1 at
/// the last.
pub async fn transfer_frames(
    source: &str,
    destination: &Path,
    first: FrameNumber,
    last: FrameNumber,
    observer: &mut dyn RenderObserver,
    cancel: &CancellationToken,
) -> Result<TransferMode, DeliveryError> {
    let mode = transfer_mode(Path::new(source), destination).await;
    tracing::info!(?mode, source, destination = %destination.display(), first, last, "Transferring frames");
    transfer_frames_with(mode, source, destination, first, last, observer, cancel).await?;
    Ok(mode)
}

pub(crate) async fn transfer_frames_with(
    mode: TransferMode,
    source: &str,
    destination: &Path,
    first: FrameNumber,
    last: FrameNumber,
    observer: &mut dyn RenderObserver,
    cancel: &CancellationToken,
) -> Result<(), DeliveryError> {
    let destination = destination.to_string_lossy();
    let invalid = |path: &str| CoreError::Validation(format!("Invalid frame sequence path: {path}"));

    for frame in first..=last {
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }

        let from = format_frame(source, frame).ok_or_else(|| invalid(source))?;
        let to = format_frame(&destination, frame).ok_or_else(|| invalid(&*destination))?;
        let to = Path::new(&to);

        match mode {
            TransferMode::Link => tokio::fs::hard_link(&from, to)
                .await
                .map_err(DeliveryError::io("link", to))?,
            TransferMode::Copy => {
                tokio::fs::copy(&from, to)
                    .await
                    .map_err(DeliveryError::io("copy", to))?;
            }
        }

        let progress = if last > first {
            (frame - first) as f64 / (last - first) as f64
        } else {
            1.0
        };
        observer.progress(progress);
    }

    Ok(())
}

/// Metadata of the closest existing ancestor of `path`.
async fn closest_metadata(path: &Path) -> Option<std::fs::Metadata> {
    for ancestor in path.ancestors().skip(1) {
        if let Ok(metadata) = tokio::fs::metadata(ancestor).await {
            return Some(metadata);
        }
    }
    None
}

#[cfg(unix)]
async fn same_volume(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (closest_metadata(a).await, closest_metadata(b).await) {
        (Some(a), Some(b)) => a.dev() == b.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
async fn same_volume(a: &Path, b: &Path) -> bool {
    if closest_metadata(a).await.is_none() || closest_metadata(b).await.is_none() {
        return false;
    }
    a.components().next() == b.components().next()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
