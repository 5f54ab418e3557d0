//! Decide whether a published frame sequence can be delivered as-is.

use serde::Serialize;

use crate::exr::ExrHeader;
use crate::outputs::SequenceOutput;

/// How a sequence delivery is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequenceAction {
    /// Link or copy the published frames.
    Transfer,
    /// Render every frame again through the renderer.
    Rerender,
    /// Transfer the frames, then render only the slate frame.
    SlateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RerenderDecision {
    pub rerender: bool,
    pub add_slate: bool,
}

impl RerenderDecision {
    pub fn action(&self) -> SequenceAction {
        match (self.rerender, self.add_slate) {
            (true, _) => SequenceAction::Rerender,
            (false, true) => SequenceAction::SlateOnly,
            (false, false) => SequenceAction::Transfer,
        }
    }

    /// Whether the renderer has to run at all.
    pub fn needs_render(&self) -> bool {
        self.rerender || self.add_slate
    }
}

/// Whether the source compression satisfies `requested`.
///
/// Case-insensitive substring match against the raw tag without its
/// `_COMPRESSION` suffix, and against the friendly name.
pub fn compression_matches(header: &ExrHeader, requested: &str) -> bool {
    let requested = requested.to_lowercase();
    let tag = header
        .compression_tag()
        .map(|tag| tag.replace("_COMPRESSION", "").to_lowercase())
        .unwrap_or_default();
    let friendly = header.compression_name().unwrap_or("unknown").to_lowercase();

    (!tag.is_empty() && tag.contains(&requested)) || friendly.contains(&requested)
}

/// Decide for a source sequence whose first-frame header is `header`.
///
/// Only a compression-only policy whose compression already matches
/// permits reuse. Without a matched policy the frames are reused. A
/// header without a compression attribute does not force a rerender.
pub fn decide(
    output: Option<&SequenceOutput>,
    header: Option<&ExrHeader>,
    remove_alpha: bool,
    add_slate: bool,
) -> RerenderDecision {
    let mut rerender = false;

    if let Some(output) = output {
        if output.is_compression_only() {
            if let Some(header) = header.filter(|h| h.compression_code.is_some()) {
                if compression_matches(header, output.compression()) {
                    tracing::info!(output = %output.name, "Source compression matches");
                } else {
                    tracing::info!(
                        output = %output.name,
                        source = header.compression_tag().unwrap_or("unknown"),
                        "Source compression differs",
                    );
                    rerender = true;
                }
            }
        } else {
            rerender = true;
        }
    }

    if remove_alpha && header.is_some_and(|h| h.has_channel("A")) {
        tracing::info!("Source has an alpha channel");
        rerender = true;
    }

    RerenderDecision {
        rerender,
        add_slate,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::exr::{Channel, PixelType};

    fn output(settings: Value) -> SequenceOutput {
        SequenceOutput {
            name: "Delivery EXR".to_string(),
            extension: "exr".to_string(),
            status: "dlvr".to_string(),
            settings: settings.as_object().cloned().unwrap(),
        }
    }

    fn header(code: u8, channels: &[&str]) -> ExrHeader {
        ExrHeader {
            compression_code: Some(code),
            channels: channels
                .iter()
                .map(|name| Channel {
                    name: name.to_string(),
                    pixel_type: PixelType::Half,
                })
                .collect(),
        }
    }

    #[test]
    fn matching_compression_is_reused() {
        let dwaa = output(json!({"compression": "dwaa"}));
        let decision = decide(Some(&dwaa), Some(&header(8, &["R", "G", "B"])), true, false);
        assert_eq!(decision.action(), SequenceAction::Transfer);
    }

    #[test]
    fn different_compression_rerenders() {
        let dwaa = output(json!({"compression": "DWAA"}));
        let decision = decide(Some(&dwaa), Some(&header(3, &["R", "G", "B"])), true, false);
        assert_eq!(decision.action(), SequenceAction::Rerender);
    }

    #[test]
    fn friendly_name_match() {
        assert!(compression_matches(&header(3, &[]), "zip (16"));
        assert!(compression_matches(&header(0, &[]), "uncompressed"));
        assert!(!compression_matches(&header(4, &[]), "zip"));
    }

    #[test]
    fn policies_beyond_compression_always_rerender() {
        let policy = output(json!({"compression": "dwaa", "datatype": "16 bit half"}));
        let decision = decide(Some(&policy), Some(&header(8, &["R"])), false, false);
        assert!(decision.rerender);
    }

    #[test]
    fn no_policy_transfers() {
        let decision = decide(None, Some(&header(3, &["R"])), false, false);
        assert_eq!(decision.action(), SequenceAction::Transfer);
    }

    #[test]
    fn alpha_channel_forces_rerender() {
        let decision = decide(None, Some(&header(3, &["A", "B", "G", "R"])), true, false);
        assert!(decision.rerender);

        let decision = decide(None, Some(&header(3, &["A", "B", "G", "R"])), false, false);
        assert!(!decision.rerender);
    }

    #[test]
    fn forced_slate_renders_slate_only() {
        let decision = decide(None, Some(&header(3, &["R"])), false, true);
        assert_eq!(decision.action(), SequenceAction::SlateOnly);
        assert!(decision.needs_render());
    }
}
