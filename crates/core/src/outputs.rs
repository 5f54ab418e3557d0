//! Configured render outputs and the letterbox overlay.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

static BIT_DEPTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+) *-?bit").expect("valid regex"));

fn default_true() -> bool {
    true
}

/// A movie output rendered for preview deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewOutput {
    pub name: String,
    pub extension: String,
    pub default_enabled: bool,
    pub settings: Map<String, Value>,
    #[serde(default = "default_true")]
    pub use_letterbox: bool,
}

impl PreviewOutput {
    /// Write settings for the renderer, tagged with the file type.
    pub fn to_cli_string(&self) -> String {
        cli_string(&self.settings, &self.extension)
    }

    /// First `N-bit` mention in the string settings values, if any.
    pub fn bit_depth_hint(&self) -> Option<String> {
        self.settings
            .values()
            .filter_map(Value::as_str)
            .find_map(|value| BIT_DEPTH_RE.captures(value))
            .map(|caps| format!("{}-bit", &caps[1]))
    }
}

/// Frame sequence output policy, selected by a version's output status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceOutput {
    pub name: String,
    pub extension: String,
    pub status: String,
    pub settings: Map<String, Value>,
}

impl SequenceOutput {
    pub fn to_cli_string(&self) -> String {
        cli_string(&self.settings, &self.extension)
    }

    /// Requested compression, empty when unspecified.
    pub fn compression(&self) -> &str {
        self.settings
            .get("compression")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Requested bit depth, checking the key spellings used in configs.
    pub fn bit_depth(&self) -> &str {
        ["bit_depth", "data_type", "datatype"]
            .iter()
            .filter_map(|key| self.settings.get(*key).and_then(Value::as_str))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }

    /// Whether the only constraint of this policy is compression.
    pub fn is_compression_only(&self) -> bool {
        self.settings.len() == 1 && self.settings.contains_key("compression")
    }
}

fn cli_string(settings: &Map<String, Value>, extension: &str) -> String {
    let mut merged = settings.clone();
    merged.insert("file_type".to_string(), Value::String(extension.to_string()));
    Value::Object(merged).to_string()
}

/// First sequence output whose status matches.
pub fn find_sequence_output<'a>(
    outputs: &'a [SequenceOutput],
    status: &str,
) -> Option<&'a SequenceOutput> {
    outputs.iter().find(|o| o.status == status)
}

/// Keep at most one output per extension.
///
/// Outputs are walked in reverse and the first one seen per extension
/// wins, so the last configured output of an extension survives. The
/// result keeps the reversed walk order.
pub fn dedup_preview_outputs(outputs: &[PreviewOutput]) -> Vec<PreviewOutput> {
    let mut kept: Vec<PreviewOutput> = Vec::new();
    for output in outputs.iter().rev() {
        if !kept.iter().any(|o| o.extension == output.extension) {
            kept.push(output.clone());
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// Letterbox
// ---------------------------------------------------------------------------

/// Aspect-ratio overlay burned into previews.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    pub width: f64,
    pub height: f64,
    pub opacity: f64,
}

impl fmt::Display for Letterbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.width, self.height, self.opacity)
    }
}

impl FromStr for Letterbox {
    type Err = CoreError;

    /// Parses the command-line form `W:H/O`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Configuration(format!("Invalid letterbox \"{s}\", expected W:H/O"));

        let (ratio, opacity) = s.trim().split_once('/').ok_or_else(invalid)?;
        let (width, height) = ratio.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            width: width.trim().parse().map_err(|_| invalid())?,
            height: height.trim().parse().map_err(|_| invalid())?,
            opacity: opacity.trim().parse().map_err(|_| invalid())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
