//! Footage format records: resolution, crop margins and role.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntityId, Record};

/// Role of a footage format in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FootageFormatType {
    #[serde(rename = "Input Online")]
    InputOnline,
    #[serde(rename = "Input Offline")]
    InputOffline,
    #[serde(rename = "Input Other")]
    InputOther,
    #[serde(rename = "Output Render")]
    OutputRender,
    #[serde(rename = "Output Preview")]
    OutputPreview,
    #[serde(rename = "Output Other")]
    OutputOther,
    #[serde(rename = "Delivery")]
    Delivery,
}

impl FootageFormatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputOnline => "Input Online",
            Self::InputOffline => "Input Offline",
            Self::InputOther => "Input Other",
            Self::OutputRender => "Output Render",
            Self::OutputPreview => "Output Preview",
            Self::OutputOther => "Output Other",
            Self::Delivery => "Delivery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::InputOnline,
            Self::InputOffline,
            Self::InputOther,
            Self::OutputRender,
            Self::OutputPreview,
            Self::OutputOther,
            Self::Delivery,
        ]
        .into_iter()
        .find(|t| t.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootageFormat {
    pub id: Option<EntityId>,
    pub name: Option<String>,
    pub footage_type: FootageFormatType,
    pub resolution: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// `"x,y"` for per-axis margins or a single number for both.
    pub crop: Option<String>,
    pub aspect_ratio: Option<String>,
    pub pixel_aspect_ratio: Option<String>,
    pub frame_rate: Option<String>,
    pub video_bit_depth: Option<String>,
    pub video_codec: Option<String>,
}

impl FootageFormat {
    pub fn new(footage_type: FootageFormatType, resolution: Option<String>) -> Self {
        let mut format = Self {
            id: None,
            name: None,
            footage_type,
            resolution: None,
            width: None,
            height: None,
            crop: None,
            aspect_ratio: None,
            pixel_aspect_ratio: None,
            frame_rate: None,
            video_bit_depth: None,
            video_codec: None,
        };
        format.set_resolution(resolution);
        format
    }

    /// Parse `"WxH"` into width and height. An unparsable resolution is
    /// logged and leaves the dimensions unset.
    pub fn set_resolution(&mut self, resolution: Option<String>) {
        self.width = None;
        self.height = None;

        if let Some(res) = resolution.as_deref() {
            match parse_resolution(res) {
                Some((w, h)) => {
                    self.width = Some(w);
                    self.height = Some(h);
                    if self.aspect_ratio.is_none() && h != 0 {
                        self.aspect_ratio = Some(format!("{:.2}", w as f64 / h as f64));
                    }
                }
                None => tracing::error!(
                    resolution = res,
                    "An error occurred while creating a footage format: invalid resolution",
                ),
            }
        }

        self.resolution = resolution;
    }

    /// Crop margins `(x, y)`. Absent or unparsable crop means no crop.
    pub fn crop(&self) -> (i64, i64) {
        let Some(crop) = self.crop.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            return (0, 0);
        };

        match crop.split_once(',') {
            Some((x, y)) => (
                x.trim().parse().unwrap_or(0),
                y.trim().parse().unwrap_or(0),
            ),
            None => {
                let both = crop.parse().unwrap_or(0);
                (both, both)
            }
        }
    }

    /// Build a footage format from a database record using the configured
    /// `attribute -> database field` mapping.
    pub fn from_record(
        mapping: &BTreeMap<String, String>,
        record: &Record,
    ) -> Result<Self, CoreError> {
        let field = |attribute: &str| -> Option<String> {
            let name = mapping.get(attribute)?;
            match record.get(name)? {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        };

        let type_name = field("footage_type").ok_or_else(|| {
            CoreError::Validation("Footage format has no footage type".to_string())
        })?;
        let footage_type = FootageFormatType::parse(&type_name).ok_or_else(|| {
            CoreError::Validation(format!("Unknown footage format type: {type_name}"))
        })?;

        let mut format = Self::new(footage_type, None);
        format.id = record.get("id").and_then(|v| v.as_i64());
        format.name = record
            .get("code")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        format.crop = field("crop");
        format.aspect_ratio = field("aspect_ratio");
        format.pixel_aspect_ratio = field("pixel_aspect_ratio");
        format.frame_rate = field("frame_rate");
        format.video_bit_depth = field("video_bit_depth");
        format.video_codec = field("video_codec");
        format.set_resolution(field("resolution"));

        Ok(format)
    }
}

fn parse_resolution(res: &str) -> Option<(i64, i64)> {
    let (w, h) = res.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
