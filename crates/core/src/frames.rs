//! Frame-sequence path helpers.
//!
//! Sequence paths carry a single printf-style frame placeholder such as
//! `shot010_v003.%04d.exr`. These helpers substitute concrete frame
//! numbers or a literal `[first-last]` range into that placeholder.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::FrameNumber;

static FRAME_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%0?(\d*)d").expect("valid regex"));

static PADDED_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%0(\d)d").expect("valid regex"));

/// Whether `path` contains a frame placeholder.
pub fn has_frame_placeholder(path: &str) -> bool {
    FRAME_PLACEHOLDER.is_match(path)
}

/// Substitute `frame` into the first placeholder of `path`.
///
/// Returns `None` when the path has no placeholder, which callers treat as
/// a malformed sequence link.
pub fn format_frame(path: &str, frame: FrameNumber) -> Option<String> {
    let caps = FRAME_PLACEHOLDER.captures(path)?;
    let whole = caps.get(0)?;
    let width: usize = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);

    let rendered = if frame < 0 {
        format!("-{:0width$}", frame.unsigned_abs(), width = width.saturating_sub(1))
    } else {
        format!("{frame:0width$}")
    };

    let mut out = String::with_capacity(path.len() + rendered.len());
    out.push_str(&path[..whole.start()]);
    out.push_str(&rendered);
    out.push_str(&path[whole.end()..]);
    Some(out)
}

/// Replace a zero-padded placeholder (`%04d`) with `[first-last]`.
///
/// Names without such a placeholder are returned unchanged.
pub fn ranged_name(name: &str, first: FrameNumber, last: FrameNumber) -> String {
    match PADDED_PLACEHOLDER.find(name) {
        Some(m) => name.replacen(m.as_str(), &format!("[{first}-{last}]"), 1),
        None => name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
