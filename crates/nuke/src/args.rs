//! Command lines of the render scripts.
//!
//! Both scripts run through the renderer's terminal mode (`-t <script>`).
//! The preview script transcodes a movie and burns in a slate. The plate
//! script rerenders a frame sequence, optionally adding a slate frame or
//! rendering only that frame.

use std::path::Path;

use delivery_core::outputs::Letterbox;
use delivery_core::settings::RendererConfig;
use delivery_core::types::FrameNumber;

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Frame rates are passed with at least one decimal (`24.0`, `23.976`).
fn fps_arg(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{fps:.1}")
    } else {
        fps.to_string()
    }
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PreviewArgs<'a> {
    pub renderer: &'a RendererConfig,
    pub first_frame: FrameNumber,
    pub last_frame: FrameNumber,
    pub fps: f64,
    pub movie: &'a Path,
    pub output: &'a Path,
    pub idt: &'a str,
    pub odt: &'a str,
    /// JSON write settings of the preview output.
    pub write_settings: String,
    /// JSON slate payload.
    pub slate_data: String,
    pub timecode_ref: Option<&'a Path>,
    pub letterbox: Option<Letterbox>,
    pub new_submission_note: bool,
}

impl PreviewArgs<'_> {
    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            path_arg(&self.renderer.slate_script),
            self.first_frame.to_string(),
            self.last_frame.to_string(),
            fps_arg(self.fps),
            path_arg(self.movie),
            path_arg(self.output),
            path_arg(&self.renderer.logo_path),
            "-idt".to_string(),
            self.idt.to_string(),
            "-odt".to_string(),
            self.odt.to_string(),
            "--font-path".to_string(),
            path_arg(&self.renderer.font_path),
            "--font-bold-path".to_string(),
            path_arg(&self.renderer.font_bold_path),
            "--write-settings".to_string(),
            self.write_settings.clone(),
            "--slate-data".to_string(),
            self.slate_data.clone(),
        ];

        if let Some(timecode_ref) = self.timecode_ref {
            args.push(crate::process::TIMECODE_REF_FLAG.to_string());
            args.push(path_arg(timecode_ref));
        }
        if let Some(letterbox) = &self.letterbox {
            args.push("--letterbox".to_string());
            args.push(letterbox.to_string());
        }
        if self.new_submission_note {
            args.push("--new-submission-note".to_string());
        }
        args
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// Slate options of a plate render.
#[derive(Debug, Clone)]
pub struct SequenceSlate<'a> {
    pub colorspace: &'a str,
    pub slate_data: String,
    /// Render only the slate frame, the plate frames are transferred.
    pub slate_only: bool,
}

#[derive(Debug, Clone)]
pub struct SequenceArgs<'a> {
    pub renderer: &'a RendererConfig,
    /// First frame to render, already past any source slate frame.
    pub first_frame: FrameNumber,
    pub last_frame: FrameNumber,
    pub source: &'a str,
    pub destination: &'a Path,
    pub write_settings: Option<String>,
    pub slate: Option<SequenceSlate<'a>>,
}

impl SequenceArgs<'_> {
    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            path_arg(&self.renderer.plate_script),
            self.first_frame.to_string(),
            self.last_frame.to_string(),
            self.source.to_string(),
            path_arg(self.destination),
        ];

        if let Some(settings) = &self.write_settings {
            args.push("--write-settings".to_string());
            args.push(settings.clone());
        }

        if let Some(slate) = &self.slate {
            args.extend([
                "--logo-path".to_string(),
                path_arg(&self.renderer.logo_path),
                "-odt".to_string(),
                slate.colorspace.to_string(),
                "--slate-data".to_string(),
                slate.slate_data.clone(),
                "--font-path".to_string(),
                path_arg(&self.renderer.font_path),
                "--font-bold-path".to_string(),
                path_arg(&self.renderer.font_bold_path),
            ]);
            if slate.slate_only {
                args.push("--slate-only".to_string());
            }
        }
        args
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn renderer() -> RendererConfig {
        RendererConfig {
            nuke_path: PathBuf::from("/opt/nuke/Nuke"),
            slate_script: PathBuf::from("/tools/slate.py"),
            plate_script: PathBuf::from("/tools/plate.py"),
            logo_path: PathBuf::from("/tools/logo.png"),
            font_path: PathBuf::from("/tools/font.ttf"),
            font_bold_path: PathBuf::from("/tools/font-bold.ttf"),
        }
    }

    #[test]
    fn preview_command_line() {
        let renderer = renderer();
        let args = PreviewArgs {
            renderer: &renderer,
            first_frame: 1001,
            last_frame: 1010,
            fps: 24.0,
            movie: Path::new("/shots/sh010.mov"),
            output: Path::new("/out/sh010.mov"),
            idt: "ACES",
            odt: "Rec709",
            write_settings: r#"{"file_type":"mov"}"#.to_string(),
            slate_data: "{}".to_string(),
            timecode_ref: Some(Path::new("/shots/sh010.%04d.exr")),
            letterbox: Some(Letterbox {
                width: 2.39,
                height: 1.0,
                opacity: 0.5,
            }),
            new_submission_note: true,
        }
        .build();

        assert_eq!(
            &args[..8],
            [
                "-t",
                "/tools/slate.py",
                "1001",
                "1010",
                "24.0",
                "/shots/sh010.mov",
                "/out/sh010.mov",
                "/tools/logo.png"
            ]
        );
        assert_eq!(
            &args[args.len() - 5..],
            [
                "--timecode-ref",
                "/shots/sh010.%04d.exr",
                "--letterbox",
                "2.39:1/0.5",
                "--new-submission-note"
            ]
        );
    }

    #[test]
    fn preview_without_optional_flags() {
        let renderer = renderer();
        let args = PreviewArgs {
            renderer: &renderer,
            first_frame: 1,
            last_frame: 2,
            fps: 23.976,
            movie: Path::new("a.mov"),
            output: Path::new("b.mov"),
            idt: "",
            odt: "",
            write_settings: "{}".to_string(),
            slate_data: "{}".to_string(),
            timecode_ref: None,
            letterbox: None,
            new_submission_note: false,
        }
        .build();

        assert_eq!(args.len(), 20);
        assert_eq!(args[4], "23.976");
        assert_eq!(args.last().map(String::as_str), Some("{}"));
    }

    #[test]
    fn sequence_command_line() {
        let renderer = renderer();
        let base = SequenceArgs {
            renderer: &renderer,
            first_frame: 1002,
            last_frame: 1010,
            source: "/shots/sh010.%04d.exr",
            destination: Path::new("/out/sh010.%04d.exr"),
            write_settings: None,
            slate: None,
        };
        assert_eq!(
            base.build(),
            [
                "-t",
                "/tools/plate.py",
                "1002",
                "1010",
                "/shots/sh010.%04d.exr",
                "/out/sh010.%04d.exr"
            ]
        );

        let slate_only = SequenceArgs {
            write_settings: Some(r#"{"compression":"dwaa"}"#.to_string()),
            slate: Some(SequenceSlate {
                colorspace: "ACEScg",
                slate_data: "{}".to_string(),
                slate_only: true,
            }),
            ..base
        }
        .build();

        assert_eq!(slate_only[6], "--write-settings");
        assert!(slate_only.contains(&"ACEScg".to_string()));
        assert_eq!(slate_only.last().map(String::as_str), Some("--slate-only"));
    }
}
