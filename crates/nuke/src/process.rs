//! One render job of the external renderer.
//!
//! The renderer reports progress on standard output as
//! `Frame <n> (<i> of <total>)` lines. Anything written to standard error
//! fails the job, except an invalid start timecode on the timecode
//! reference: the job is then restarted once without `--timecode-ref`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::RenderError;

/// Printed by the renderer when no license is available.
pub const LICENSE_MARKER: &str = "A license for nuke was not found";

pub const TIMECODE_REF_FLAG: &str = "--timecode-ref";

const INVALID_TIMECODE: &str = "AddTimeCode: Invalid start time code";

/// Maximum standard error captured per run (1 MiB).
const MAX_ERROR_BYTES: u64 = 1024 * 1024;

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*Frame ([0-9]+) \(([0-9]+) of ([0-9]+)\)").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    NotStarted,
    Started,
    Rendering,
    Done,
    Failed,
}

/// Receives the state changes of a render job.
pub trait RenderObserver: Send {
    fn message(&mut self, message: &str);
    fn error(&mut self, message: &str);
    /// Fraction of the job done, `0.0..=1.0`.
    fn progress(&mut self, progress: f64);
}

/// Progress reported by one output line, as `(current, total)`.
pub fn parse_progress(line: &str) -> Option<(u64, u64)> {
    let caps = PROGRESS_RE.captures(line)?;
    let current = caps[2].parse().ok()?;
    let total = caps[3].parse().ok()?;
    Some((current, total))
}

/// `args` without the `--timecode-ref <path>` pair, if present.
pub fn strip_timecode_ref(args: &[String]) -> Option<Vec<String>> {
    let index = args.iter().position(|arg| arg == TIMECODE_REF_FLAG)?;
    let mut trimmed = args.to_vec();
    trimmed.drain(index..(index + 2).min(args.len()));
    Some(trimmed)
}

#[derive(Debug)]
pub struct NukeProcess {
    program: PathBuf,
    name: Option<String>,
    state: RenderState,
    error_output: String,
}

impl NukeProcess {
    pub fn new(program: impl Into<PathBuf>, name: Option<String>) -> Self {
        Self {
            program: program.into(),
            name,
            state: RenderState::NotStarted,
            error_output: String::new(),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    fn label(&self, verb: &str) -> String {
        match &self.name {
            Some(name) => format!("{verb} {name}"),
            None => verb.to_string(),
        }
    }

    /// Handle one line of standard output.
    pub fn handle_output(
        &mut self,
        line: &str,
        observer: &mut dyn RenderObserver,
    ) -> Result<(), RenderError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        tracing::debug!(output = line, "Renderer output");

        if self.state == RenderState::NotStarted {
            observer.message(&format!("{} render...", self.label("Starting")));
            observer.progress(0.0);
            self.state = RenderState::Started;
        }

        if line.contains(LICENSE_MARKER) {
            self.state = RenderState::Failed;
            observer.error(LICENSE_MARKER);
            return Err(RenderError::License(line.to_string()));
        }

        if let Some((current, total)) = parse_progress(line) {
            if self.state == RenderState::Started {
                observer.message(&format!("{}...", self.label("Rendering")));
                self.state = RenderState::Rendering;
            }
            if total > 0 {
                observer.progress(current as f64 / total as f64);
            }
        }

        Ok(())
    }

    fn reset(&mut self, observer: &mut dyn RenderObserver) {
        self.state = RenderState::NotStarted;
        self.error_output.clear();
        observer.progress(0.0);
    }

    /// Run the renderer with `args` until it exits.
    pub async fn run(
        &mut self,
        args: Vec<String>,
        observer: &mut dyn RenderObserver,
        cancel: &CancellationToken,
    ) -> Result<(), RenderError> {
        let mut args = args;
        let mut retried = false;

        loop {
            match self.run_once(&args, observer, cancel).await {
                Err(RenderError::Failed(stderr)) if !retried && stderr.contains(INVALID_TIMECODE) => {
                    let Some(trimmed) = strip_timecode_ref(&args) else {
                        return Err(RenderError::Failed(stderr));
                    };
                    let reference = args
                        .iter()
                        .position(|arg| arg == TIMECODE_REF_FLAG)
                        .and_then(|i| args.get(i + 1))
                        .map(String::as_str)
                        .unwrap_or_default();
                    tracing::error!(
                        timecode_ref = reference,
                        "Restarting render without timecode, the timecode ref didn't have a valid timecode",
                    );
                    self.reset(observer);
                    args = trimmed;
                    retried = true;
                }
                result => return result,
            }
        }
    }

    async fn run_once(
        &mut self,
        args: &[String],
        observer: &mut dyn RenderObserver,
        cancel: &CancellationToken,
    ) -> Result<(), RenderError> {
        tracing::debug!(program = %self.program.display(), ?args, "Starting renderer");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RenderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));
        let mut lines = child.stdout.take().map(|stdout| BufReader::new(stdout).lines());

        if let Some(lines) = lines.as_mut() {
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        self.state = RenderState::Failed;
                        return Err(RenderError::Cancelled);
                    }
                    line = lines.next_line() => line?,
                };
                let Some(line) = line else { break };
                if let Err(e) = self.handle_output(&line, observer) {
                    let _ = child.kill().await;
                    return Err(e);
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                self.state = RenderState::Failed;
                return Err(RenderError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr = stderr_task.await.unwrap_or_default();
        self.error_output
            .push_str(&String::from_utf8_lossy(&stderr));

        if !self.error_output.trim().is_empty() {
            self.state = RenderState::Failed;
            return Err(RenderError::Failed(self.error_output.clone()));
        }
        if !status.success() {
            tracing::warn!(program = %self.program.display(), code = ?status.code(), "Renderer exited non-zero without error output");
        }

        self.state = RenderState::Done;
        tracing::debug!(program = %self.program.display(), "Renderer finished");
        Ok(())
    }
}

/// Read an entire output stream, capped at [`MAX_ERROR_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_ERROR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        messages: Vec<String>,
        errors: Vec<String>,
        progress: Vec<f64>,
    }

    impl RenderObserver for Recorder {
        fn message(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }

        fn error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }

        fn progress(&mut self, progress: f64) {
            self.progress.push(progress);
        }
    }

    /// Write an executable fake renderer into `dir`.
    fn fake_renderer(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("nuke.sh");
        std::fs::write(&path, format!("#!/bin/bash\n{body}")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn progress_lines() {
        assert_eq!(parse_progress("Writing Write1 Frame 1001 (3 of 10)"), Some((3, 10)));
        assert_eq!(parse_progress("Frame 1001"), None);
    }

    #[test]
    fn timecode_ref_is_stripped() {
        let trimmed = strip_timecode_ref(&args(&["-t", "a", "--timecode-ref", "/tc", "--x"]));
        assert_eq!(trimmed, Some(args(&["-t", "a", "--x"])));
        assert_eq!(strip_timecode_ref(&args(&["-t"])), None);
    }

    #[test]
    fn state_transitions_report_once() {
        let mut process = NukeProcess::new("nuke", Some("MOV - ProRes".to_string()));
        let mut recorder = Recorder::default();

        process.handle_output("", &mut recorder).unwrap();
        assert_eq!(process.state(), RenderState::NotStarted);

        process.handle_output("Loading script", &mut recorder).unwrap();
        process.handle_output("Frame 1 (1 of 4)", &mut recorder).unwrap();
        process.handle_output("Frame 2 (2 of 4)", &mut recorder).unwrap();

        assert_eq!(process.state(), RenderState::Rendering);
        assert_eq!(
            recorder.messages,
            vec!["Starting MOV - ProRes render...", "Rendering MOV - ProRes..."]
        );
        assert_eq!(recorder.progress, vec![0.0, 0.25, 0.5]);
    }

    #[tokio::test]
    async fn run_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_renderer(
            &dir,
            "echo 'Frame 1001 (1 of 2)'\necho 'Frame 1002 (2 of 2)'\nexit 0\n",
        );
        let mut process = NukeProcess::new(program, None);
        let mut recorder = Recorder::default();

        process
            .run(args(&["-t", "slate.py"]), &mut recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(process.state(), RenderState::Done);
        assert_eq!(recorder.messages, vec!["Starting render...", "Rendering..."]);
        assert_eq!(recorder.progress, vec![0.0, 0.5, 1.0]);
    }

    #[tokio::test]
    async fn license_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_renderer(&dir, "echo 'A license for nuke was not found'\nsleep 10\n");
        let mut process = NukeProcess::new(program, None);
        let mut recorder = Recorder::default();

        let result = process
            .run(Vec::new(), &mut recorder, &CancellationToken::new())
            .await;

        assert_matches!(result, Err(RenderError::License(_)));
        assert_eq!(recorder.errors, vec![LICENSE_MARKER]);
        assert_eq!(process.state(), RenderState::Failed);
    }

    #[tokio::test]
    async fn standard_error_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_renderer(&dir, "echo 'Frame 1 (1 of 1)'\necho 'boom' >&2\n");
        let mut process = NukeProcess::new(program, None);

        let result = process
            .run(Vec::new(), &mut Recorder::default(), &CancellationToken::new())
            .await;

        assert_matches!(result, Err(RenderError::Failed(message)) if message.trim() == "boom");
    }

    #[tokio::test]
    async fn silent_non_zero_exit_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_renderer(&dir, "echo 'Frame 1 (1 of 1)'\nexit 3\n");
        let mut process = NukeProcess::new(program, None);

        process
            .run(Vec::new(), &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(process.state(), RenderState::Done);
    }

    #[tokio::test]
    async fn invalid_timecode_retries_once_without_reference() {
        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls");
        let program = fake_renderer(
            &dir,
            &format!(
                "echo \"$@\" >> '{}'\n\
                 for arg in \"$@\"; do\n\
                   if [ \"$arg\" = '--timecode-ref' ]; then\n\
                     echo 'AddTimeCode: Invalid start time code' >&2\n\
                     exit 1\n\
                   fi\n\
                 done\n\
                 echo 'Frame 1 (1 of 1)'\n",
                calls.display()
            ),
        );
        let mut process = NukeProcess::new(program, None);
        let mut recorder = Recorder::default();

        process
            .run(
                args(&["-t", "slate.py", "--timecode-ref", "/tc.%04d.exr"]),
                &mut recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let calls = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["-t slate.py --timecode-ref /tc.%04d.exr", "-t slate.py"]);
        assert_eq!(recorder.progress.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn invalid_timecode_is_not_retried_twice() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_renderer(&dir, "echo 'AddTimeCode: Invalid start time code' >&2\n");
        let mut process = NukeProcess::new(program, None);

        let result = process
            .run(
                args(&["--timecode-ref", "/tc"]),
                &mut Recorder::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_matches!(result, Err(RenderError::Failed(_)));
    }

    #[tokio::test]
    async fn cancellation_kills_the_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_renderer(&dir, "sleep 30\n");
        let mut process = NukeProcess::new(program, None);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            process.run(Vec::new(), &mut Recorder::default(), &cancel),
        )
        .await
        .expect("render should stop on cancel");

        assert_matches!(result, Err(RenderError::Cancelled));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let mut process = NukeProcess::new("/nonexistent/nuke", None);
        let result = process
            .run(Vec::new(), &mut Recorder::default(), &CancellationToken::new())
            .await;
        assert_matches!(result, Err(RenderError::Spawn { .. }));
    }
}
