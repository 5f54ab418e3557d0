use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The renderer could not check out a license.
    #[error("A license for nuke was not found: {0}")]
    License(String),

    /// The renderer wrote to standard error or exited unsuccessfully.
    #[error("Render failed: {0}")]
    Failed(String),

    #[error("Failed to start renderer {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Render was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
