use std::path::PathBuf;

use delivery_core::types::EntityId;

/// Errors from the production database layer.
#[derive(Debug, thiserror::Error)]
pub enum ShotGridError {
    /// The database rejected or failed a request.
    #[error("ShotGrid request failed: {0}")]
    Request(String),

    #[error("{entity_type} with id {id} does not exist")]
    NotFound { entity_type: String, id: EntityId },

    #[error("Unknown entity type \"{0}\"")]
    UnknownEntityType(String),

    #[error("Failed to read snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
