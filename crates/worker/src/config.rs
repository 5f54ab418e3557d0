use std::path::PathBuf;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Studio delivery settings file.
    pub settings_path: PathBuf,
    /// Production database snapshot to deliver from.
    pub snapshot_path: PathBuf,
    pub project_id: i64,
    /// Explicit delivery folder number; the next free one when unset.
    pub delivery_version: Option<i64>,
    /// Replaces the template root of every delivery path.
    pub delivery_location: Option<PathBuf>,
    /// Letterbox overlay for preview renders, as `W:H/O`.
    pub letterbox: Option<String>,
    /// Saved CSV column layout replacing the studio default.
    pub csv_template: Option<PathBuf>,
    /// Seconds to wait for the event logger to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `DELIVERY_CONFIG`        | `delivery.json`  |
    /// | `DELIVERY_SNAPSHOT`      | `snapshot.json`  |
    /// | `DELIVERY_PROJECT_ID`    | (required)       |
    /// | `DELIVERY_VERSION`       | (next free)      |
    /// | `DELIVERY_LOCATION`      | (template root)  |
    /// | `DELIVERY_LETTERBOX`     | (none)           |
    /// | `DELIVERY_CSV_TEMPLATE`  | (studio default) |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `5`              |
    pub fn from_env() -> Self {
        let settings_path = std::env::var("DELIVERY_CONFIG")
            .unwrap_or_else(|_| "delivery.json".into())
            .into();
        let snapshot_path = std::env::var("DELIVERY_SNAPSHOT")
            .unwrap_or_else(|_| "snapshot.json".into())
            .into();

        let project_id: i64 = std::env::var("DELIVERY_PROJECT_ID")
            .expect("DELIVERY_PROJECT_ID must be set")
            .parse()
            .expect("DELIVERY_PROJECT_ID must be a valid i64");

        let delivery_version = optional("DELIVERY_VERSION").map(|value| {
            value
                .parse::<i64>()
                .expect("DELIVERY_VERSION must be a valid i64")
        });

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            settings_path,
            snapshot_path,
            project_id,
            delivery_version,
            delivery_location: optional("DELIVERY_LOCATION").map(PathBuf::from),
            letterbox: optional("DELIVERY_LETTERBOX"),
            csv_template: optional("DELIVERY_CSV_TEMPLATE").map(PathBuf::from),
            shutdown_timeout_secs,
        }
    }
}

/// Non-empty value of an environment variable.
fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
