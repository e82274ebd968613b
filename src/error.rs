//! Error types for quipu tracking operations.

use thiserror::Error;

/// Result type alias for quipu operations.
pub type Result<T> = std::result::Result<T, QuipuError>;

/// Errors that can occur during quipu tracking operations.
#[derive(Error, Debug)]
pub enum QuipuError {
    /// Tracking store operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration failed to parse.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required option was found neither in the options mapping nor in
    /// the fallback environment variable.
    #[error("key '{key}' not found in specified options nor in '{envkey}' environment variable")]
    MissingKey {
        /// Option key looked up.
        key: String,
        /// Environment variable checked as fallback.
        envkey: String,
    },

    /// URI string could not be parsed.
    #[error("invalid tracking URI: {0}")]
    InvalidUri(String),

    /// Entity not found in the tracking store.
    #[error("{kind} not found: '{name}'")]
    NotFound {
        /// Kind of entity (run, experiment, model, ...).
        kind: String,
        /// Name or identifier requested.
        name: String,
    },

    /// A dataset operation needed an active run and none was found.
    #[error("cannot find run id: no run is active and none was pinned")]
    NoActiveRun,

    /// A pinned run id conflicts with the currently active run.
    #[error("'run_id' cannot be specified if there is an active run; run_id={run_id}, active={active}")]
    RunIdMismatch {
        /// Pinned run id.
        run_id: String,
        /// Active run id.
        active: String,
    },

    /// A parent run has no child runs.
    #[error("no child runs found for parent run '{parent}'")]
    NoChildRuns {
        /// Parent run id.
        parent: String,
    },

    /// Dataset-level failure.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Operation is not supported by this build or backend.
    #[error("unsupported operation '{operation}': {reason}")]
    UnsupportedOperation {
        /// Operation attempted.
        operation: String,
        /// Why it is unavailable.
        reason: String,
    },
}
