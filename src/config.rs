//! YAML tracking configuration and setup.
//!
//! The config mirrors a `tracking.yml` file with a `server` block (where
//! runs go) and a `tracking` block (experiment and run options). `setup`
//! turns it into a connected [`TrackingClient`]: both URIs are resolved
//! through the connection-provider registry, credentials are exported into
//! the process environment, and the configured experiment is activated.
//!
//! # Example
//!
//! ```
//! use quipu::config::TrackingConfig;
//!
//! let config = TrackingConfig::from_yaml_str(
//!     "server:\n  tracking_uri: sqlite:///tmp/tracking.db\n",
//! )
//! .unwrap();
//! assert_eq!(config.tracking.experiment.name, "Default");
//! ```

use crate::client::{RunId, StartRunOptions, TrackingClient};
use crate::connection::{ConnectionRegistry, OptionMap};
use crate::error::Result;
use crate::uri::TrackingUri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment fallback for the tracking URI.
pub const TRACKING_URI_ENV: &str = "QUIPU_TRACKING_URI";

/// Runs land in this project-relative directory when nothing is configured.
pub const DEFAULT_TRACKING_URI: &str = "runs";

/// Where runs are recorded and how to reach it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOptions {
    /// Tracking URI, or the name of a connection provider.
    pub tracking_uri: Option<String>,
    /// Registry URI; the tracking URI when unset.
    pub registry_uri: Option<String>,
    /// Options handed to the connection provider.
    pub connection: Option<OptionMap>,
    /// Name of the credential set handed to the connection provider.
    pub credentials: Option<String>,
}

/// Experiment selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentOptions {
    /// Experiment name to activate.
    pub name: String,
    /// Restore the experiment when it was soft-deleted.
    pub restore_if_deleted: bool,
}

impl Default for ExperimentOptions {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            restore_if_deleted: true,
        }
    }
}

/// Options for the run a pipeline executes under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunOptions {
    /// Existing run to resume instead of starting a new one.
    pub id: Option<String>,
    /// Name for a new run.
    pub name: Option<String>,
    /// Start nested under an already-active run.
    pub nested: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            nested: true,
        }
    }
}

/// The `tracking` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingOptions {
    /// Experiment selection.
    pub experiment: ExperimentOptions,
    /// Run options.
    pub run: RunOptions,
}

/// Full tracking configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// The `server` block.
    pub server: ServerOptions,
    /// The `tracking` block.
    pub tracking: TrackingOptions,
}

/// Ambient project state `setup` draws on: the path URIs are anchored at
/// and the named credential sets.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    /// Root relative tracking paths are resolved against.
    pub project_path: PathBuf,
    /// Credential sets, keyed by the name the config refers to.
    pub credentials: HashMap<String, OptionMap>,
}

impl ProjectContext {
    /// Context rooted at a project path, with no credentials.
    #[must_use]
    pub fn new<P: AsRef<Path>>(project_path: P) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
            credentials: HashMap::new(),
        }
    }

    /// Attach a named credential set.
    #[must_use]
    pub fn with_credentials(mut self, name: impl Into<String>, set: OptionMap) -> Self {
        self.credentials.insert(name.into(), set);
        self
    }
}

enum UriKind {
    Tracking,
    Registry,
}

impl TrackingConfig {
    /// Parse a configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a YAML error on malformed input or unknown keys.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a YAML error on
    /// malformed content.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    /// Set up the whole tracking configuration.
    ///
    /// Resolves the tracking URI (config value, then `QUIPU_TRACKING_URI`,
    /// then the project-relative default) and the registry URI through the
    /// provider registry, exports the selected credential set into the
    /// environment, connects the client, and activates the configured
    /// experiment.
    ///
    /// # Errors
    ///
    /// Propagates provider, connect, and experiment errors.
    pub fn setup(
        &self,
        context: &ProjectContext,
        connections: &ConnectionRegistry,
    ) -> Result<TrackingClient> {
        let credentials = self.resolved_credentials(context);

        let raw_tracking = self
            .server
            .tracking_uri
            .clone()
            .or_else(|| std::env::var(TRACKING_URI_ENV).ok())
            .unwrap_or_else(|| DEFAULT_TRACKING_URI.to_string());

        let tracking_uri = self.resolve_uri(
            connections,
            &raw_tracking,
            &credentials,
            &context.project_path,
            UriKind::Tracking,
        )?;

        let registry_uri = self
            .server
            .registry_uri
            .as_deref()
            .map(|raw| {
                self.resolve_uri(
                    connections,
                    raw,
                    &credentials,
                    &context.project_path,
                    UriKind::Registry,
                )
            })
            .transpose()?;

        export_credentials(&credentials);

        let mut client = TrackingClient::connect(&tracking_uri)?;
        if let Some(registry_uri) = registry_uri {
            client.set_registry_uri(registry_uri.to_string());
        }

        client.set_experiment(
            &self.tracking.experiment.name,
            self.tracking.experiment.restore_if_deleted,
        )?;

        info!(
            tracking_uri = %tracking_uri,
            experiment = %self.tracking.experiment.name,
            "tracking configured"
        );
        Ok(client)
    }

    /// Start (or resume) the run the `tracking.run` block describes.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured run id is invalid or missing from
    /// the store.
    pub fn start_configured_run(&self, client: &mut TrackingClient) -> Result<RunId> {
        if let Some(id) = &self.tracking.run.id {
            let run_id: RunId = id.parse()?;
            return client.resume_run(&run_id);
        }
        client.start_run(StartRunOptions {
            name: self.tracking.run.name.clone(),
            nested: self.tracking.run.nested,
            tags: HashMap::new(),
        })
    }

    fn resolved_credentials(&self, context: &ProjectContext) -> OptionMap {
        self.server
            .credentials
            .as_deref()
            .and_then(|name| context.credentials.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn resolve_uri(
        &self,
        connections: &ConnectionRegistry,
        raw: &str,
        credentials: &OptionMap,
        project_path: &Path,
        kind: UriKind,
    ) -> Result<TrackingUri> {
        let options = self.server.connection.clone().unwrap_or_default();
        if connections.contains(raw) {
            let uri = match kind {
                UriKind::Tracking => {
                    connections.resolve_tracking_uri(raw, credentials, &options)?
                }
                UriKind::Registry => {
                    connections.resolve_registry_uri(raw, credentials, &options)?
                }
            };
            // provider output bypasses path validation; a keyword stays one
            return TrackingUri::parse(&uri);
        }
        TrackingUri::validate(project_path, raw)
    }
}

fn export_credentials(credentials: &OptionMap) {
    for (key, value) in credentials {
        std::env::set_var(key, value);
    }
}
