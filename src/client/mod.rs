//! Tracking client: experiments, runs, metrics, and logged models.
//!
//! The client owns an explicit active-run stack. Starting a nested run
//! pushes onto the stack, ending a run pops it; datasets log into the run
//! at the top while partition dispatchers anchor child runs to the run at
//! the bottom. All state is persisted in a `SQLite` store.
//!
//! # Example
//!
//! ```
//! use quipu::client::{RunStatus, StartRunOptions, TrackingClient};
//!
//! let mut client = TrackingClient::in_memory().unwrap();
//! let run_id = client.start_run(StartRunOptions::default()).unwrap();
//! client.log_metric(&run_id, "mse", 0.25, 0).unwrap();
//! client.end_run(RunStatus::Finished).unwrap();
//! # Ok::<(), quipu::error::QuipuError>(())
//! ```

mod store;

pub use store::TrackingStore;

use crate::error::{QuipuError, Result};
use crate::uri::TrackingUri;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use tracing::debug;
use uuid::Uuid;

/// Reserved run tags.
pub mod tag {
    /// Tag recording the parent run of a child run.
    pub const PARENT_RUN_ID: &str = "quipu.parentRunId";
    /// Tag recording the run name.
    pub const RUN_NAME: &str = "quipu.runName";
}

/// Unique identifier for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = QuipuError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| QuipuError::Configuration(format!("invalid run id: {s}")))
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is currently open.
    Running,
    /// Run completed successfully.
    Finished,
    /// Run failed with an error.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = QuipuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            _ => Err(QuipuError::Configuration(format!("invalid run status: {s}"))),
        }
    }
}

/// Lifecycle stage of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    /// Experiment is active.
    Active,
    /// Experiment was soft-deleted.
    Deleted,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LifecycleStage {
    type Err = QuipuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            _ => Err(QuipuError::Configuration(format!(
                "invalid lifecycle stage: {s}"
            ))),
        }
    }
}

/// An experiment grouping runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique experiment identifier.
    pub id: String,
    /// Unique experiment name.
    pub name: String,
    /// Lifecycle stage.
    pub lifecycle: LifecycleStage,
}

/// Core information about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    /// Unique run identifier.
    pub run_id: RunId,
    /// Experiment the run belongs to.
    pub experiment_id: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub ended_at: Option<DateTime<Utc>>,
}

/// A run with its tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Core run information.
    pub info: RunInfo,
    /// Tag map, including the reserved [`tag`] keys.
    pub tags: HashMap<String, String>,
}

impl Run {
    /// Run name, read from the run-name tag.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get(tag::RUN_NAME).map(String::as_str)
    }

    /// Parent run id, read from the parent tag.
    #[must_use]
    pub fn parent_run_id(&self) -> Option<&str> {
        self.tags.get(tag::PARENT_RUN_ID).map(String::as_str)
    }
}

/// A metric recorded in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric key.
    pub key: String,
    /// Metric value.
    pub value: f64,
    /// Step.
    pub step: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Extra save arguments stored alongside a model artifact (e.g. a model
/// signature or registration timeout), keyed by argument name.
pub type ModelMetadata = HashMap<String, serde_json::Value>;

/// A logged model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Serialization flavor of the bytes.
    pub flavor: String,
    /// Raw artifact bytes.
    pub data: Vec<u8>,
    /// Save arguments recorded with the artifact.
    pub metadata: ModelMetadata,
}

/// One version of a registered model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModelVersion {
    /// Registered model name.
    pub name: String,
    /// Monotonically increasing version number.
    pub version: u32,
    /// Run the version was logged in.
    pub run_id: RunId,
    /// Run-relative artifact path.
    pub artifact_path: String,
}

/// Options for starting a run.
#[derive(Debug, Clone, Default)]
pub struct StartRunOptions {
    /// Run name, recorded as the run-name tag.
    pub name: Option<String>,
    /// Allow starting while another run is active.
    pub nested: bool,
    /// Initial tags.
    pub tags: HashMap<String, String>,
}

impl StartRunOptions {
    /// Options for a nested run with the given name.
    #[must_use]
    pub fn nested_named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            nested: true,
            tags: HashMap::new(),
        }
    }
}

/// Client for a tracking store, holding the active-run stack.
#[derive(Debug)]
pub struct TrackingClient {
    store: TrackingStore,
    tracking_uri: String,
    registry_uri: String,
    experiment_id: String,
    stack: Vec<RunId>,
}

impl TrackingClient {
    /// Connect to the store a tracking URI points at.
    ///
    /// `sqlite://` opens the database directly; `file://` places
    /// `tracking.db` inside the directory. Remote schemes and bare keywords
    /// are refused.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-operation error for non-local URIs, or a
    /// database error if the store cannot be opened.
    pub fn connect(uri: &TrackingUri) -> Result<Self> {
        let store = match uri {
            TrackingUri::Sqlite(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                TrackingStore::open(path)?
            }
            TrackingUri::File(dir) => {
                fs::create_dir_all(dir)?;
                TrackingStore::open(dir.join("tracking.db"))?
            }
            TrackingUri::Http(raw) => {
                return Err(QuipuError::UnsupportedOperation {
                    operation: "connect".to_string(),
                    reason: format!("remote HTTP tracking servers are not supported: {raw}"),
                })
            }
            TrackingUri::Keyword(word) | TrackingUri::Other(word) => {
                return Err(QuipuError::UnsupportedOperation {
                    operation: "connect".to_string(),
                    reason: format!(
                        "'{word}' is only understood by a hosted tracking service, \
                         not by the local store"
                    ),
                })
            }
        };

        Self::from_store(store, uri.to_string())
    }

    /// Open an in-memory store, for tests and scratch work.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        Self::from_store(TrackingStore::open_in_memory()?, "sqlite://:memory:".to_string())
    }

    fn from_store(store: TrackingStore, tracking_uri: String) -> Result<Self> {
        let mut client = Self {
            store,
            registry_uri: tracking_uri.clone(),
            tracking_uri,
            experiment_id: String::new(),
            stack: Vec::new(),
        };
        client.set_experiment("Default", true)?;
        Ok(client)
    }

    /// Tracking URI the client was connected with.
    #[must_use]
    pub fn tracking_uri(&self) -> &str {
        &self.tracking_uri
    }

    /// Registry URI; defaults to the tracking URI.
    #[must_use]
    pub fn registry_uri(&self) -> &str {
        &self.registry_uri
    }

    /// Override the registry URI.
    pub fn set_registry_uri(&mut self, uri: impl Into<String>) {
        self.registry_uri = uri.into();
    }

    /// Direct access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &TrackingStore {
        &self.store
    }

    // ==================== Experiments ====================

    /// Activate the named experiment, creating it if absent.
    ///
    /// A soft-deleted experiment is restored when `restore_if_deleted` is
    /// set, and refused otherwise.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a deleted experiment that may not
    /// be restored.
    pub fn set_experiment(&mut self, name: &str, restore_if_deleted: bool) -> Result<Experiment> {
        let experiment = match self.store.get_experiment_by_name(name)? {
            Some(mut experiment) => {
                if experiment.lifecycle == LifecycleStage::Deleted {
                    if !restore_if_deleted {
                        return Err(QuipuError::Configuration(format!(
                            "experiment '{name}' is deleted and restore_if_deleted is off"
                        )));
                    }
                    self.store
                        .set_experiment_lifecycle(&experiment.id, LifecycleStage::Active)?;
                    experiment.lifecycle = LifecycleStage::Active;
                }
                experiment
            }
            None => {
                let experiment = Experiment {
                    id: Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    lifecycle: LifecycleStage::Active,
                };
                self.store.insert_experiment(&experiment)?;
                experiment
            }
        };

        self.experiment_id = experiment.id.clone();
        Ok(experiment)
    }

    /// Identifier of the active experiment.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Fetch an experiment by name.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        self.store.get_experiment_by_name(name)
    }

    /// Soft-delete an experiment.
    ///
    /// # Errors
    ///
    /// Returns an error if the experiment does not exist.
    pub fn delete_experiment(&self, name: &str) -> Result<()> {
        let experiment =
            self.store
                .get_experiment_by_name(name)?
                .ok_or_else(|| QuipuError::NotFound {
                    kind: "experiment".to_string(),
                    name: name.to_string(),
                })?;
        self.store
            .set_experiment_lifecycle(&experiment.id, LifecycleStage::Deleted)
    }

    // ==================== Run lifecycle ====================

    /// Run at the top of the active stack.
    #[must_use]
    pub fn active_run(&self) -> Option<&RunId> {
        self.stack.last()
    }

    /// Run at the bottom of the active stack. Child runs anchor here so a
    /// partition's own nested run never becomes another partition's parent.
    #[must_use]
    pub fn root_run(&self) -> Option<&RunId> {
        self.stack.first()
    }

    /// Start a new run and push it onto the active stack.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a run is already active and
    /// `nested` is off.
    pub fn start_run(&mut self, opts: StartRunOptions) -> Result<RunId> {
        if let Some(active) = self.stack.last() {
            if !opts.nested {
                return Err(QuipuError::Configuration(format!(
                    "run {active} is already active; start nested runs explicitly"
                )));
            }
        }

        let run_id = RunId::new();
        let mut tags = opts.tags;
        if let Some(name) = &opts.name {
            tags.insert(tag::RUN_NAME.to_string(), name.clone());
        }

        let run = Run {
            info: RunInfo {
                run_id: run_id.clone(),
                experiment_id: self.experiment_id.clone(),
                status: RunStatus::Running,
                started_at: Utc::now(),
                ended_at: None,
            },
            tags,
        };
        self.store.insert_run(&run)?;
        debug!(run_id = %run_id, name = opts.name.as_deref().unwrap_or(""), "started run");

        self.stack.push(run_id.clone());
        Ok(run_id)
    }

    /// Reopen an existing run and push it onto the active stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the run does not exist.
    pub fn resume_run(&mut self, run_id: &RunId) -> Result<RunId> {
        let run = self.store.get_run(run_id)?;
        self.store
            .update_run_status(&run.info.run_id, RunStatus::Running, None)?;
        debug!(run_id = %run_id, "resumed run");

        self.stack.push(run_id.clone());
        Ok(run_id.clone())
    }

    /// End the active run with the given status, popping the stack.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::NoActiveRun`] when the stack is empty.
    pub fn end_run(&mut self, status: RunStatus) -> Result<RunId> {
        let run_id = self.stack.pop().ok_or(QuipuError::NoActiveRun)?;
        self.store
            .update_run_status(&run_id, status, Some(Utc::now()))?;
        Ok(run_id)
    }

    /// Run `f` inside a fresh run: the run finishes when `f` succeeds and
    /// is marked failed when `f` errors (the error propagates).
    ///
    /// # Errors
    ///
    /// Propagates errors from starting the run or from `f`.
    pub fn with_run<T>(
        &mut self,
        opts: StartRunOptions,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.start_run(opts)?;
        self.finish_scoped(f)
    }

    /// Run `f` inside a resumed run, with the same close semantics as
    /// [`TrackingClient::with_run`].
    ///
    /// # Errors
    ///
    /// Propagates errors from resuming the run or from `f`.
    pub fn with_resumed_run<T>(
        &mut self,
        run_id: &RunId,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.resume_run(run_id)?;
        self.finish_scoped(f)
    }

    fn finish_scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(value) => {
                self.end_run(RunStatus::Finished)?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.end_run(RunStatus::Failed);
                Err(err)
            }
        }
    }

    /// Fetch a run with its tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the run does not exist.
    pub fn get_run(&self, run_id: &RunId) -> Result<Run> {
        self.store.get_run(run_id)
    }

    /// All runs tagged as children of `parent`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn search_child_runs(&self, parent: &RunId) -> Result<Vec<Run>> {
        self.store
            .search_runs_by_tag(tag::PARENT_RUN_ID, &parent.to_string())
    }

    // ==================== Metrics ====================

    /// Log one metric value.
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails.
    pub fn log_metric(&self, run_id: &RunId, key: &str, value: f64, step: u64) -> Result<()> {
        self.store
            .insert_metric(run_id, key, value, step, Utc::now())
    }

    /// Full history of one metric, in step order.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn metric_history(&self, run_id: &RunId, key: &str) -> Result<Vec<MetricRecord>> {
        self.store.metric_history(run_id, key)
    }

    /// Latest value of one metric.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when the metric was never logged.
    pub fn latest_metric(&self, run_id: &RunId, key: &str) -> Result<f64> {
        self.store
            .metric_history(run_id, key)?
            .last()
            .map(|m| m.value)
            .ok_or_else(|| QuipuError::NotFound {
                kind: "metric".to_string(),
                name: key.to_string(),
            })
    }

    /// Distinct metric keys logged in a run.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn list_metric_keys(&self, run_id: &RunId) -> Result<Vec<String>> {
        self.store.list_metric_keys(run_id)
    }

    // ==================== Models ====================

    /// Log a model artifact into a run, optionally registering it.
    ///
    /// When `registered_model_name` is given, the registered model is
    /// created if needed and a new version pointing at this run is added;
    /// the version number is returned.
    ///
    /// # Errors
    ///
    /// Returns a database error if storage fails.
    pub fn log_model(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        flavor: &str,
        data: &[u8],
        metadata: &ModelMetadata,
        registered_model_name: Option<&str>,
    ) -> Result<Option<u32>> {
        self.store
            .put_model_artifact(run_id, artifact_path, flavor, data, metadata)?;

        let Some(name) = registered_model_name else {
            return Ok(None);
        };
        self.store.ensure_registered_model(name)?;
        let version = self
            .store
            .insert_model_version(name, run_id, artifact_path)?;
        debug!(model = name, version, run_id = %run_id, "registered model version");
        Ok(Some(version))
    }

    /// Fetch a logged model artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if no artifact exists at that path in the run.
    pub fn load_model(&self, run_id: &RunId, artifact_path: &str) -> Result<ModelArtifact> {
        self.store.get_model_artifact(run_id, artifact_path)
    }

    /// Names of all registered models, sorted.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn list_registered_models(&self) -> Result<Vec<String>> {
        self.store.list_registered_models()
    }

    /// Latest version of a registered model.
    ///
    /// # Errors
    ///
    /// Returns an error if the model has no versions.
    pub fn latest_model_version(&self, name: &str) -> Result<RegisteredModelVersion> {
        self.store.latest_model_version(name)
    }
}
