//! Model logger dataset: artifact logging with optional registration.

use super::{partitioned::subname, PartitionDataset};
use crate::client::{ModelMetadata, RunId, TrackingClient};
use crate::error::{QuipuError, Result};

/// Logs model artifact bytes into a run, optionally registering the model.
///
/// The flavor names the serialization format of the bytes and is checked on
/// load. With a `registered_model_name`, every save adds a new version of
/// that registered model pointing at the run. Other save arguments are
/// stored verbatim alongside the artifact.
#[derive(Debug, Clone)]
pub struct ModelLoggerDataset {
    flavor: String,
    artifact_path: String,
    run_id: Option<RunId>,
    registered_model_name: Option<String>,
    save_args: ModelMetadata,
    logging_enabled: bool,
}

impl ModelLoggerDataset {
    /// Create a dataset for the given flavor, logging under the default
    /// artifact path `model`.
    #[must_use]
    pub fn new(flavor: impl Into<String>) -> Self {
        Self {
            flavor: flavor.into(),
            artifact_path: "model".to_string(),
            run_id: None,
            registered_model_name: None,
            save_args: ModelMetadata::new(),
            logging_enabled: true,
        }
    }

    /// Run-relative path the artifact is logged under.
    #[must_use]
    pub fn with_artifact_path(mut self, artifact_path: impl Into<String>) -> Self {
        self.artifact_path = artifact_path.into();
        self
    }

    /// Pin the run the model is read from and written to.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Register each saved model under this name.
    #[must_use]
    pub fn with_registered_model_name(mut self, name: impl Into<String>) -> Self {
        self.registered_model_name = Some(name.into());
        self
    }

    /// Record an extra save argument with every logged artifact.
    #[must_use]
    pub fn with_save_arg(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.save_args.insert(key.into(), value.into());
        self
    }

    /// Turn logging on or off; saves become no-ops when off.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// Model flavor.
    #[must_use]
    pub fn flavor(&self) -> &str {
        &self.flavor
    }

    /// Registered model name, if any.
    #[must_use]
    pub fn registered_model_name(&self) -> Option<&str> {
        self.registered_model_name.as_deref()
    }

    fn log_into(&self, client: &TrackingClient, run_id: &RunId, data: &[u8]) -> Result<()> {
        client
            .log_model(
                run_id,
                &self.artifact_path,
                &self.flavor,
                data,
                &self.save_args,
                self.registered_model_name.as_deref(),
            )
            .map(|_| ())
    }
}

impl PartitionDataset for ModelLoggerDataset {
    type Payload = Vec<u8>;

    fn for_partition(&self, partition: &str, run_id: Option<RunId>) -> Self {
        Self {
            flavor: self.flavor.clone(),
            artifact_path: self.artifact_path.clone(),
            run_id,
            registered_model_name: self
                .registered_model_name
                .as_deref()
                .map(|name| subname(partition, name)),
            save_args: self.save_args.clone(),
            logging_enabled: self.logging_enabled,
        }
    }

    fn save(&self, client: &mut TrackingClient, data: &Vec<u8>) -> Result<()> {
        if !self.logging_enabled {
            return Ok(());
        }

        match (&self.run_id, client.active_run().cloned()) {
            // it is not possible to log in a run which is not the current open one
            (Some(pinned), Some(active)) => Err(QuipuError::RunIdMismatch {
                run_id: pinned.to_string(),
                active: active.to_string(),
            }),
            (Some(pinned), None) => {
                let pinned = pinned.clone();
                client.with_resumed_run(&pinned, |c| self.log_into(c, &pinned, data))
            }
            (None, Some(active)) => self.log_into(client, &active, data),
            (None, None) => Err(QuipuError::NoActiveRun),
        }
    }

    fn load(&self, client: &TrackingClient) -> Result<Vec<u8>> {
        let run_id = self
            .run_id
            .clone()
            .or_else(|| client.active_run().cloned())
            .ok_or(QuipuError::NoActiveRun)?;

        let artifact = client.load_model(&run_id, &self.artifact_path)?;
        if artifact.flavor != self.flavor {
            return Err(QuipuError::Dataset(format!(
                "model at '{}' was logged with flavor '{}', expected '{}'",
                self.artifact_path, artifact.flavor, self.flavor
            )));
        }
        Ok(artifact.data)
    }
}
