//! Dynamic partition dispatch: one child run per partition key.
//!
//! A [`PartitionedDataset`] wraps an inner dataset template and fans a
//! `partition key -> payload` mapping out into child runs nested under a
//! parent run. Each partition is saved independently: the key is normalized
//! (`/` becomes `\`), a child run with that name is opened (reusing an
//! existing one), the inner dataset re-scoped to the partition persists the
//! payload, and the child run is closed. The first failing partition aborts
//! the remaining ones.
//!
//! # Example
//!
//! ```
//! use quipu::client::TrackingClient;
//! use quipu::io::{MetricDataset, PartitionedDataset};
//! use std::collections::BTreeMap;
//!
//! let mut client = TrackingClient::in_memory().unwrap();
//! let ds = PartitionedDataset::new(MetricDataset::new("mse"));
//!
//! let mut data = BTreeMap::new();
//! data.insert("store_1".to_string(), 0.5);
//! data.insert("store_2".to_string(), 0.7);
//! ds.save(&mut client, &data).unwrap();
//!
//! let loaded = ds.load(&mut client).unwrap();
//! assert_eq!(loaded["store_1"], 0.5);
//! ```

use super::{ModelLoggerDataset, PartitionDataset};
use crate::client::{tag, Run, RunId, RunStatus, StartRunOptions, TrackingClient};
use crate::error::{QuipuError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Join a partition key onto a suffix with the tracking server's name
/// separator: path segments of the key, then the suffix, joined by `\`.
#[must_use]
pub fn subname(partition: &str, suffix: &str) -> String {
    let mut parts: Vec<&str> = partition.split('/').filter(|s| !s.is_empty()).collect();
    if !suffix.is_empty() {
        parts.push(suffix);
    }
    parts.join("\\")
}

/// Normalize a partition key into a legal run/model name: every `/`
/// becomes `\`.
#[must_use]
pub fn normalize(partition: &str) -> String {
    subname(partition, "")
}

/// Wrapper fanning saves of an inner dataset out over child runs.
#[derive(Debug, Clone)]
pub struct PartitionedDataset<D> {
    dataset: D,
    run_id: Option<RunId>,
}

/// Partition dispatcher over [`ModelLoggerDataset`]: the normalized
/// partition key is prefixed onto the registered model name
/// (`<key>\<model_name>`).
pub type PartitionedModelDataset = PartitionedDataset<ModelLoggerDataset>;

impl<D: PartitionDataset> PartitionedDataset<D> {
    /// Wrap an inner dataset template.
    #[must_use]
    pub fn new(dataset: D) -> Self {
        Self {
            dataset,
            run_id: None,
        }
    }

    /// Pin the parent run; without it, the bottom of the active-run stack
    /// is the parent, and with no active run a fresh nested run is started
    /// (and left open, anchoring subsequent calls).
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Inner dataset template.
    #[must_use]
    pub fn inner(&self) -> &D {
        &self.dataset
    }

    /// The parent run the child runs nest under.
    ///
    /// # Errors
    ///
    /// Returns an error if the pinned run does not exist or a fresh parent
    /// run cannot be started.
    pub fn parent(&self, client: &mut TrackingClient) -> Result<Run> {
        if let Some(run_id) = &self.run_id {
            return client.get_run(run_id);
        }
        if let Some(root) = client.root_run().cloned() {
            return client.get_run(&root);
        }
        let run_id = client.start_run(StartRunOptions {
            nested: true,
            ..StartRunOptions::default()
        })?;
        client.get_run(&run_id)
    }

    /// All child runs of the parent, as a name-to-run-id map.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::NoChildRuns`] when the parent has none.
    pub fn find_children(&self, client: &mut TrackingClient) -> Result<BTreeMap<String, RunId>> {
        let parent = self.parent(client)?;
        let runs = client.search_child_runs(&parent.info.run_id)?;
        if runs.is_empty() {
            return Err(QuipuError::NoChildRuns {
                parent: parent.info.run_id.to_string(),
            });
        }

        let mut children = BTreeMap::new();
        for run in runs {
            if let Some(name) = run.name() {
                children.insert(name.to_string(), run.info.run_id.clone());
            }
        }
        Ok(children)
    }

    /// Open the child run for a normalized partition name, reusing an
    /// existing child of the same name. The run is pushed onto the active
    /// stack; the caller ends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent cannot be determined or the run
    /// cannot be started.
    pub fn start_child_run(&self, client: &mut TrackingClient, name: &str) -> Result<RunId> {
        match self.find_children(client) {
            Ok(children) => {
                if let Some(run_id) = children.get(name) {
                    debug!(child = name, run_id = %run_id, "reusing child run");
                    return client.resume_run(run_id);
                }
            }
            Err(QuipuError::NoChildRuns { .. }) => {}
            Err(err) => return Err(err),
        }

        let parent = self.parent(client)?;
        let mut tags = parent.tags.clone();
        tags.remove(tag::RUN_NAME);
        // inserted last so inherited tags cannot shadow the parent pointer
        tags.insert(
            tag::PARENT_RUN_ID.to_string(),
            parent.info.run_id.to_string(),
        );

        debug!(child = name, parent = %parent.info.run_id, "starting child run");
        client.start_run(StartRunOptions {
            name: Some(name.to_string()),
            nested: true,
            tags,
        })
    }

    /// Save every partition into its own child run, sequentially in key
    /// order. The first failure marks its child run failed and aborts the
    /// remaining partitions.
    ///
    /// # Errors
    ///
    /// Propagates the first partition failure.
    pub fn save(
        &self,
        client: &mut TrackingClient,
        data: &BTreeMap<String, D::Payload>,
    ) -> Result<()> {
        for (partition, value) in data {
            let child_name = normalize(partition);
            self.start_child_run(client, &child_name)?;
            let scoped = self.dataset.for_partition(&child_name, None);
            match scoped.save(client, value) {
                Ok(()) => {
                    client.end_run(RunStatus::Finished)?;
                }
                Err(err) => {
                    let _ = client.end_run(RunStatus::Failed);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Load every child run's payload, keyed by child name.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::NoChildRuns`] when the parent has none, and
    /// propagates inner load failures.
    pub fn load(&self, client: &mut TrackingClient) -> Result<BTreeMap<String, D::Payload>> {
        let children = self.find_children(client)?;
        let mut out = BTreeMap::new();
        for (name, run_id) in children {
            let scoped = self.dataset.for_partition(&name, Some(run_id));
            out.insert(name.clone(), scoped.load(client)?);
        }
        Ok(out)
    }
}
