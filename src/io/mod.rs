//! Datasets logging payloads into tracking runs.
//!
//! Datasets are small value objects describing *what* to log (a metric key,
//! a model flavor) and *where* (a pinned run id, or the active run). The
//! partition dispatcher re-scopes a dataset per partition through
//! [`PartitionDataset::for_partition`].

mod metrics;
mod models;
mod partitioned;

pub use metrics::{
    MetricDataset, MetricHistoryDataset, MetricItem, MetricPoint, MetricsData, MetricsDataset,
};
pub use models::ModelLoggerDataset;
pub use partitioned::{normalize, subname, PartitionedDataset, PartitionedModelDataset};

use crate::client::{RunId, TrackingClient};
use crate::error::Result;

/// A dataset the partition dispatcher can fan out over child runs.
pub trait PartitionDataset: Sized {
    /// Payload saved and loaded by this dataset.
    type Payload;

    /// Re-scope this dataset to one partition: pin the run id and rewrite
    /// partition-dependent parameters (e.g. a registered model name).
    fn for_partition(&self, partition: &str, run_id: Option<RunId>) -> Self;

    /// Persist the payload into the pinned or active run.
    fn save(&self, client: &mut TrackingClient, data: &Self::Payload) -> Result<()>;

    /// Read the payload back from the pinned or active run.
    fn load(&self, client: &TrackingClient) -> Result<Self::Payload>;
}
