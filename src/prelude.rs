//! Convenient re-exports for common usage.
//!
//! ```
//! use quipu::prelude::*;
//! ```

// Core types
pub use crate::error::{QuipuError, Result};

// Client types
pub use crate::client::{
    Experiment, LifecycleStage, MetricRecord, ModelArtifact, ModelMetadata,
    RegisteredModelVersion, Run, RunId, RunInfo, RunStatus, StartRunOptions, TrackingClient,
};

// Connection types
pub use crate::connection::{
    AzureMlConnection, Connection, ConnectionRegistry, DatabricksConnection, OptionMap,
};

// Configuration types
pub use crate::config::{ProjectContext, TrackingConfig};

// Dataset types
pub use crate::io::{
    MetricDataset, MetricHistoryDataset, MetricItem, MetricPoint, MetricsData, MetricsDataset,
    ModelLoggerDataset, PartitionDataset, PartitionedDataset, PartitionedModelDataset,
};

// URI types
pub use crate::uri::TrackingUri;
