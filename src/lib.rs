// Clippy configuration for quipu crate
// Allow map().unwrap_or() pattern
#![allow(clippy::map_unwrap_or)]
// Allow format string style choices
#![allow(clippy::uninlined_format_args)]
// Allow Result wrapping for API consistency
#![allow(clippy::unnecessary_wraps)]
// Doc backticks optional
#![allow(clippy::doc_markdown)]
// Allow missing docs for internal items
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Allow pass-by-value for small types
#![allow(clippy::needless_pass_by_value)]

//! Quipu: Experiment Tracking with Partitioned Child Runs
//!
//! Quipu records experiment runs, metrics, and model artifacts in a local
//! `SQLite` tracking store, resolves tracking-server URIs through pluggable
//! connection providers, and fans partitioned dataset saves out into named
//! child runs for per-entity logging.
//!
//! # Quick Start
//!
//! ```
//! use quipu::prelude::*;
//! use std::collections::BTreeMap;
//!
//! // Open an in-memory tracking client
//! let mut client = TrackingClient::in_memory()?;
//!
//! // Fan a per-store metric out into child runs
//! let dataset = PartitionedDataset::new(MetricDataset::new("mse"));
//! let mut partitions = BTreeMap::new();
//! partitions.insert("store_1".to_string(), 0.5);
//! partitions.insert("store_2".to_string(), 0.7);
//! dataset.save(&mut client, &partitions)?;
//!
//! let loaded = dataset.load(&mut client)?;
//! assert_eq!(loaded["store_1"], 0.5);
//! # Ok::<(), quipu::error::QuipuError>(())
//! ```
//!
//! # Architecture
//!
//! - **Connections** - named providers computing tracking URIs from
//!   credentials and options, looked up in a registry populated at startup
//! - **Client** - explicit active-run stack over a `SQLite` store: runs,
//!   tags, metrics, logged models, registered model versions
//! - **Datasets** - small value objects logging one payload shape; the
//!   partitioned wrapper opens one child run per partition key
//!
//! # Configuration
//!
//! A YAML `tracking.yml` drives [`config::TrackingConfig::setup`]: the
//! tracking and registry URIs resolve through the provider registry (a bare
//! `databricks` passes through, `azureml` builds a workspace URI, relative
//! paths become project-rooted `file://` URIs), credentials export into the
//! environment, and the configured experiment is activated.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod io;
pub mod prelude;
pub mod uri;

pub use client::TrackingClient;
pub use error::{QuipuError, Result};
