//! Metric datasets: single value, history, and keyed collections.

use super::PartitionDataset;
use crate::client::{RunId, TrackingClient};
use crate::error::{QuipuError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One metric observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric value.
    pub value: f64,
    /// Step.
    pub step: u64,
}

impl MetricPoint {
    /// Create a point.
    #[must_use]
    pub fn new(value: f64, step: u64) -> Self {
        Self { value, step }
    }
}

/// A single observation or a history of observations for one metric key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricItem {
    /// One observation.
    Single(MetricPoint),
    /// Several observations.
    History(Vec<MetricPoint>),
}

/// Mapping from metric key to item, the payload of [`MetricsDataset`].
pub type MetricsData = BTreeMap<String, MetricItem>;

fn target_run(run_id: Option<&RunId>, client: &TrackingClient) -> Result<RunId> {
    run_id
        .cloned()
        .or_else(|| client.active_run().cloned())
        .ok_or(QuipuError::NoActiveRun)
}

/// Logs one f64 under a fixed metric key; loads the latest value.
#[derive(Debug, Clone)]
pub struct MetricDataset {
    key: String,
    run_id: Option<RunId>,
    logging_enabled: bool,
}

impl MetricDataset {
    /// Create a dataset for the given metric key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            run_id: None,
            logging_enabled: true,
        }
    }

    /// Pin the run the metric is read from and written to.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Turn logging on or off; saves become no-ops when off.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// Metric key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartitionDataset for MetricDataset {
    type Payload = f64;

    fn for_partition(&self, _partition: &str, run_id: Option<RunId>) -> Self {
        Self {
            key: self.key.clone(),
            run_id,
            logging_enabled: self.logging_enabled,
        }
    }

    fn save(&self, client: &mut TrackingClient, data: &f64) -> Result<()> {
        if !self.logging_enabled {
            return Ok(());
        }
        let run_id = target_run(self.run_id.as_ref(), client)?;
        client.log_metric(&run_id, &self.key, *data, 0)
    }

    fn load(&self, client: &TrackingClient) -> Result<f64> {
        let run_id = target_run(self.run_id.as_ref(), client)?;
        client.latest_metric(&run_id, &self.key)
    }
}

/// Logs a sequence of values under a fixed key, one step per element.
#[derive(Debug, Clone)]
pub struct MetricHistoryDataset {
    key: String,
    run_id: Option<RunId>,
    logging_enabled: bool,
}

impl MetricHistoryDataset {
    /// Create a dataset for the given metric key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            run_id: None,
            logging_enabled: true,
        }
    }

    /// Pin the run the history is read from and written to.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Turn logging on or off; saves become no-ops when off.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }
}

impl PartitionDataset for MetricHistoryDataset {
    type Payload = Vec<f64>;

    fn for_partition(&self, _partition: &str, run_id: Option<RunId>) -> Self {
        Self {
            key: self.key.clone(),
            run_id,
            logging_enabled: self.logging_enabled,
        }
    }

    fn save(&self, client: &mut TrackingClient, data: &Vec<f64>) -> Result<()> {
        if !self.logging_enabled {
            return Ok(());
        }
        let run_id = target_run(self.run_id.as_ref(), client)?;
        for (step, value) in data.iter().enumerate() {
            client.log_metric(&run_id, &self.key, *value, step as u64)?;
        }
        Ok(())
    }

    fn load(&self, client: &TrackingClient) -> Result<Vec<f64>> {
        let run_id = target_run(self.run_id.as_ref(), client)?;
        let history = client.metric_history(&run_id, &self.key)?;
        if history.is_empty() {
            return Err(QuipuError::NotFound {
                kind: "metric".to_string(),
                name: self.key.clone(),
            });
        }
        Ok(history.into_iter().map(|m| m.value).collect())
    }
}

/// Logs a keyed collection of metrics, optionally under a prefix.
///
/// Saved keys become `{prefix}.{key}` when a prefix is set; load filters the
/// run's metrics by that prefix and keeps the full key.
#[derive(Debug, Clone)]
pub struct MetricsDataset {
    prefix: Option<String>,
    run_id: Option<RunId>,
    logging_enabled: bool,
}

impl MetricsDataset {
    /// Create a dataset with no prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: None,
            run_id: None,
            logging_enabled: true,
        }
    }

    /// Prefix attached to every logged key.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Pin the run the metrics are read from and written to.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Turn logging on or off; saves become no-ops when off.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.to_string(),
        }
    }

    fn is_dataset_metric(&self, key: &str) -> bool {
        self.prefix
            .as_deref()
            .map_or(true, |prefix| key.starts_with(prefix))
    }
}

impl Default for MetricsDataset {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionDataset for MetricsDataset {
    type Payload = MetricsData;

    fn for_partition(&self, _partition: &str, run_id: Option<RunId>) -> Self {
        Self {
            prefix: self.prefix.clone(),
            run_id,
            logging_enabled: self.logging_enabled,
        }
    }

    fn save(&self, client: &mut TrackingClient, data: &MetricsData) -> Result<()> {
        if !self.logging_enabled {
            return Ok(());
        }
        let run_id = target_run(self.run_id.as_ref(), client)?;
        for (key, item) in data {
            let key = self.full_key(key);
            match item {
                MetricItem::Single(point) => {
                    client.log_metric(&run_id, &key, point.value, point.step)?;
                }
                MetricItem::History(points) => {
                    for point in points {
                        client.log_metric(&run_id, &key, point.value, point.step)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn load(&self, client: &TrackingClient) -> Result<MetricsData> {
        let run_id = target_run(self.run_id.as_ref(), client)?;
        let mut out = MetricsData::new();
        for key in client.list_metric_keys(&run_id)? {
            if !self.is_dataset_metric(&key) {
                continue;
            }
            let points: Vec<MetricPoint> = client
                .metric_history(&run_id, &key)?
                .into_iter()
                .map(|m| MetricPoint::new(m.value, m.step))
                .collect();
            let item = if points.len() == 1 {
                MetricItem::Single(points[0])
            } else {
                MetricItem::History(points)
            };
            out.insert(key, item);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StartRunOptions;

    fn client_with_run() -> (TrackingClient, RunId) {
        let mut client = TrackingClient::in_memory().unwrap();
        let run_id = client.start_run(StartRunOptions::default()).unwrap();
        (client, run_id)
    }

    #[test]
    fn test_metric_save_and_load_active_run() {
        let (mut client, _run_id) = client_with_run();
        let ds = MetricDataset::new("mse");

        ds.save(&mut client, &0.25).unwrap();
        assert_eq!(ds.load(&client).unwrap(), 0.25);
    }

    #[test]
    fn test_metric_pinned_run() {
        let (mut client, run_id) = client_with_run();
        MetricDataset::new("mse").save(&mut client, &0.5).unwrap();
        client.end_run(crate::client::RunStatus::Finished).unwrap();

        let ds = MetricDataset::new("mse").with_run_id(run_id);
        assert_eq!(ds.load(&client).unwrap(), 0.5);
    }

    #[test]
    fn test_metric_no_active_run() {
        let mut client = TrackingClient::in_memory().unwrap();
        let err = MetricDataset::new("mse").save(&mut client, &0.5).unwrap_err();
        assert!(matches!(err, QuipuError::NoActiveRun));
    }

    #[test]
    fn test_metric_logging_disabled() {
        let (mut client, _run_id) = client_with_run();
        let ds = MetricDataset::new("mse").with_logging(false);

        ds.save(&mut client, &0.25).unwrap();
        assert!(ds.load(&client).is_err());
    }

    #[test]
    fn test_metric_history_roundtrip() {
        let (mut client, _run_id) = client_with_run();
        let ds = MetricHistoryDataset::new("mae");

        ds.save(&mut client, &vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(ds.load(&client).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_metric_history_missing() {
        let (mut client, run_id) = client_with_run();
        client.end_run(crate::client::RunStatus::Finished).unwrap();

        let ds = MetricHistoryDataset::new("mae").with_run_id(run_id);
        assert!(matches!(
            ds.load(&client).unwrap_err(),
            QuipuError::NotFound { .. }
        ));
    }

    #[test]
    fn test_metrics_collection_roundtrip() {
        let (mut client, _run_id) = client_with_run();
        let ds = MetricsDataset::new();

        let mut data = MetricsData::new();
        data.insert(
            "mse".to_string(),
            MetricItem::Single(MetricPoint::new(1.0, 1)),
        );
        data.insert(
            "mae".to_string(),
            MetricItem::History(vec![MetricPoint::new(1.0, 1), MetricPoint::new(2.0, 2)]),
        );

        ds.save(&mut client, &data).unwrap();
        let loaded = ds.load(&client).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_metrics_prefix() {
        let (mut client, run_id) = client_with_run();
        let ds = MetricsDataset::new().with_prefix("eval");

        let mut data = MetricsData::new();
        data.insert(
            "mse".to_string(),
            MetricItem::Single(MetricPoint::new(1.0, 0)),
        );
        ds.save(&mut client, &data).unwrap();

        // the stored key carries the prefix
        let keys = client.list_metric_keys(&run_id).unwrap();
        assert_eq!(keys, vec!["eval.mse"]);

        let loaded = ds.load(&client).unwrap();
        assert!(loaded.contains_key("eval.mse"));
    }

    #[test]
    fn test_metrics_prefix_filters_foreign_keys() {
        let (mut client, run_id) = client_with_run();
        client.log_metric(&run_id, "other", 9.0, 0).unwrap();

        let ds = MetricsDataset::new().with_prefix("eval");
        let mut data = MetricsData::new();
        data.insert(
            "mse".to_string(),
            MetricItem::Single(MetricPoint::new(1.0, 0)),
        );
        ds.save(&mut client, &data).unwrap();

        let loaded = ds.load(&client).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("eval.mse"));
    }

    #[test]
    fn test_for_partition_pins_run() {
        let (mut client, run_id) = client_with_run();
        MetricDataset::new("mse").save(&mut client, &0.5).unwrap();
        client.end_run(crate::client::RunStatus::Finished).unwrap();

        let scoped = MetricDataset::new("mse").for_partition("part", Some(run_id));
        assert_eq!(scoped.load(&client).unwrap(), 0.5);
    }
}
