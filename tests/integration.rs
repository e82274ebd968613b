//! Integration tests for the quipu tracking workflow.

use quipu::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn setup() -> (TempDir, TrackingClient) {
    let dir = TempDir::new().expect("temp dir");
    let uri = TrackingUri::Sqlite(dir.path().join("tracking.db"));
    let client = TrackingClient::connect(&uri).expect("client");
    (dir, client)
}

fn reopen(dir: &TempDir) -> TrackingClient {
    let uri = TrackingUri::Sqlite(dir.path().join("tracking.db"));
    TrackingClient::connect(&uri).expect("client")
}

fn metric_partitions(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), *v))
        .collect()
}

#[test]
fn test_partitioned_metric_save_and_load() {
    let (dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedDataset::new(MetricDataset::new("mse"));
    dataset
        .save(&mut client, &metric_partitions(&[("a", 1.0), ("b", 2.0)]))
        .expect("save");
    client.end_run(RunStatus::Finished).expect("end");

    // a fresh client sees the children through the pinned parent
    let mut client = reopen(&dir);
    let dataset =
        PartitionedDataset::new(MetricDataset::new("mse")).with_run_id(parent.clone());
    let metrics = dataset.load(&mut client).expect("load");

    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics["a"], 1.0);
    assert_eq!(metrics["b"], 2.0);
}

#[test]
fn test_partitioned_metric_creates_named_child_runs() {
    let (_dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedDataset::new(MetricDataset::new("mse"));
    dataset
        .save(
            &mut client,
            &metric_partitions(&[("store_1", 0.5), ("store_2", 0.7)]),
        )
        .expect("save");

    let children = client.search_child_runs(&parent).expect("children");
    assert_eq!(children.len(), 2);
    let names: Vec<_> = children.iter().filter_map(Run::name).collect();
    assert_eq!(names, vec!["store_1", "store_2"]);

    for child in &children {
        let key = MetricDataset::new("mse").with_run_id(child.info.run_id.clone());
        let expected = if child.name() == Some("store_1") { 0.5 } else { 0.7 };
        assert_eq!(key.load(&client).expect("metric"), expected);
    }
}

#[test]
fn test_partitioned_metric_history_save_and_load() {
    let (dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedDataset::new(MetricHistoryDataset::new("mae"));
    let mut data = BTreeMap::new();
    data.insert("a".to_string(), vec![1.0, 2.0, 3.0]);
    data.insert("b".to_string(), vec![2.0, 3.0, 4.0]);
    dataset.save(&mut client, &data).expect("save");

    let mut client = reopen(&dir);
    let dataset =
        PartitionedDataset::new(MetricHistoryDataset::new("mae")).with_run_id(parent);
    let histories = dataset.load(&mut client).expect("load");

    assert_eq!(histories["a"], vec![1.0, 2.0, 3.0]);
    assert_eq!(histories["b"], vec![2.0, 3.0, 4.0]);
}

#[test]
fn test_partitioned_metrics_collection_save_and_load() {
    let (_dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let mut a = MetricsData::new();
    a.insert("mse".to_string(), MetricItem::Single(MetricPoint::new(1.0, 1)));
    a.insert(
        "mae".to_string(),
        MetricItem::History(vec![MetricPoint::new(1.0, 1), MetricPoint::new(2.0, 2)]),
    );
    let mut b = MetricsData::new();
    b.insert("mse".to_string(), MetricItem::Single(MetricPoint::new(2.0, 1)));
    b.insert(
        "rmse".to_string(),
        MetricItem::History(vec![MetricPoint::new(2.0, 1), MetricPoint::new(3.0, 2)]),
    );
    let mut data = BTreeMap::new();
    data.insert("a".to_string(), a.clone());
    data.insert("b".to_string(), b.clone());

    let dataset = PartitionedDataset::new(MetricsDataset::new());
    dataset.save(&mut client, &data).expect("save");

    let dataset = PartitionedDataset::new(MetricsDataset::new()).with_run_id(parent);
    let loaded = dataset.load(&mut client).expect("load");

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded["a"], a);
    assert_eq!(loaded["b"], b);
}

#[test]
fn test_partitioned_model_save_and_load() {
    let (dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedDataset::new(ModelLoggerDataset::new("sklearn"));
    let mut models = BTreeMap::new();
    models.insert("a".to_string(), b"model-a".to_vec());
    models.insert("b".to_string(), b"model-b".to_vec());
    dataset.save(&mut client, &models).expect("save");

    let children = client.search_child_runs(&parent).expect("children");
    assert_eq!(children.len(), 2);

    let mut client = reopen(&dir);
    let dataset =
        PartitionedDataset::new(ModelLoggerDataset::new("sklearn")).with_run_id(parent);
    let loaded = dataset.load(&mut client).expect("load");

    assert_eq!(loaded["a"], b"model-a");
    assert_eq!(loaded["b"], b"model-b");
}

#[test]
fn test_partitioned_model_save_multiple_times_and_load() {
    let (_dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedDataset::new(ModelLoggerDataset::new("sklearn"));
    let mut models = BTreeMap::new();
    models.insert("a".to_string(), b"model-a".to_vec());
    models.insert("b".to_string(), b"model-b".to_vec());
    dataset.save(&mut client, &models).expect("save");

    let dataset2 = PartitionedDataset::new(
        ModelLoggerDataset::new("sklearn").with_artifact_path("model2"),
    );
    let mut swapped = BTreeMap::new();
    swapped.insert("a".to_string(), b"model-b".to_vec());
    swapped.insert("b".to_string(), b"model-a".to_vec());
    dataset2.save(&mut client, &swapped).expect("save");

    // the second save reuses the child runs instead of creating new ones
    let children = client.search_child_runs(&parent).expect("children");
    assert_eq!(children.len(), 2);

    let dataset =
        PartitionedDataset::new(ModelLoggerDataset::new("sklearn")).with_run_id(parent.clone());
    let dataset2 = PartitionedDataset::new(
        ModelLoggerDataset::new("sklearn").with_artifact_path("model2"),
    )
    .with_run_id(parent);

    let first = dataset.load(&mut client).expect("load");
    let second = dataset2.load(&mut client).expect("load");
    assert_eq!(first["a"], second["b"]);
    assert_eq!(first["b"], second["a"]);
}

#[test]
fn test_partitioned_model_dynamic_registered_name() {
    let (_dir, mut client) = setup();
    client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedModelDataset::new(
        ModelLoggerDataset::new("sklearn").with_registered_model_name("test"),
    );
    let mut models = BTreeMap::new();
    models.insert("store_1".to_string(), b"model-a".to_vec());
    models.insert("store_2".to_string(), b"model-b".to_vec());
    dataset.save(&mut client, &models).expect("save");

    let registered = client.list_registered_models().expect("models");
    assert_eq!(registered, vec!["store_1\\test", "store_2\\test"]);

    for (name, expected) in [("store_1\\test", b"model-a"), ("store_2\\test", b"model-b")] {
        let version = client.latest_model_version(name).expect("version");
        let artifact = client
            .load_model(&version.run_id, &version.artifact_path)
            .expect("artifact");
        assert_eq!(artifact.flavor, "sklearn");
        assert_eq!(artifact.data, expected);
    }
}

#[test]
fn test_partitioned_model_create_run_when_none_active() {
    let (_dir, mut client) = setup();

    let dataset = PartitionedDataset::new(ModelLoggerDataset::new("sklearn"));
    let mut models = BTreeMap::new();
    models.insert("a".to_string(), b"model-a".to_vec());
    models.insert("b".to_string(), b"model-b".to_vec());
    dataset.save(&mut client, &models).expect("save");

    // the dispatcher started and kept a parent run
    let parent = dataset.parent(&mut client).expect("parent");
    let children = client.search_child_runs(&parent.info.run_id).expect("children");
    assert_eq!(children.len(), 2);

    let loaded = dataset.load(&mut client).expect("load");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded["a"], b"model-a");
}

#[test]
fn test_partitioned_model_normalized_names() {
    let (_dir, mut client) = setup();
    let parent = client.start_run(StartRunOptions::default()).expect("run");

    let dataset = PartitionedDataset::new(
        ModelLoggerDataset::new("sklearn").with_registered_model_name("test"),
    );
    let mut models = BTreeMap::new();
    models.insert("a/b/c".to_string(), b"model-a".to_vec());
    dataset.save(&mut client, &models).expect("save");

    let children = client.search_child_runs(&parent).expect("children");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), Some("a\\b\\c"));

    let registered = client.list_registered_models().expect("models");
    assert_eq!(registered, vec!["a\\b\\c\\test"]);
}

#[test]
fn test_config_setup_to_partitioned_save() {
    let dir = TempDir::new().expect("temp dir");
    let yaml = format!(
        "server:\n  tracking_uri: sqlite://{}\ntracking:\n  experiment:\n    name: stores\n",
        dir.path().join("tracking.db").display()
    );
    let config = TrackingConfig::from_yaml_str(&yaml).expect("config");

    let mut client = config
        .setup(
            &ProjectContext::new(dir.path()),
            &ConnectionRegistry::with_builtins(),
        )
        .expect("setup");

    let parent = config.start_configured_run(&mut client).expect("run");
    let dataset = PartitionedDataset::new(MetricDataset::new("mse"));
    dataset
        .save(
            &mut client,
            &metric_partitions(&[("store_1", 0.5), ("store_2", 0.7)]),
        )
        .expect("save");
    client.end_run(RunStatus::Finished).expect("end");

    let run = client.get_run(&parent).expect("run");
    assert_eq!(run.info.status, RunStatus::Finished);

    let experiment = client
        .get_experiment_by_name("stores")
        .expect("query")
        .expect("experiment");
    assert_eq!(run.info.experiment_id, experiment.id);

    let mut client = reopen(&dir);
    let dataset = PartitionedDataset::new(MetricDataset::new("mse")).with_run_id(parent);
    let metrics = dataset.load(&mut client).expect("load");
    assert_eq!(metrics["store_1"], 0.5);
    assert_eq!(metrics["store_2"], 0.7);
}

#[test]
fn test_connection_resolution_end_to_end() {
    let registry = ConnectionRegistry::with_builtins();
    let empty = OptionMap::new();

    // the native keyword passes through unchanged, whatever the options
    let mut options = OptionMap::new();
    options.insert("host".to_string(), "ignored".to_string());
    assert_eq!(
        registry
            .resolve_tracking_uri("databricks", &empty, &options)
            .expect("resolve"),
        "databricks"
    );
    assert_eq!(
        registry
            .resolve_registry_uri("databricks", &empty, &empty)
            .expect("resolve"),
        "databricks"
    );

    // the workspace provider builds the full URI from its options
    let mut options = OptionMap::new();
    options.insert("subscription_id".to_string(), "a".to_string());
    options.insert("resource_group".to_string(), "b".to_string());
    options.insert("workspace_name".to_string(), "c".to_string());
    assert_eq!(
        registry
            .resolve_tracking_uri("azureml", &empty, &options)
            .expect("resolve"),
        "azureml://subscriptions/a/resourcegroups/b/workspaces/c"
    );

    // unknown names are a configuration error
    assert!(registry
        .resolve_tracking_uri("unknown", &empty, &empty)
        .is_err());
}
