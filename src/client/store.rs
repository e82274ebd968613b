//! `SQLite` persistence for the tracking client.

use super::{
    Experiment, LifecycleStage, MetricRecord, ModelArtifact, ModelMetadata,
    RegisteredModelVersion, Run, RunId, RunInfo, RunStatus,
};
use crate::error::{QuipuError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;

/// `SQLite` store holding experiments, runs, metrics, and model artifacts.
#[derive(Debug)]
pub struct TrackingStore {
    conn: Connection,
}

impl TrackingStore {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            -- Experiments
            CREATE TABLE IF NOT EXISTS experiments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                lifecycle TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );

            -- Runs
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_experiment ON runs(experiment_id);

            -- Run tags
            CREATE TABLE IF NOT EXISTS run_tags (
                run_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY(run_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_run_tags_kv ON run_tags(key, value);

            -- Metrics
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value REAL NOT NULL,
                step INTEGER NOT NULL,
                logged_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_metrics_run_key ON metrics(run_id, key);

            -- Model artifacts
            CREATE TABLE IF NOT EXISTS model_artifacts (
                run_id TEXT NOT NULL,
                artifact_path TEXT NOT NULL,
                flavor TEXT NOT NULL,
                data BLOB NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                logged_at TEXT NOT NULL,
                PRIMARY KEY(run_id, artifact_path)
            );

            -- Registered models
            CREATE TABLE IF NOT EXISTS registered_models (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS model_versions (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                run_id TEXT NOT NULL,
                artifact_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY(name, version)
            );
            ",
        )?;
        Ok(())
    }

    // ==================== Experiments ====================

    /// Insert an experiment.
    pub fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.conn.execute(
            "INSERT INTO experiments (id, name, lifecycle, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                experiment.id,
                experiment.name,
                experiment.lifecycle.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get an experiment by name, if it exists.
    pub fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let row = self.conn.query_row(
            "SELECT id, name, lifecycle FROM experiments WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        );

        match row {
            Ok((id, name, lifecycle)) => Ok(Some(Experiment {
                id,
                name,
                lifecycle: lifecycle.parse()?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(QuipuError::Database(e)),
        }
    }

    /// Update an experiment's lifecycle stage.
    pub fn set_experiment_lifecycle(&self, id: &str, lifecycle: LifecycleStage) -> Result<()> {
        self.conn.execute(
            "UPDATE experiments SET lifecycle = ?1 WHERE id = ?2",
            params![lifecycle.to_string(), id],
        )?;
        Ok(())
    }

    // ==================== Runs ====================

    /// Insert a run with its tags.
    pub fn insert_run(&self, run: &Run) -> Result<()> {
        self.conn.execute(
            r"INSERT INTO runs (id, experiment_id, status, started_at, ended_at)
              VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.info.run_id.to_string(),
                run.info.experiment_id,
                run.info.status.to_string(),
                run.info.started_at.to_rfc3339(),
                run.info.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        for (key, value) in &run.tags {
            self.set_tag(&run.info.run_id, key, value)?;
        }
        Ok(())
    }

    /// Update a run's status and end time.
    pub fn update_run_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?1, ended_at = ?2 WHERE id = ?3",
            params![
                status.to_string(),
                ended_at.map(|t| t.to_rfc3339()),
                run_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Set one tag on a run, replacing a previous value.
    pub fn set_tag(&self, run_id: &RunId, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO run_tags (run_id, key, value) VALUES (?1, ?2, ?3)",
            params![run_id.to_string(), key, value],
        )?;
        Ok(())
    }

    /// Get a run by id, with its tags.
    pub fn get_run(&self, run_id: &RunId) -> Result<Run> {
        let row = self
            .conn
            .query_row(
                "SELECT id, experiment_id, status, started_at, ended_at FROM runs WHERE id = ?1",
                params![run_id.to_string()],
                Self::run_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => QuipuError::NotFound {
                    kind: "run".to_string(),
                    name: run_id.to_string(),
                },
                e => QuipuError::Database(e),
            })?;

        let info = Self::row_to_info(row)?;
        let tags = self.run_tags(run_id)?;
        Ok(Run { info, tags })
    }

    /// All runs carrying a given tag key/value, oldest first.
    pub fn search_runs_by_tag(&self, key: &str, value: &str) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(
            r"SELECT r.id, r.experiment_id, r.status, r.started_at, r.ended_at
              FROM runs r JOIN run_tags t ON r.id = t.run_id
              WHERE t.key = ?1 AND t.value = ?2
              ORDER BY r.rowid",
        )?;
        let rows = stmt.query_map(params![key, value], Self::run_row)?;

        let mut runs = Vec::new();
        for row in rows {
            let info = Self::row_to_info(row?)?;
            let tags = self.run_tags(&info.run_id)?;
            runs.push(Run { info, tags });
        }
        Ok(runs)
    }

    fn run_tags(&self, run_id: &RunId) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM run_tags WHERE run_id = ?1")?;
        let rows = stmt.query_map(params![run_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut tags = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            tags.insert(key, value);
        }
        Ok(tags)
    }

    #[allow(clippy::type_complexity)]
    fn run_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, String, Option<String>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }

    fn row_to_info(row: (String, String, String, String, Option<String>)) -> Result<RunInfo> {
        let (id, experiment_id, status, started_at, ended_at) = row;
        Ok(RunInfo {
            run_id: id.parse()?,
            experiment_id,
            status: status.parse()?,
            started_at: parse_timestamp(&started_at)?,
            ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    // ==================== Metrics ====================

    /// Insert one metric point.
    pub fn insert_metric(
        &self,
        run_id: &RunId,
        key: &str,
        value: f64,
        step: u64,
        logged_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            r"INSERT INTO metrics (run_id, key, value, step, logged_at)
              VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id.to_string(),
                key,
                value,
                i64::try_from(step).unwrap_or(i64::MAX),
                logged_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// History of one metric, by step then insertion order.
    pub fn metric_history(&self, run_id: &RunId, key: &str) -> Result<Vec<MetricRecord>> {
        let mut stmt = self.conn.prepare(
            r"SELECT key, value, step, logged_at FROM metrics
              WHERE run_id = ?1 AND key = ?2 ORDER BY step, id",
        )?;
        let rows = stmt.query_map(params![run_id.to_string(), key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (key, value, step, logged_at) = row?;
            records.push(MetricRecord {
                key,
                value,
                step: u64::try_from(step).unwrap_or(0),
                timestamp: parse_timestamp(&logged_at)?,
            });
        }
        Ok(records)
    }

    /// Distinct metric keys logged in a run, sorted.
    pub fn list_metric_keys(&self, run_id: &RunId) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT key FROM metrics WHERE run_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![run_id.to_string()], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    // ==================== Models ====================

    /// Store a model artifact, replacing any previous artifact at the same
    /// path within the run.
    pub fn put_model_artifact(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        flavor: &str,
        data: &[u8],
        metadata: &ModelMetadata,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        self.conn.execute(
            r"INSERT OR REPLACE INTO model_artifacts
              (run_id, artifact_path, flavor, data, metadata_json, logged_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id.to_string(),
                artifact_path,
                flavor,
                data,
                metadata_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a model artifact.
    pub fn get_model_artifact(&self, run_id: &RunId, artifact_path: &str) -> Result<ModelArtifact> {
        let row = self
            .conn
            .query_row(
                r"SELECT flavor, data, metadata_json FROM model_artifacts
                  WHERE run_id = ?1 AND artifact_path = ?2",
                params![run_id.to_string(), artifact_path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => QuipuError::NotFound {
                    kind: "model artifact".to_string(),
                    name: format!("{run_id}/{artifact_path}"),
                },
                e => QuipuError::Database(e),
            })?;

        let (flavor, data, metadata_json) = row;
        Ok(ModelArtifact {
            flavor,
            data,
            metadata: serde_json::from_str(&metadata_json)?,
        })
    }

    /// Create a registered model if it does not exist.
    pub fn ensure_registered_model(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO registered_models (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Add the next version of a registered model, returning its number.
    pub fn insert_model_version(
        &self,
        name: &str,
        run_id: &RunId,
        artifact_path: &str,
    ) -> Result<u32> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM model_versions WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        self.conn.execute(
            r"INSERT INTO model_versions (name, version, run_id, artifact_path, created_at)
              VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                next,
                run_id.to_string(),
                artifact_path,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(u32::try_from(next).unwrap_or(0))
    }

    /// Latest version of a registered model.
    pub fn latest_model_version(&self, name: &str) -> Result<RegisteredModelVersion> {
        let row = self
            .conn
            .query_row(
                r"SELECT name, version, run_id, artifact_path FROM model_versions
                  WHERE name = ?1 ORDER BY version DESC LIMIT 1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => QuipuError::NotFound {
                    kind: "registered model".to_string(),
                    name: name.to_string(),
                },
                e => QuipuError::Database(e),
            })?;

        let (name, version, run_id, artifact_path) = row;
        Ok(RegisteredModelVersion {
            name,
            version: u32::try_from(version).unwrap_or(0),
            run_id: run_id.parse()?,
            artifact_path,
        })
    }

    /// Names of all registered models, sorted.
    pub fn list_registered_models(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM registered_models ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| QuipuError::Configuration(format!("invalid timestamp in store: {s}")))
}
