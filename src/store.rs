//! Run Storage
//!
//! SQLite persistence for completed runs. Lives outside the engine: the
//! engine never reads or writes it, the binaries do. A run is written in one
//! transaction and never modified afterwards.
//!
//! # Schema Design
//!
//! ```sql
//! CREATE TABLE run_summaries (
//!     run_id TEXT PRIMARY KEY,
//!     fingerprint_hash TEXT NOT NULL,
//!     processed_at TEXT NOT NULL,
//!     persisted_at INTEGER NOT NULL,
//!     total_records INTEGER NOT NULL,
//!     valid_records INTEGER NOT NULL,
//!     anomalous_records INTEGER NOT NULL,
//!     summary_json TEXT NOT NULL
//! ) WITHOUT ROWID;
//!
//! CREATE TABLE scored_readings (
//!     run_id TEXT NOT NULL,
//!     seq INTEGER NOT NULL,
//!     device_id TEXT,
//!     reading_timestamp TEXT,
//!     temperature REAL,
//!     location TEXT NOT NULL,
//!     is_valid INTEGER NOT NULL,
//!     is_anomaly INTEGER NOT NULL,
//!     anomaly_score REAL NOT NULL,
//!     record_json TEXT NOT NULL,
//!     PRIMARY KEY (run_id, seq)
//! ) WITHOUT ROWID;
//! ```

use crate::engine::{EnrichedReading, RunOutput, RunSummary};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Schema version for migrations.
const SCHEMA_VERSION: u32 = 1;

/// Row of the run listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRunInfo {
    pub run_id: String,
    pub fingerprint_hash: String,
    pub processed_at: String,
    pub total_records: i64,
    pub valid_records: i64,
    pub anomalous_records: i64,
}

/// Storage for completed runs.
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RunStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, RunStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), RunStoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match current_version {
            None => {
                Self::create_schema_v1(&conn)?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    [SCHEMA_VERSION],
                )?;
                info!("Created run store schema v{}", SCHEMA_VERSION);
            }
            Some(v) if v == SCHEMA_VERSION => {
                debug!("Run store schema at v{}", SCHEMA_VERSION);
            }
            Some(v) => {
                warn!(
                    "Run store schema version mismatch: expected {}, got {}",
                    SCHEMA_VERSION, v
                );
            }
        }

        Ok(())
    }

    fn create_schema_v1(conn: &Connection) -> Result<(), RunStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS run_summaries (
                run_id TEXT PRIMARY KEY,
                fingerprint_hash TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                persisted_at INTEGER NOT NULL,
                total_records INTEGER NOT NULL,
                valid_records INTEGER NOT NULL,
                anomalous_records INTEGER NOT NULL,
                summary_json TEXT NOT NULL
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_run_summaries_processed_at
                ON run_summaries(processed_at);

            CREATE TABLE IF NOT EXISTS scored_readings (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                device_id TEXT,
                reading_timestamp TEXT,
                temperature REAL,
                location TEXT NOT NULL,
                is_valid INTEGER NOT NULL,
                is_anomaly INTEGER NOT NULL,
                anomaly_score REAL NOT NULL,
                record_json TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_scored_readings_anomaly
                ON scored_readings(run_id, is_anomaly);
        "#,
        )?;
        Ok(())
    }

    /// Persist a completed run. All rows are written in one transaction.
    pub fn persist(&self, output: &RunOutput) -> Result<(), RunStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT run_id FROM run_summaries WHERE run_id = ?",
                [output.run_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(RunStoreError::AlreadyExists(output.run_id.to_string()));
        }

        let summary = &output.summary;
        tx.execute(
            r#"INSERT INTO run_summaries
               (run_id, fingerprint_hash, processed_at, persisted_at,
                total_records, valid_records, anomalous_records, summary_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                output.run_id.as_str(),
                output.fingerprint.hash_hex,
                summary.processed_at.to_rfc3339(),
                Utc::now().timestamp_millis(),
                summary.total_processed_records as i64,
                summary.valid_record_count as i64,
                summary.anomalous_record_count as i64,
                serde_json::to_string(summary)?,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO scored_readings
                   (run_id, seq, device_id, reading_timestamp, temperature, location,
                    is_valid, is_anomaly, anomaly_score, record_json)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            )?;
            for (seq, record) in output.records.iter().enumerate() {
                let validated = &record.scored.validated;
                stmt.execute(params![
                    output.run_id.as_str(),
                    seq as i64,
                    validated.reading.device_id,
                    validated.reading.reading_timestamp.map(|ts| ts.to_rfc3339()),
                    validated.reading.temperature,
                    validated.location,
                    validated.is_valid,
                    record.scored.is_anomaly,
                    record.scored.anomaly_score,
                    serde_json::to_string(record)?,
                ])?;
            }
        }

        tx.commit()?;
        info!(
            run_id = %output.run_id,
            records = output.records.len(),
            "Persisted run"
        );
        Ok(())
    }

    /// Load a run's summary.
    pub fn get_summary(&self, run_id: &str) -> Result<RunSummary, RunStoreError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT summary_json FROM run_summaries WHERE run_id = ?",
                [run_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(RunStoreError::NotFound(run_id.to_string())),
        }
    }

    /// Most recently processed runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<StoredRunInfo>, RunStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT run_id, fingerprint_hash, processed_at,
                      total_records, valid_records, anomalous_records
               FROM run_summaries
               ORDER BY processed_at DESC, run_id ASC
               LIMIT ?"#,
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(StoredRunInfo {
                run_id: row.get(0)?,
                fingerprint_hash: row.get(1)?,
                processed_at: row.get(2)?,
                total_records: row.get(3)?,
                valid_records: row.get(4)?,
                anomalous_records: row.get(5)?,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Load a run's records in their original order.
    pub fn load_records(
        &self,
        run_id: &str,
        anomalies_only: bool,
    ) -> Result<Vec<EnrichedReading>, RunStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT record_json FROM scored_readings
               WHERE run_id = ?1 AND (?2 = 0 OR is_anomaly = 1)
               ORDER BY seq ASC"#,
        )?;
        let rows = stmt.query_map(params![run_id, anomalies_only], |row| {
            row.get::<_, String>(0)
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }
}

/// Run store errors.
#[derive(Debug)]
pub enum RunStoreError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    AlreadyExists(String),
    NotFound(String),
}

impl std::fmt::Display for RunStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::AlreadyExists(id) => write!(f, "Run already persisted: {}", id),
            Self::NotFound(id) => write!(f, "Run not found: {}", id),
        }
    }
}

impl std::error::Error for RunStoreError {}

impl From<rusqlite::Error> for RunStoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for RunStoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}
