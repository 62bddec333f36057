//! SQLite-backed persistence for IncidentTrace and ExecutionRecord.
//!
//! The teacher's `memory_service.rs` logged action traces as `println!`
//! stubs; this is the same pooled-connection shape applied to an actually
//! queryable incident trace.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use shared_types::{ExecutionRecord, IncidentId, TraceEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task;

type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum TraceStoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct TraceStore {
    pool: Arc<DbPool>,
}

impl TraceStore {
    pub fn open(db_path: &str) -> Result<Self, TraceStoreError> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(1))
            .idle_timeout(Some(Duration::from_secs(300)))
            .max_lifetime(Some(Duration::from_secs(1800)))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS incident_trace (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                stage TEXT NOT NULL,
                message TEXT NOT NULL,
                attributes_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_incident_trace_incident_id
                ON incident_trace(incident_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS execution_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                record_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_execution_record_incident_id
                ON execution_record(incident_id)",
            [],
        )?;

        Ok(TraceStore {
            pool: Arc::new(pool),
        })
    }

    pub async fn append_trace_event(
        &self,
        incident_id: IncidentId,
        event: TraceEvent,
    ) -> Result<(), TraceStoreError> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            let attributes_json = serde_json::to_string(&event.attributes)?;
            conn.execute(
                "INSERT INTO incident_trace
                    (incident_id, timestamp, level, stage, message, attributes_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    incident_id.to_string(),
                    event.timestamp.to_rfc3339(),
                    serde_json::to_string(&event.level)?,
                    serde_json::to_string(&event.stage)?,
                    event.message,
                    attributes_json,
                ],
            )?;
            Ok::<(), TraceStoreError>(())
        })
        .await??;
        Ok(())
    }

    pub async fn append_execution_record(
        &self,
        incident_id: IncidentId,
        record: ExecutionRecord,
    ) -> Result<(), TraceStoreError> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            let record_json = serde_json::to_string(&record)?;
            conn.execute(
                "INSERT INTO execution_record (incident_id, timestamp, record_json)
                 VALUES (?1, ?2, ?3)",
                params![
                    incident_id.to_string(),
                    record.timestamp.to_rfc3339(),
                    record_json,
                ],
            )?;
            Ok::<(), TraceStoreError>(())
        })
        .await??;
        Ok(())
    }

    /// Returns the persisted trace for an incident, ordered oldest-first.
    pub async fn trace_for(&self, incident_id: IncidentId) -> Result<Vec<TraceEvent>, TraceStoreError> {
        let pool = self.pool.clone();
        let id = incident_id.to_string();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT timestamp, level, stage, message, attributes_json
                 FROM incident_trace WHERE incident_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![id], |row| {
                let timestamp: String = row.get(0)?;
                let level: String = row.get(1)?;
                let stage: String = row.get(2)?;
                let message: String = row.get(3)?;
                let attributes_json: String = row.get(4)?;
                Ok((timestamp, level, stage, message, attributes_json))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (timestamp, level, stage, message, attributes_json) = row?;
                events.push(TraceEvent {
                    timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    level: serde_json::from_str(&level).unwrap_or(shared_types::TraceLevel::Info),
                    stage: serde_json::from_str(&stage)
                        .unwrap_or(shared_types::TraceStage::Received),
                    message,
                    attributes: serde_json::from_str(&attributes_json).unwrap_or_default(),
                });
            }
            Ok::<Vec<TraceEvent>, TraceStoreError>(events)
        })
        .await?
    }

    /// Returns the persisted execution records for an incident, ordered
    /// oldest-first.
    pub async fn execution_records_for(
        &self,
        incident_id: IncidentId,
    ) -> Result<Vec<ExecutionRecord>, TraceStoreError> {
        let pool = self.pool.clone();
        let id = incident_id.to_string();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn
                .prepare("SELECT record_json FROM execution_record WHERE incident_id = ?1 ORDER BY id ASC")?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for row in rows {
                let record_json = row?;
                records.push(serde_json::from_str(&record_json)?);
            }
            Ok::<Vec<ExecutionRecord>, TraceStoreError>(records)
        })
        .await?
    }
}
