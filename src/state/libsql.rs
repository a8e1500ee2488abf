//! libSQL backend for the processing-state store.
//!
//! One row per message id in a local database file, so a process restart
//! never re-triggers an action that already completed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use tracing::info;

use crate::decision::SkipReason;
use crate::error::StateError;
use crate::state::{Outcome, ProcessingRecord, StateStore, next_record};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS processing_records (
        message_id TEXT PRIMARY KEY,
        outcome TEXT NOT NULL,
        skip_reason TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        recorded_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_processing_outcome
        ON processing_records(outcome);
"#;

/// libSQL-backed state store.
///
/// Holds a single connection reused for all operations; the pipeline is the
/// only writer and runs one cycle at a time.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<libsql::Database>,
    conn: Connection,
    max_attempts: u32,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn open(path: &Path, max_attempts: u32) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StateError::Backend(format!("Failed to create state directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StateError::Backend(format!("Failed to open state database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StateError::Backend(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
            max_attempts,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "State database opened");
        Ok(store)
    }

    /// In-memory database (for tests).
    pub async fn open_memory(max_attempts: u32) -> Result<Self, StateError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StateError::Backend(format!("Failed to create in-memory db: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StateError::Backend(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
            max_attempts,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StateError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| StateError::Backend(format!("Schema init failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<ProcessingRecord>, StateError> {
        let mut rows = self
            .conn
            .query(
                "SELECT message_id, outcome, skip_reason, attempts, recorded_at
                 FROM processing_records WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| StateError::Backend(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record =
                    row_to_record(&row).map_err(|e| StateError::Backend(format!("row: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StateError::Backend(format!("get: {e}"))),
        }
    }
}

#[async_trait]
impl StateStore for LibSqlStore {
    async fn has_terminal_record(&self, message_id: &str) -> Result<bool, StateError> {
        Ok(self
            .get(message_id)
            .await?
            .is_some_and(|r| r.is_terminal(self.max_attempts)))
    }

    async fn record(&self, message_id: &str, outcome: Outcome) -> Result<(), StateError> {
        let existing = self.get(message_id).await?;
        let row = next_record(existing.as_ref(), message_id, outcome)?;
        let (outcome_str, skip_reason) = outcome_to_parts(&row.outcome);

        self.conn
            .execute(
                "INSERT OR REPLACE INTO processing_records
                    (message_id, outcome, skip_reason, attempts, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message_id,
                    outcome_str,
                    opt_text(skip_reason),
                    i64::from(row.attempts),
                    row.recorded_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StateError::Backend(format!("record: {e}")))?;
        Ok(())
    }

    async fn retry_count(&self, message_id: &str) -> Result<u32, StateError> {
        Ok(self
            .get(message_id)
            .await?
            .map(|r| r.attempts)
            .unwrap_or(0))
    }
}

// ── Row conversions ─────────────────────────────────────────────────

fn row_to_record(row: &libsql::Row) -> Result<ProcessingRecord, libsql::Error> {
    let outcome_str: String = row.get(1)?;
    let skip_reason: Option<String> = row.get(2).ok();
    let attempts: i64 = row.get(3)?;
    let recorded_str: String = row.get(4)?;

    Ok(ProcessingRecord {
        message_id: row.get(0)?,
        outcome: parts_to_outcome(&outcome_str, skip_reason.as_deref()),
        attempts: attempts.max(0) as u32,
        recorded_at: parse_datetime(&recorded_str),
    })
}

fn outcome_to_parts(outcome: &Outcome) -> (&'static str, Option<&'static str>) {
    match outcome {
        Outcome::Reassigned => ("reassigned", None),
        Outcome::Skipped(reason) => ("skipped", Some(reason.label())),
        Outcome::Failed => ("failed", None),
    }
}

fn parts_to_outcome(outcome: &str, skip_reason: Option<&str>) -> Outcome {
    match outcome {
        "reassigned" => Outcome::Reassigned,
        "skipped" => Outcome::Skipped(match skip_reason {
            Some("low_confidence") => SkipReason::LowConfidence,
            Some("already_assigned") => SkipReason::AlreadyAssigned,
            Some("dry_run") => SkipReason::DryRun,
            _ => SkipReason::NotApplicable,
        }),
        _ => Outcome::Failed,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}
