//! Processing-state store — remembers what happened to every mailbox
//! message so repeated polls never re-trigger an action.
//!
//! Core invariant: at most one terminal record per message id. `Reassigned`
//! and `Skipped` are terminal immediately; `Failed` stays retryable until
//! the attempt cap is reached, at which point it too counts as terminal.

pub mod libsql;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::decision::SkipReason;
use crate::error::StateError;

pub use self::libsql::LibSqlStore;

/// Final disposition of one processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reassigned,
    Skipped(SkipReason),
    Failed,
}

impl Outcome {
    /// Short label for logging and state rows.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reassigned => "reassigned",
            Self::Skipped(_) => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// One row of processing history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingRecord {
    pub message_id: String,
    pub outcome: Outcome,
    /// Number of failed attempts so far.
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl ProcessingRecord {
    /// Terminal records are never overwritten or reprocessed.
    pub fn is_terminal(&self, max_attempts: u32) -> bool {
        match self.outcome {
            Outcome::Reassigned | Outcome::Skipped(_) => true,
            Outcome::Failed => self.attempts >= max_attempts,
        }
    }
}

/// Durable (or in-memory) record of processed message ids. The pipeline is
/// the single writer; reads happen before any network call for a message.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether this message id already carries a terminal record.
    async fn has_terminal_record(&self, message_id: &str) -> Result<bool, StateError>;

    /// Record an outcome for a message id.
    ///
    /// A `Failed` outcome increments the attempt counter; a terminal outcome
    /// closes the record. Overwriting an existing `Reassigned`/`Skipped`
    /// record is a `StateError::TerminalOverwrite`.
    async fn record(&self, message_id: &str, outcome: Outcome) -> Result<(), StateError>;

    /// How many failed attempts this message id has accumulated.
    async fn retry_count(&self, message_id: &str) -> Result<u32, StateError>;
}

/// Apply `record()` semantics to an optional existing record, producing the
/// row to write. Shared by both backends so they cannot drift.
pub(crate) fn next_record(
    existing: Option<&ProcessingRecord>,
    message_id: &str,
    outcome: Outcome,
) -> Result<ProcessingRecord, StateError> {
    if let Some(prior) = existing
        && matches!(prior.outcome, Outcome::Reassigned | Outcome::Skipped(_))
    {
        return Err(StateError::TerminalOverwrite {
            message_id: message_id.to_string(),
        });
    }

    let prior_attempts = existing.map(|r| r.attempts).unwrap_or(0);
    let attempts = match outcome {
        Outcome::Failed => prior_attempts + 1,
        _ => prior_attempts,
    };

    Ok(ProcessingRecord {
        message_id: message_id.to_string(),
        outcome,
        attempts,
        recorded_at: Utc::now(),
    })
}

/// In-memory store, for tests and ephemeral runs.
pub struct MemoryStore {
    records: Mutex<HashMap<String, ProcessingRecord>>,
    max_attempts: u32,
}

impl MemoryStore {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_attempts,
        }
    }

    /// Snapshot a record (test helper).
    pub async fn get(&self, message_id: &str) -> Option<ProcessingRecord> {
        self.records.lock().await.get(message_id).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn has_terminal_record(&self, message_id: &str) -> Result<bool, StateError> {
        Ok(self
            .records
            .lock()
            .await
            .get(message_id)
            .is_some_and(|r| r.is_terminal(self.max_attempts)))
    }

    async fn record(&self, message_id: &str, outcome: Outcome) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        let row = next_record(records.get(message_id), message_id, outcome)?;
        records.insert(message_id.to_string(), row);
        Ok(())
    }

    async fn retry_count(&self, message_id: &str) -> Result<u32, StateError> {
        Ok(self
            .records
            .lock()
            .await
            .get(message_id)
            .map(|r| r.attempts)
            .unwrap_or(0))
    }
}
