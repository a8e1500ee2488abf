//! Pipeline orchestrator — drives one full cycle: read, parse, predict,
//! decide, act, record.
//!
//! Per-message isolation: one bad message never aborts the batch. The only
//! failures that end a cycle early are the initial mailbox fetch (no
//! messages means nothing to isolate) and state-store errors, which would
//! otherwise corrupt processing history.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::decision::{self, Decision, SkipReason};
use crate::error::Error;
use crate::mailbox::{MailboxReader, RawMessage};
use crate::notification;
use crate::predict::Predictor;
use crate::state::{Outcome, StateStore};
use crate::tracker::IssueTracker;

/// Knobs the orchestrator needs from the configuration surface.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub dry_run: bool,
    pub max_attempts: u32,
}

/// Outcome tallies for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    /// Messages skipped because they already carry a terminal record.
    pub deduplicated: usize,
    pub reassigned: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The orchestrator. Sole owner of cycle sequencing — never run two cycles
/// concurrently against the same mailbox/state pair.
pub struct Pipeline {
    mailbox: Arc<dyn MailboxReader>,
    predictor: Arc<dyn Predictor>,
    tracker: Arc<dyn IssueTracker>,
    state: Arc<dyn StateStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        mailbox: Arc<dyn MailboxReader>,
        predictor: Arc<dyn Predictor>,
        tracker: Arc<dyn IssueTracker>,
        state: Arc<dyn StateStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            mailbox,
            predictor,
            tracker,
            state,
            settings,
        }
    }

    /// Run one complete pass over currently-unseen mailbox messages.
    pub async fn run_cycle(&self) -> Result<CycleReport, Error> {
        let cycle = Uuid::new_v4();

        // A mailbox-fetch failure is cycle-fatal; the next scheduled cycle
        // retries with a fresh connection.
        let messages = self.mailbox.list_unseen().await?;

        let mut report = CycleReport {
            fetched: messages.len(),
            ..CycleReport::default()
        };
        if !messages.is_empty() {
            info!(cycle = %cycle, fetched = messages.len(), "Cycle started");
        }

        for raw in &messages {
            // Dedup before any network call for this message.
            if self.state.has_terminal_record(&raw.message_id).await? {
                debug!(cycle = %cycle, message_id = %raw.message_id, "Already processed");
                report.deduplicated += 1;
                continue;
            }

            match self.process_message(raw).await? {
                Outcome::Reassigned => report.reassigned += 1,
                Outcome::Skipped(_) => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        if report.fetched > 0 {
            info!(
                cycle = %cycle,
                reassigned = report.reassigned,
                skipped = report.skipped,
                failed = report.failed,
                deduplicated = report.deduplicated,
                "Cycle complete"
            );
        }
        Ok(report)
    }

    /// Process one message end to end. Only state-store errors propagate —
    /// everything else is converted into a ProcessingRecord.
    async fn process_message(&self, raw: &RawMessage) -> Result<Outcome, Error> {
        let notification = match notification::parse(raw) {
            Ok(notification) => notification,
            Err(failure) => {
                debug!(
                    message_id = %raw.message_id,
                    reason = %failure,
                    "Not a processable notification"
                );
                return self
                    .conclude(raw, Outcome::Skipped(SkipReason::NotApplicable))
                    .await;
            }
        };

        info!(
            message_id = %raw.message_id,
            issue = %notification.issue,
            "Processing notification"
        );

        let recommendation = match self.predictor.predict(&notification).await {
            Ok(recommendation) => recommendation,
            Err(e) => {
                warn!(
                    message_id = %raw.message_id,
                    issue = %notification.issue,
                    error = %e,
                    "Prediction failed"
                );
                return self.record_failure(raw).await;
            }
        };

        let decision = decision::decide(
            &recommendation,
            self.settings.confidence_threshold,
            notification.current_assignee.as_deref(),
        );

        match decision {
            Decision::Skip { reason } => {
                info!(
                    issue = %notification.issue,
                    reason = reason.label(),
                    confidence = recommendation.confidence,
                    "Skipping"
                );
                self.conclude(raw, Outcome::Skipped(reason)).await
            }
            Decision::Reassign { target } => {
                if self.settings.dry_run {
                    info!(
                        issue = %notification.issue,
                        target = %target,
                        confidence = recommendation.confidence,
                        "Dry run — would reassign"
                    );
                    return self.conclude(raw, Outcome::Skipped(SkipReason::DryRun)).await;
                }

                match self
                    .tracker
                    .reassign(&notification.issue, &target, &recommendation.reasoning)
                    .await
                {
                    Ok(()) => {
                        info!(issue = %notification.issue, target = %target, "Reassigned");
                        self.conclude(raw, Outcome::Reassigned).await
                    }
                    Err(e) => {
                        error!(
                            issue = %notification.issue,
                            target = %target,
                            error = %e,
                            "Reassignment failed"
                        );
                        self.record_failure(raw).await
                    }
                }
            }
        }
    }

    /// Write a terminal outcome and flag the mailbox message processed.
    async fn conclude(&self, raw: &RawMessage, outcome: Outcome) -> Result<Outcome, Error> {
        self.state.record(&raw.message_id, outcome.clone()).await?;
        debug!(
            message_id = %raw.message_id,
            outcome = outcome.label(),
            "Outcome recorded"
        );
        if let Err(e) = self.mailbox.mark_processed(&raw.message_id).await {
            warn!(message_id = %raw.message_id, error = %e, "Failed to flag message processed");
        }
        Ok(outcome)
    }

    /// Record a retryable failure. The message stays unseen in the mailbox
    /// until its retry budget runs out, at which point it is flagged
    /// processed and surfaced for operator attention.
    async fn record_failure(&self, raw: &RawMessage) -> Result<Outcome, Error> {
        self.state.record(&raw.message_id, Outcome::Failed).await?;

        let attempts = self.state.retry_count(&raw.message_id).await?;
        if attempts >= self.settings.max_attempts {
            warn!(
                message_id = %raw.message_id,
                attempts,
                "Retry budget exhausted — giving up on message"
            );
            if let Err(e) = self.mailbox.mark_processed(&raw.message_id).await {
                warn!(message_id = %raw.message_id, error = %e, "Failed to flag message processed");
            }
        }
        Ok(Outcome::Failed)
    }
}
