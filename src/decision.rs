//! Decision engine — pure confidence gate between prediction and action.
//!
//! No I/O. Everything the tracker call depends on is decided here, so the
//! gate can be tested exhaustively without any collaborator.

use serde::{Deserialize, Serialize};

use crate::predict::Recommendation;

/// Why a message was skipped instead of acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Prediction confidence below the configured threshold.
    LowConfidence,
    /// The issue already has the recommended assignee.
    AlreadyAssigned,
    /// Dry-run mode suppressed the tracker call.
    DryRun,
    /// The message was not a usable issue notification.
    NotApplicable,
}

impl SkipReason {
    /// Short label for logging and state rows.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::AlreadyAssigned => "already_assigned",
            Self::DryRun => "dry_run",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// What the pipeline should do with one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Reassign { target: String },
    Skip { reason: SkipReason },
}

/// Map a recommendation onto a decision.
///
/// Rules, in order: a confidence strictly below the threshold skips (a
/// prediction exactly at the threshold passes the gate); a recommendation
/// matching the current assignee skips regardless of confidence; anything
/// else reassigns.
pub fn decide(
    recommendation: &Recommendation,
    threshold: f32,
    current_assignee: Option<&str>,
) -> Decision {
    if recommendation.confidence < threshold {
        return Decision::Skip {
            reason: SkipReason::LowConfidence,
        };
    }
    if current_assignee.is_some_and(|current| current == recommendation.assignee) {
        return Decision::Skip {
            reason: SkipReason::AlreadyAssigned,
        };
    }
    Decision::Reassign {
        target: recommendation.assignee.clone(),
    }
}
