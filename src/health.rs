//! Health aggregator — probes the three external collaborators and reports
//! a composite status.
//!
//! Probes run concurrently and independently; a hung dependency costs at
//! most the probe timeout and never takes the other probes down with it.

use std::time::Duration;

use tracing::warn;

use crate::mailbox::MailboxReader;
use crate::predict::Predictor;
use crate::tracker::IssueTracker;

/// Per-dependency liveness plus the AND of all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub imap: bool,
    pub prediction: bool,
    pub tracker: bool,
    pub overall: bool,
}

/// Probe every dependency, each within `probe_timeout`.
pub async fn check_health(
    mailbox: &dyn MailboxReader,
    predictor: &dyn Predictor,
    tracker: &dyn IssueTracker,
    probe_timeout: Duration,
) -> HealthReport {
    let (imap, prediction, tracker) = futures::future::join3(
        probe("imap", probe_timeout, mailbox.probe()),
        probe("prediction", probe_timeout, predictor.probe()),
        probe("tracker", probe_timeout, tracker.probe()),
    )
    .await;

    HealthReport {
        imap,
        prediction,
        tracker,
        overall: imap && prediction && tracker,
    }
}

async fn probe<E: std::fmt::Display>(
    service: &str,
    budget: Duration,
    fut: impl Future<Output = Result<(), E>>,
) -> bool {
    match tokio::time::timeout(budget, fut).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(service, error = %e, "Health probe failed");
            false
        }
        Err(_) => {
            warn!(service, "Health probe timed out");
            false
        }
    }
}
