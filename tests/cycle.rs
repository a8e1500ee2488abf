//! End-to-end cycle scenarios driven through fake collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use assignbot::decision::SkipReason;
use assignbot::error::{MailboxError, PredictError, TrackerError};
use assignbot::mailbox::{MailboxReader, RawMessage};
use assignbot::notification::{IssueNotification, IssueRef};
use assignbot::pipeline::{Pipeline, PipelineSettings};
use assignbot::predict::{Predictor, Recommendation};
use assignbot::state::{MemoryStore, Outcome, StateStore};
use assignbot::tracker::IssueTracker;

// ── Fixtures ────────────────────────────────────────────────────────

fn notification_email(uid: &str, current_assignee: Option<&str>) -> RawMessage {
    let assignee_line = current_assignee
        .map(|a| format!("Assignee: {a}\n"))
        .unwrap_or_default();
    let bytes = format!(
        "From: gitlab@example.com\r\nTo: bot@example.com\r\n\
         Subject: Issue #123: Fix login crash | widgets\r\n\
         Content-Type: text/plain\r\n\r\n\
         You have been assigned an issue.\n\n\
         https://gitlab.example.com/team/widgets/-/issues/123\n\n\
         {assignee_line}Labels: bug\n"
    )
    .into_bytes();
    RawMessage {
        message_id: uid.into(),
        bytes,
    }
}

fn junk_email(uid: &str) -> RawMessage {
    RawMessage {
        message_id: uid.into(),
        bytes: b"From: alice@example.com\r\nSubject: Lunch?\r\n\r\nNoodles?".to_vec(),
    }
}

// ── Fakes ───────────────────────────────────────────────────────────

struct FakeMailbox {
    messages: Vec<RawMessage>,
    marked: Mutex<Vec<String>>,
    /// When set, `list_unseen` keeps returning marked messages — models a
    /// mail server where the `\Seen` write was lost, so dedup has to hold
    /// at the state store.
    ignore_marks: bool,
}

impl FakeMailbox {
    fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            marked: Mutex::new(Vec::new()),
            ignore_marks: false,
        }
    }

    fn ignoring_marks(messages: Vec<RawMessage>) -> Self {
        Self {
            ignore_marks: true,
            ..Self::new(messages)
        }
    }

    async fn marked(&self) -> Vec<String> {
        self.marked.lock().await.clone()
    }
}

#[async_trait]
impl MailboxReader for FakeMailbox {
    async fn list_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        let marked = self.marked.lock().await;
        Ok(self
            .messages
            .iter()
            .filter(|m| self.ignore_marks || !marked.contains(&m.message_id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError> {
        self.marked.lock().await.push(message_id.to_string());
        Ok(())
    }

    async fn probe(&self) -> Result<(), MailboxError> {
        Ok(())
    }
}

struct FakePredictor {
    /// `None` makes every call fail with a transport error.
    response: Option<Recommendation>,
    calls: AtomicUsize,
}

impl FakePredictor {
    fn recommending(assignee: &str, confidence: f32) -> Self {
        Self {
            response: Some(Recommendation {
                assignee: assignee.into(),
                confidence,
                reasoning: "recent work in this area".into(),
                alternatives: vec![],
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            response: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for FakePredictor {
    async fn predict(
        &self,
        _notification: &IssueNotification,
    ) -> Result<Recommendation, PredictError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .ok_or_else(|| PredictError::Request("connection refused".into()))
    }

    async fn probe(&self) -> Result<(), PredictError> {
        Ok(())
    }
}

struct FakeTracker {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeTracker {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn reassign(
        &self,
        _issue: &IssueRef,
        _assignee: &str,
        _reasoning: &str,
    ) -> Result<(), TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(TrackerError::Request("connection refused".into()))
        } else {
            Ok(())
        }
    }

    async fn probe(&self) -> Result<(), TrackerError> {
        Ok(())
    }
}

fn pipeline(
    mailbox: &Arc<FakeMailbox>,
    predictor: &Arc<FakePredictor>,
    tracker: &Arc<FakeTracker>,
    store: &Arc<MemoryStore>,
    dry_run: bool,
) -> Pipeline {
    Pipeline::new(
        Arc::clone(mailbox) as Arc<dyn MailboxReader>,
        Arc::clone(predictor) as Arc<dyn Predictor>,
        Arc::clone(tracker) as Arc<dyn IssueTracker>,
        Arc::clone(store) as Arc<dyn StateStore>,
        PipelineSettings {
            confidence_threshold: 0.7,
            dry_run,
            max_attempts: 3,
        },
    )
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn confident_prediction_reassigns_once() {
    let mailbox = Arc::new(FakeMailbox::new(vec![notification_email("1", Some("alice"))]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.9));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    let report = pipeline(&mailbox, &predictor, &tracker, &store, false)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.reassigned, 1);
    assert_eq!(tracker.calls(), 1);
    assert_eq!(store.get("1").await.unwrap().outcome, Outcome::Reassigned);
    assert_eq!(mailbox.marked().await, vec!["1"]);
}

#[tokio::test]
async fn low_confidence_never_touches_the_tracker() {
    let mailbox = Arc::new(FakeMailbox::new(vec![notification_email("1", Some("alice"))]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.4));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    let report = pipeline(&mailbox, &predictor, &tracker, &store, false)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(tracker.calls(), 0);
    assert_eq!(
        store.get("1").await.unwrap().outcome,
        Outcome::Skipped(SkipReason::LowConfidence)
    );
}

#[tokio::test]
async fn already_assigned_skips() {
    let mailbox = Arc::new(FakeMailbox::new(vec![notification_email("1", Some("bob"))]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 1.0));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    pipeline(&mailbox, &predictor, &tracker, &store, false)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(tracker.calls(), 0);
    assert_eq!(
        store.get("1").await.unwrap().outcome,
        Outcome::Skipped(SkipReason::AlreadyAssigned)
    );
}

#[tokio::test]
async fn dry_run_suppresses_the_action() {
    let mailbox = Arc::new(FakeMailbox::new(vec![notification_email("1", Some("alice"))]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.9));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    let report = pipeline(&mailbox, &predictor, &tracker, &store, true)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(tracker.calls(), 0);
    assert_eq!(
        store.get("1").await.unwrap().outcome,
        Outcome::Skipped(SkipReason::DryRun)
    );
}

#[tokio::test]
async fn unparseable_message_is_skipped_and_cycle_continues() {
    let mailbox = Arc::new(FakeMailbox::new(vec![
        junk_email("1"),
        notification_email("2", Some("alice")),
    ]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.9));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    let report = pipeline(&mailbox, &predictor, &tracker, &store, false)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.reassigned, 1);
    assert_eq!(
        store.get("1").await.unwrap().outcome,
        Outcome::Skipped(SkipReason::NotApplicable)
    );
    assert_eq!(store.get("2").await.unwrap().outcome, Outcome::Reassigned);
    // The junk message never reached the predictor.
    assert_eq!(predictor.calls(), 1);
}

#[tokio::test]
async fn second_cycle_is_idempotent() {
    // Even if the mailbox keeps serving the same message, the state store
    // prevents a second action.
    let mailbox = Arc::new(FakeMailbox::ignoring_marks(vec![notification_email(
        "1",
        Some("alice"),
    )]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.9));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));
    let pipeline = pipeline(&mailbox, &predictor, &tracker, &store, false);

    let first = pipeline.run_cycle().await.unwrap();
    assert_eq!(first.reassigned, 1);

    let second = pipeline.run_cycle().await.unwrap();
    assert_eq!(second.reassigned, 0);
    assert_eq!(second.deduplicated, 1);
    assert_eq!(tracker.calls(), 1);
    assert_eq!(predictor.calls(), 1);
}

#[tokio::test]
async fn prediction_failure_records_failed_without_action() {
    let mailbox = Arc::new(FakeMailbox::new(vec![notification_email("1", Some("alice"))]));
    let predictor = Arc::new(FakePredictor::failing());
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    let report = pipeline(&mailbox, &predictor, &tracker, &store, false)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(tracker.calls(), 0);
    assert_eq!(store.get("1").await.unwrap().outcome, Outcome::Failed);
    assert_eq!(store.retry_count("1").await.unwrap(), 1);
    // Still retryable — the message must not be flagged processed yet.
    assert!(mailbox.marked().await.is_empty());
}

#[tokio::test]
async fn retry_cap_gives_up_permanently() {
    let mailbox = Arc::new(FakeMailbox::ignoring_marks(vec![notification_email(
        "1",
        Some("alice"),
    )]));
    let predictor = Arc::new(FakePredictor::failing());
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));
    let pipeline = pipeline(&mailbox, &predictor, &tracker, &store, false);

    for _ in 0..3 {
        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
    }
    assert_eq!(predictor.calls(), 3);
    assert!(store.has_terminal_record("1").await.unwrap());
    // The exhausted message is flagged processed in the mailbox.
    assert_eq!(mailbox.marked().await, vec!["1"]);

    // A later cycle no longer retries it.
    let after = pipeline.run_cycle().await.unwrap();
    assert_eq!(after.deduplicated, 1);
    assert_eq!(after.failed, 0);
    assert_eq!(predictor.calls(), 3);
}

#[tokio::test]
async fn tracker_failure_records_failed_and_retries_later() {
    let mailbox = Arc::new(FakeMailbox::ignoring_marks(vec![notification_email(
        "1",
        Some("alice"),
    )]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.9));
    let tracker = Arc::new(FakeTracker::failing());
    let store = Arc::new(MemoryStore::new(3));
    let pipeline = pipeline(&mailbox, &predictor, &tracker, &store, false);

    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(store.retry_count("1").await.unwrap(), 1);

    // The next cycle tries the whole message again.
    pipeline.run_cycle().await.unwrap();
    assert_eq!(tracker.calls(), 2);
    assert_eq!(store.retry_count("1").await.unwrap(), 2);
}

#[tokio::test]
async fn empty_mailbox_produces_empty_report() {
    let mailbox = Arc::new(FakeMailbox::new(vec![]));
    let predictor = Arc::new(FakePredictor::recommending("bob", 0.9));
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new(3));

    let report = pipeline(&mailbox, &predictor, &tracker, &store, false)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report, assignbot::pipeline::CycleReport::default());
}
