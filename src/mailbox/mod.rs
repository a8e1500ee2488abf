//! Mailbox boundary — lists unseen notification messages and flags them
//! processed. Pure I/O, no business logic.

pub mod imap;

use async_trait::async_trait;

use crate::error::MailboxError;

pub use imap::ImapMailbox;

/// A message as fetched from the mailbox: opaque bytes plus the
/// mailbox-assigned identifier (the IMAP UID), which is stable across polls
/// until the message is deleted or moved.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub message_id: String,
    pub bytes: Vec<u8>,
}

/// Mail-store access used by the pipeline. Each call opens its own
/// connection; there is no session state to keep alive between cycles.
#[async_trait]
pub trait MailboxReader: Send + Sync {
    /// Fetch all currently-unseen messages matching the notification filter.
    async fn list_unseen(&self) -> Result<Vec<RawMessage>, MailboxError>;

    /// Flag a message as processed (IMAP `\Seen`) so later polls skip it.
    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError>;

    /// Cheap liveness probe for health reporting.
    async fn probe(&self) -> Result<(), MailboxError>;
}
