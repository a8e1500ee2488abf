//! Error types for assignbot.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Prediction error: {0}")]
    Predict(#[from] PredictError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox (IMAP) errors. All of these are recoverable at the cycle level —
/// the next scheduled cycle reconnects from scratch.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IMAP login failed for {username}")]
    Auth { username: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

/// Prediction service errors.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Request to prediction service failed: {0}")]
    Request(String),

    #[error("Prediction service returned status {status}")]
    Status { status: u16 },

    #[error("Invalid response from prediction service: {0}")]
    InvalidResponse(String),
}

/// Issue tracker (GitLab) errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Request to tracker failed: {0}")]
    Request(String),

    #[error("Tracker returned status {status} for {context}")]
    Status { status: u16, context: String },

    #[error("Assignee {username} is not a known tracker user")]
    UnknownUser { username: String },

    #[error("Invalid response from tracker: {0}")]
    InvalidResponse(String),
}

/// Processing-state store errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Attempted to overwrite a terminal record. Under the single-active-cycle
    /// invariant this must never happen; it aborts the cycle rather than
    /// corrupting history.
    #[error("Refusing to overwrite terminal record for message {message_id}")]
    TerminalOverwrite { message_id: String },

    #[error("State backend error: {0}")]
    Backend(String),
}

/// Why a raw message could not be turned into an issue notification.
///
/// Parse failures are permanent: the message is recorded as skipped and
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("not a recognized issue-assignment notification")]
    NotAnIssueNotification,

    #[error("notification carries no parseable project/issue reference")]
    MalformedReference,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
