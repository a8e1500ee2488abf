//! Notification parser — turns raw mailbox bytes into a structured
//! `IssueNotification`.
//!
//! Parsing is total: anything that is not a recognizable issue-assignment
//! notification comes back as a `ParseFailure`, never a panic, and the same
//! bytes always produce the same result.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use mail_parser::MessageParser;
use regex::Regex;

use crate::error::ParseFailure;
use crate::mailbox::RawMessage;

/// Longest description carried into a prediction request.
const MAX_DESCRIPTION_CHARS: usize = 500;

/// Subject phrases that mark an assignment notification even when the
/// sender address does not mention the tracker.
const ASSIGNMENT_PHRASES: &[&str] = &["assigned you", "assignee changed", "was assigned to you"];

/// Project path + issue number identifying one tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueRef {
    pub project: String,
    pub iid: u64,
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.iid)
    }
}

/// Structured form of one assignment-notification email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueNotification {
    pub issue: IssueRef,
    pub title: String,
    pub description: String,
    pub labels: BTreeSet<String>,
    /// Missing or "Unassigned" in the notification body means unassigned.
    pub current_assignee: Option<String>,
    /// Mailbox id of the email this was derived from.
    pub source_message_id: String,
}

// ── Extraction patterns ─────────────────────────────────────────────

static ISSUE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^/\s]+/([^\s]+?)/(?:-/)?issues/(\d+)").unwrap()
});

static SUBJECT_ISSUE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)").unwrap());

/// Known tracker subject shapes, most specific first.
static TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)Issue #\d+:\s*(.+?)\s*\|").unwrap(),
        Regex::new(r"(.+?)\s*\(#\d+\)\s*\|").unwrap(),
        Regex::new(r"(?i)(.+?)\s*-\s*Issue #\d+").unwrap(),
        Regex::new(r"(.+?)\s*\|").unwrap(),
    ]
});

/// The explicit `Assignee:` field line wins over prose mentions.
static ASSIGNEE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bassignee:\s*@?([A-Za-z0-9._\-]+)").unwrap(),
        Regex::new(r"(?i)\bassigned to\s+@([A-Za-z0-9._\-]+)").unwrap(),
    ]
});

static LABELS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^labels?:\s*(.+)$").unwrap());

static PROJECT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^(?:project|repository):\s*(.+)$").unwrap());

static DESCRIPTION_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\b(?:description|summary):\s*\n(.*?)(?:\n\n|\n---|\nassignee:|$)").unwrap()
});

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse one raw mailbox message into an `IssueNotification`.
pub fn parse(raw: &RawMessage) -> Result<IssueNotification, ParseFailure> {
    let parsed = MessageParser::default()
        .parse(&raw.bytes)
        .ok_or(ParseFailure::NotAnIssueNotification)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .unwrap_or_default();
    let subject = parsed.subject().unwrap_or_default();
    let body = extract_text(&parsed);

    if !is_assignment_notification(sender, subject) {
        return Err(ParseFailure::NotAnIssueNotification);
    }

    let issue = extract_issue_ref(subject, &body).ok_or(ParseFailure::MalformedReference)?;

    Ok(IssueNotification {
        issue,
        title: extract_title(subject),
        description: extract_description(&body),
        labels: extract_labels(&body),
        current_assignee: extract_assignee(&body),
        source_message_id: raw.message_id.clone(),
    })
}

/// Recognize the tracker's notification convention: tracker sender address,
/// or an assignment phrase in the subject.
fn is_assignment_notification(sender: &str, subject: &str) -> bool {
    let subject = subject.to_lowercase();
    sender.to_lowercase().contains("gitlab")
        || ASSIGNMENT_PHRASES.iter().any(|p| subject.contains(p))
}

/// Find the project/issue pair: issue URL in the body, falling back to a
/// `#N` subject reference combined with a `Project:` body line.
fn extract_issue_ref(subject: &str, body: &str) -> Option<IssueRef> {
    if let Some(caps) = ISSUE_URL.captures(body) {
        let iid = caps[2].parse().ok()?;
        return Some(IssueRef {
            project: caps[1].to_string(),
            iid,
        });
    }

    let iid = SUBJECT_ISSUE_NUMBER
        .captures(subject)
        .and_then(|caps| caps[1].parse().ok())?;
    let project = PROJECT_LINE
        .captures(body)
        .map(|caps| caps[1].trim().to_string())?;
    Some(IssueRef { project, iid })
}

fn extract_title(subject: &str) -> String {
    for pattern in TITLE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(subject) {
            let title = caps[1].trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    let fallback = subject.trim_start_matches("Re: ").trim();
    if fallback.is_empty() {
        "(no title)".to_string()
    } else {
        fallback.to_string()
    }
}

fn extract_assignee(body: &str) -> Option<String> {
    for pattern in ASSIGNEE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(body) {
            let name = caps[1].trim_matches(|c: char| c == '.' || c == ',');
            if !name.is_empty() && !name.eq_ignore_ascii_case("unassigned") {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn extract_labels(body: &str) -> BTreeSet<String> {
    LABELS_LINE
        .captures(body)
        .map(|caps| {
            caps[1]
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_description(body: &str) -> String {
    DESCRIPTION_SECTION
        .captures(body)
        .map(|caps| {
            caps[1]
                .trim()
                .chars()
                .take(MAX_DESCRIPTION_CHARS)
                .collect()
        })
        .unwrap_or_default()
}

/// Readable text from a parsed email: text/plain part, else stripped HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags, keeping line structure so the line-based field
/// patterns (`Labels:`, `Assignee:`) still match.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .trim_end_matches('/')
                    .to_ascii_lowercase();
                if matches!(name.as_str(), "br" | "p" | "div" | "tr" | "li") {
                    text.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => text.push(ch),
        }
    }
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
