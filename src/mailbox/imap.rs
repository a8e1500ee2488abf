//! IMAP implementation of the mailbox boundary.
//!
//! The IMAP conversation is plain blocking I/O over rustls, driven inside
//! `spawn_blocking`. Only the commands the pipeline needs are spoken:
//! LOGIN, SELECT, UID SEARCH, UID FETCH, UID STORE, LOGOUT. Fetching does
//! NOT set `\Seen` — that happens through `mark_processed`, so a message
//! whose processing failed stays visible to the next cycle.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::ImapConfig;
use crate::error::MailboxError;
use crate::mailbox::{MailboxReader, RawMessage};

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// IMAP-over-TLS mailbox reader. Stateless between calls — every operation
/// opens a fresh session.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxReader for ImapMailbox {
    async fn list_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| MailboxError::Task(e.to_string()))?
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError> {
        let config = self.config.clone();
        let uid = message_id.to_string();
        tokio::task::spawn_blocking(move || mark_seen(&config, &uid))
            .await
            .map_err(|e| MailboxError::Task(e.to_string()))?
    }

    async fn probe(&self) -> Result<(), MailboxError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        tokio::task::spawn_blocking(move || {
            TcpStream::connect((host.as_str(), port))
                .map(|_| ())
                .map_err(|e| MailboxError::Connect {
                    host,
                    port,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

// ── Blocking IMAP session ───────────────────────────────────────────

struct ImapSession {
    stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            MailboxError::Connect {
                host: config.host.clone(),
                port: config.port,
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.host.clone())
                .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
        };
        // Server greeting
        session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailboxError::Protocol("connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(buf);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>, MailboxError> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn next_tag(&mut self) -> String {
        self.tag += 1;
        format!("A{}", self.tag)
    }

    /// Send a command, collect response lines until the tagged completion,
    /// and error unless the completion reports OK. `name` is what shows up
    /// in errors — never the full command, which may carry credentials.
    fn command(&mut self, name: &str, cmd: &str) -> Result<Vec<String>, MailboxError> {
        let tag = self.next_tag();
        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = String::from_utf8_lossy(&self.read_line()?).to_string();
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                break;
            }
        }

        let ok = lines
            .last()
            .and_then(|l| l.strip_prefix(&tag))
            .is_some_and(|rest| rest.trim_start().starts_with("OK"));
        if !ok {
            let last = lines.last().map(String::as_str).unwrap_or_default();
            return Err(MailboxError::Protocol(format!(
                "{name} failed: {}",
                last.trim_end()
            )));
        }
        Ok(lines)
    }

    fn login(&mut self, config: &ImapConfig) -> Result<(), MailboxError> {
        let cmd = format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        );
        self.command("LOGIN", &cmd).map_err(|e| match e {
            MailboxError::Protocol(_) => MailboxError::Auth {
                username: config.username.clone(),
            },
            other => other,
        })?;
        Ok(())
    }

    fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.command("SELECT", &format!("SELECT \"{folder}\""))?;
        Ok(())
    }

    fn uid_search_unseen(&mut self, sender_filter: &str) -> Result<Vec<String>, MailboxError> {
        let cmd = if sender_filter.is_empty() {
            "UID SEARCH UNSEEN".to_string()
        } else {
            format!("UID SEARCH UNSEEN FROM \"{sender_filter}\"")
        };
        let lines = self.command("UID SEARCH", &cmd)?;
        Ok(parse_search_response(&lines))
    }

    /// Fetch the full RFC822 body of one message. The body arrives as an
    /// IMAP literal (`{n}` byte count followed by exactly n raw bytes).
    fn uid_fetch(&mut self, uid: &str) -> Result<Option<Vec<u8>>, MailboxError> {
        let tag = self.next_tag();
        self.stream
            .write_all(format!("{tag} UID FETCH {uid} (RFC822)\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut body: Option<Vec<u8>> = None;
        loop {
            let line = self.read_line()?;
            let text = String::from_utf8_lossy(&line).to_string();
            if let Some(rest) = text.strip_prefix(&tag) {
                if !rest.trim_start().starts_with("OK") {
                    return Err(MailboxError::Protocol(format!(
                        "UID FETCH failed: {}",
                        text.trim_end()
                    )));
                }
                break;
            }
            if body.is_none()
                && text.starts_with('*')
                && let Some(len) = parse_literal_len(&text)
            {
                body = Some(self.read_exact_bytes(len)?);
            }
        }
        Ok(body)
    }

    fn mark_seen(&mut self, uid: &str) -> Result<(), MailboxError> {
        self.command(
            "UID STORE",
            &format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"),
        )?;
        Ok(())
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT", "LOGOUT");
    }
}

// ── Blocking entry points (run under spawn_blocking) ────────────────

fn fetch_unseen(config: &ImapConfig) -> Result<Vec<RawMessage>, MailboxError> {
    let mut session = ImapSession::connect(config)?;
    session.login(config)?;
    session.select(&config.folder)?;

    let uids = session.uid_search_unseen(&config.sender_filter)?;
    debug!(count = uids.len(), "Unseen messages found");

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        match session.uid_fetch(&uid) {
            Ok(Some(bytes)) => messages.push(RawMessage {
                message_id: uid,
                bytes,
            }),
            Ok(None) => warn!(uid = %uid, "Fetch returned no message body"),
            Err(e) => warn!(uid = %uid, error = %e, "Skipping message that failed to fetch"),
        }
    }

    session.logout();
    Ok(messages)
}

fn mark_seen(config: &ImapConfig, uid: &str) -> Result<(), MailboxError> {
    let mut session = ImapSession::connect(config)?;
    session.login(config)?;
    session.select(&config.folder)?;
    session.mark_seen(uid)?;
    session.logout();
    Ok(())
}

// ── Response parsing helpers ────────────────────────────────────────

/// Collect UIDs from `* SEARCH n1 n2 ...` lines.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    let mut uids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            uids.extend(
                line.split_whitespace()
                    .skip(2)
                    .map(|s| s.trim().to_string()),
            );
        }
    }
    uids
}

/// Extract the byte count from an IMAP literal marker, e.g.
/// `* 1 FETCH (UID 7 RFC822 {1423}` → 1423.
fn parse_literal_len(line: &str) -> Option<usize> {
    let open = line.rfind('{')?;
    let close = line[open..].find('}')? + open;
    line[open + 1..close].parse().ok()
}
