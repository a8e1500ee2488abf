//! Issue tracker client — rewrites an issue's assignee through the GitLab
//! REST API and leaves an explanatory comment behind.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::notification::IssueRef;

/// Issue-tracker boundary. The only mutation this service performs is the
/// assignee change (plus its audit comment).
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Set an issue's assignee. Setting the assignee the issue already has
    /// is a no-op success.
    async fn reassign(
        &self,
        issue: &IssueRef,
        assignee: &str,
        reasoning: &str,
    ) -> Result<(), TrackerError>;

    /// Liveness probe for health reporting.
    async fn probe(&self) -> Result<(), TrackerError>;
}

// ── Wire payloads ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IssuePayload {
    assignee: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    username: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
}

// ── GitLab implementation ───────────────────────────────────────────

/// GitLab REST v4 client authenticated with a private token.
pub struct GitLabTracker {
    client: reqwest::Client,
    api_url: String,
    token: SecretString,
}

impl GitLabTracker {
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackerError::Request(e.to_string()))?;
        Ok(Self {
            client,
            api_url: format!("{}/api/v4", config.base_url),
            token: config.token.clone(),
        })
    }

    fn issue_url(&self, issue: &IssueRef) -> String {
        format!(
            "{}/projects/{}/issues/{}",
            self.api_url,
            encode_project(&issue.project),
            issue.iid
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, TrackerError> {
        let response = request
            .header("PRIVATE-TOKEN", self.token.expose_secret())
            .send()
            .await
            .map_err(|e| TrackerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Status {
                status: status.as_u16(),
                context: context.to_string(),
            });
        }
        Ok(response)
    }

    /// Current assignee of an issue, if any.
    async fn current_assignee(&self, issue: &IssueRef) -> Result<Option<String>, TrackerError> {
        let response = self
            .send(
                self.client.get(self.issue_url(issue)),
                &format!("issue {issue}"),
            )
            .await?;
        let payload: IssuePayload = response
            .json()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        Ok(payload.assignee.map(|a| a.username))
    }

    /// Resolve a username to a user id.
    async fn lookup_user(&self, username: &str) -> Result<u64, TrackerError> {
        let response = self
            .send(
                self.client
                    .get(format!("{}/users", self.api_url))
                    .query(&[("username", username)]),
                &format!("user lookup {username}"),
            )
            .await?;
        let users: Vec<User> = response
            .json()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        users
            .first()
            .map(|u| u.id)
            .ok_or_else(|| TrackerError::UnknownUser {
                username: username.to_string(),
            })
    }

    async fn put_assignee(&self, issue: &IssueRef, user_id: u64) -> Result<(), TrackerError> {
        self.send(
            self.client
                .put(self.issue_url(issue))
                .json(&json!({ "assignee_ids": [user_id] })),
            &format!("reassign {issue}"),
        )
        .await?;
        Ok(())
    }

    async fn post_comment(&self, issue: &IssueRef, body: &str) -> Result<(), TrackerError> {
        self.send(
            self.client
                .post(format!("{}/notes", self.issue_url(issue)))
                .json(&json!({ "body": body })),
            &format!("comment on {issue}"),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for GitLabTracker {
    async fn reassign(
        &self,
        issue: &IssueRef,
        assignee: &str,
        reasoning: &str,
    ) -> Result<(), TrackerError> {
        let previous = self.current_assignee(issue).await?;
        if previous.as_deref() == Some(assignee) {
            info!(issue = %issue, assignee, "Issue already assigned to target");
            return Ok(());
        }

        let user_id = self.lookup_user(assignee).await?;
        self.put_assignee(issue, user_id).await?;
        info!(issue = %issue, assignee, "Issue reassigned");

        // The audit comment is best-effort: the reassignment already landed.
        let comment = build_comment(previous.as_deref(), assignee, reasoning);
        if let Err(e) = self.post_comment(issue, &comment).await {
            warn!(issue = %issue, error = %e, "Failed to post audit comment");
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), TrackerError> {
        self.send(
            self.client.get(format!("{}/user", self.api_url)),
            "auth probe",
        )
        .await
        .map(|_| ())
    }
}

/// Percent-encode the project path for use as a URL path segment.
fn encode_project(project: &str) -> String {
    project.replace('/', "%2F")
}

/// Markdown audit comment explaining an automated reassignment.
fn build_comment(previous: Option<&str>, target: &str, reasoning: &str) -> String {
    let mut comment = format!(
        "**Automated assignment update**\n\nReassigned from `{}` to `{}` by the assignment predictor.",
        previous.unwrap_or("unassigned"),
        target
    );
    if !reasoning.trim().is_empty() {
        comment.push_str("\n\n**Reasoning:**\n");
        comment.push_str(reasoning);
    }
    comment
}
