use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Snapshot of a remote issue as returned by an assignee search.
pub struct TrackerIssue {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    /// File names already attached to the issue.
    #[serde(default)]
    pub attachment_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A workflow transition currently available on an issue.
pub struct TrackerTransition {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The account the tracker credentials authenticate as.
pub struct TrackerAccount {
    pub account_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
/// Enumerates supported `TrackerError` values.
pub enum TrackerError {
    #[error("tracker {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tracker {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode tracker {operation}: {source}")]
    Decode {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tracker {operation} did not finish within {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),
}

/// Capability set the reconciliation engine consumes from a remote issue tracker.
///
/// Every call returns an explicit outcome; callers decide how a failure degrades.
/// `execute_transition` must be safe to repeat against an issue already in the target state.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Issues assigned to `user_email` within `project_keys`, newest first.
    async fn search_assigned(
        &self,
        user_email: &str,
        project_keys: &[String],
    ) -> Result<Vec<TrackerIssue>, TrackerError>;

    async fn list_transitions(&self, issue_key: &str)
        -> Result<Vec<TrackerTransition>, TrackerError>;

    async fn execute_transition(
        &self,
        issue_key: &str,
        transition_id: &str,
    ) -> Result<(), TrackerError>;

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<(), TrackerError>;

    async fn add_attachment(
        &self,
        issue_key: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), TrackerError>;

    async fn current_account(&self) -> Result<TrackerAccount, TrackerError>;
}
