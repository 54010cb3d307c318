use std::sync::Mutex;

use async_trait::async_trait;
use standup_tracker::{IssueTracker, TrackerAccount, TrackerError, TrackerIssue, TrackerTransition};

/// In-process tracker that serves fixed data and records each call as a short line.
#[derive(Default)]
pub(crate) struct FakeTracker {
    pub(crate) issues: Vec<TrackerIssue>,
    pub(crate) transitions: Vec<TrackerTransition>,
    pub(crate) account: Option<TrackerAccount>,
    pub(crate) fail_search: bool,
    pub(crate) fail_transition: bool,
    pub(crate) fail_comment: bool,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FakeTracker {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

fn unavailable(operation: &str) -> TrackerError {
    TrackerError::Status {
        operation: operation.to_string(),
        status: 503,
        body: "tracker unavailable".to_string(),
    }
}

pub(crate) fn issue(key: &str, description: &str, status: &str) -> TrackerIssue {
    TrackerIssue {
        key: key.to_string(),
        summary: format!("Summary {key}"),
        description: description.to_string(),
        status: status.to_string(),
        attachment_names: Vec::new(),
    }
}

pub(crate) fn transition(id: &str, name: &str) -> TrackerTransition {
    TrackerTransition {
        id: id.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn search_assigned(
        &self,
        user_email: &str,
        _project_keys: &[String],
    ) -> Result<Vec<TrackerIssue>, TrackerError> {
        self.record(format!("search {user_email}"));
        if self.fail_search {
            return Err(unavailable("search"));
        }
        Ok(self.issues.clone())
    }

    async fn list_transitions(
        &self,
        issue_key: &str,
    ) -> Result<Vec<TrackerTransition>, TrackerError> {
        self.record(format!("transitions {issue_key}"));
        Ok(self.transitions.clone())
    }

    async fn execute_transition(
        &self,
        issue_key: &str,
        transition_id: &str,
    ) -> Result<(), TrackerError> {
        self.record(format!("transition {issue_key} {transition_id}"));
        if self.fail_transition {
            return Err(unavailable("transition"));
        }
        Ok(())
    }

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<(), TrackerError> {
        self.record(format!("comment {issue_key} {body}"));
        if self.fail_comment {
            return Err(unavailable("comment"));
        }
        Ok(())
    }

    async fn add_attachment(
        &self,
        issue_key: &str,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<(), TrackerError> {
        self.record(format!("attachment {issue_key} {file_name}"));
        Ok(())
    }

    async fn current_account(&self) -> Result<TrackerAccount, TrackerError> {
        self.record("myself".to_string());
        self.account.clone().ok_or_else(|| unavailable("myself"))
    }
}
