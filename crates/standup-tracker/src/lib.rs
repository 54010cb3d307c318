//! Issue tracker contract and the Jira REST adapter used by the reconciliation engine.
//! The engine only talks to [`IssueTracker`]; [`JiraClient`] is the production implementation.

mod jira_client;
pub mod transport_helpers;
mod types;

pub use jira_client::{JiraClient, JiraConfig};
pub use types::{IssueTracker, TrackerAccount, TrackerError, TrackerIssue, TrackerTransition};
