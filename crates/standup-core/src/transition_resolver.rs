use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use standup_tracker::TrackerTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Abstract workflow move, independent of any tracker project's naming.
pub enum WorkflowAction {
    ToDo,
    InProgress,
    Done,
}

impl WorkflowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "to_do",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "to_do" | "todo" => Ok(Self::ToDo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("unknown workflow action '{value}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Acceptable remote transition names per action, in priority order.
pub struct TransitionAliasTable {
    pub to_do: Vec<String>,
    pub in_progress: Vec<String>,
    pub done: Vec<String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl Default for TransitionAliasTable {
    fn default() -> Self {
        Self {
            to_do: owned(&["To Do", "Open", "Backlog", "Reopen"]),
            in_progress: owned(&["In Progress", "Start Progress", "Start", "Doing"]),
            done: owned(&[
                "Done",
                "Complete",
                "Completed",
                "Resolve",
                "Resolved",
                "Close",
                "Closed",
            ]),
        }
    }
}

impl TransitionAliasTable {
    pub fn resolve(&self, action: WorkflowAction) -> &[String] {
        match action {
            WorkflowAction::ToDo => &self.to_do,
            WorkflowAction::InProgress => &self.in_progress,
            WorkflowAction::Done => &self.done,
        }
    }

    /// First available transition matching an alias, tried in alias order.
    pub fn find_transition<'a>(
        &self,
        action: WorkflowAction,
        available: &'a [TrackerTransition],
    ) -> Option<&'a TrackerTransition> {
        self.resolve(action).iter().find_map(|alias| {
            available
                .iter()
                .find(|transition| names_match(alias, &transition.name))
        })
    }

    /// Whether a remote status name already corresponds to `action`.
    pub fn status_matches(&self, action: WorkflowAction, status: &str) -> bool {
        self.resolve(action)
            .iter()
            .any(|alias| names_match(alias, status))
    }
}

fn names_match(alias: &str, name: &str) -> bool {
    let alias = alias.trim();
    !alias.is_empty() && alias.to_lowercase() == name.trim().to_lowercase()
}
