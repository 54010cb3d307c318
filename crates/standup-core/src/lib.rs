//! Reconciliation engine that turns daily reports into tracker progress.
//!
//! [`IssueMirrorManager`] drives one pass per report: it mirrors assigned issues, derives
//! sub-items with [`SubtaskExtractor`], updates completion with [`StatusReconciler`], and
//! closes finished issues through [`TransitionAliasTable`].

use thiserror::Error;

pub mod attachment_matcher;
pub mod completion;
pub mod config;
pub mod issue_mirror;
pub mod model_json;
pub mod profile_sync;
pub mod status_reconciler;
pub mod subtask_extractor;
pub mod transition_resolver;

#[cfg(test)]
mod test_support;

pub use completion::{CompletionError, CompletionModel};
pub use config::EngineConfig;
pub use issue_mirror::{
    IssueMirrorManager, IssueOutcome, IssueState, ProgressView, SubmissionOutcome,
    TransitionOutcome,
};
pub use status_reconciler::{Reconciliation, ReconciliationSource, StatusReconciler, SubItemState};
pub use subtask_extractor::{ExtractedSubItem, Extraction, ExtractionSource, SubtaskExtractor};
pub use transition_resolver::{TransitionAliasTable, WorkflowAction};

#[derive(Debug, Error)]
/// Errors raised while constructing the engine.
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid extractor keyword pattern: {0}")]
    KeywordPattern(#[from] regex::Error),
}
