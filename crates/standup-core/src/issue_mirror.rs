//! Per-user reconciliation pass over assigned tracker issues.
//!
//! Each issue runs `mirror -> extract (once) -> reconcile -> maybe complete` as an isolated
//! unit. A failing issue is annotated in its outcome and the pass moves on; only recording
//! the report itself can fail a submission.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use standup_ai::LlmClient;
use standup_store::{NewMirroredIssue, RecordStore, SubItem, TierFeature, UserRecord};
use standup_tracker::{IssueTracker, TrackerIssue};

use crate::attachment_matcher::{attach_matching_files, match_files};
use crate::completion::CompletionModel;
use crate::config::EngineConfig;
use crate::profile_sync;
use crate::status_reconciler::{ReconciliationSource, StatusReconciler, SubItemState};
use crate::subtask_extractor::{ExtractionSource, SubtaskExtractor};
use crate::transition_resolver::WorkflowAction;
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Lifecycle position of one issue at the end of a pass.
pub enum IssueState {
    New,
    MirroredNoSubItems,
    MirroredWithSubItems,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStep {
    Model,
    Fallback,
    EmptyDescription,
    Existing,
}

impl From<ExtractionSource> for ExtractionStep {
    fn from(source: ExtractionSource) -> Self {
        match source {
            ExtractionSource::Model => Self::Model,
            ExtractionSource::Fallback => Self::Fallback,
            ExtractionSource::EmptyDescription => Self::EmptyDescription,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub transition_found: bool,
    pub transition_id: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueOutcome {
    pub issue_key: String,
    pub state: IssueState,
    pub progress_percent: f64,
    pub sub_items: Vec<SubItemState>,
    pub extraction: Option<ExtractionStep>,
    pub reconciliation: Option<ReconciliationSource>,
    pub transition: Option<TransitionOutcome>,
    pub comment_posted: bool,
    pub attachments_added: usize,
    pub error: Option<String>,
}

impl IssueOutcome {
    fn new(issue_key: &str) -> Self {
        Self {
            issue_key: issue_key.to_string(),
            state: IssueState::New,
            progress_percent: 0.0,
            sub_items: Vec::new(),
            extraction: None,
            reconciliation: None,
            transition: None,
            comment_posted: false,
            attachments_added: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub report_id: i64,
    pub updated_tasks: Vec<IssueOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub user_id: String,
    pub latest_report_id: Option<i64>,
    pub updated_tasks: Vec<IssueOutcome>,
}

/// `done / total` as a percentage rounded to one decimal; zero when there are no items.
pub fn progress_percent(items: &[SubItemState]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let done = items.iter().filter(|item| item.is_done).count();
    let ratio = done as f64 / items.len() as f64;
    (ratio * 1000.0).round() / 10.0
}

pub fn audit_comment(report_text: &str) -> String {
    format!("All sub-items completed: {report_text}")
}

pub struct IssueMirrorManager {
    store: Arc<dyn RecordStore>,
    tracker: Arc<dyn IssueTracker>,
    extractor: SubtaskExtractor,
    reconciler: StatusReconciler,
    config: EngineConfig,
}

impl IssueMirrorManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        tracker: Arc<dyn IssueTracker>,
        llm: Arc<dyn LlmClient>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        if config.max_sub_items == 0 {
            return Err(EngineError::InvalidConfig(
                "max_sub_items must be greater than 0".to_string(),
            ));
        }
        let model = Arc::new(CompletionModel::new(
            llm,
            config.model.clone(),
            config.model_timeout,
        ));
        let extractor =
            SubtaskExtractor::new(model.clone(), &config.keywords, config.extractor_max_tokens)?;
        let reconciler = StatusReconciler::new(model, config.reconciler_max_tokens);
        Ok(Self {
            store,
            tracker,
            extractor,
            reconciler,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Records the report, then reconciles every assigned issue against it.
    pub async fn submit_report(
        &self,
        user_id: &str,
        email: &str,
        report_text: &str,
    ) -> Result<SubmissionOutcome> {
        if report_text.trim().is_empty() {
            anyhow::bail!("report text must not be empty");
        }
        let user = self
            .store
            .ensure_user(user_id, email)
            .await
            .with_context(|| format!("failed to load user '{user_id}'"))?;
        let report = self
            .store
            .record_report(user_id, report_text)
            .await
            .with_context(|| format!("failed to record report for '{user_id}'"))?;
        tracing::info!(user_id, report_id = report.id, "recorded daily report");

        let updated_tasks = self.run_pass(&user, &report.text).await;
        Ok(SubmissionOutcome {
            report_id: report.id,
            updated_tasks,
        })
    }

    /// Runs the same pass against the latest stored report without recording anything new.
    pub async fn view_progress(&self, user_id: &str, email: &str) -> Result<ProgressView> {
        let user = self
            .store
            .ensure_user(user_id, email)
            .await
            .with_context(|| format!("failed to load user '{user_id}'"))?;
        let latest = self
            .store
            .latest_report(user_id)
            .await
            .with_context(|| format!("failed to load latest report for '{user_id}'"))?;
        let report_text = latest
            .as_ref()
            .map(|report| report.text.as_str())
            .unwrap_or_default();

        let updated_tasks = self.run_pass(&user, report_text).await;
        Ok(ProgressView {
            user_id: user.user_id,
            latest_report_id: latest.as_ref().map(|report| report.id),
            updated_tasks,
        })
    }

    pub async fn sync_profile(&self, user_id: &str) -> Result<UserRecord> {
        profile_sync::sync_profile(self.store.as_ref(), self.tracker.as_ref(), user_id).await
    }

    async fn run_pass(&self, user: &UserRecord, report_text: &str) -> Vec<IssueOutcome> {
        if !user.tier.has_feature(TierFeature::Tracker) || !user.tier.has_feature(TierFeature::Model) {
            tracing::info!(user_id = %user.user_id, tier = user.tier.as_str(), "tier excludes reconciliation");
            return Vec::new();
        }

        let remote_issues = match self
            .tracker
            .search_assigned(&user.email, &self.config.project_keys)
            .await
        {
            Ok(issues) => issues,
            Err(error) => {
                tracing::warn!(user_id = %user.user_id, %error, "assigned issue search failed");
                Vec::new()
            }
        };
        tracing::debug!(user_id = %user.user_id, issues = remote_issues.len(), "reconciling assigned issues");

        let attach_files = user.tier.has_feature(TierFeature::FileCheck);
        let mut outcomes = Vec::with_capacity(remote_issues.len());
        for remote in &remote_issues {
            let mut outcome = IssueOutcome::new(&remote.key);
            if let Err(error) = self
                .process_issue(user, remote, report_text, &mut outcome)
                .await
            {
                tracing::warn!(issue_key = %remote.key, error = %format!("{error:#}"), "issue reconciliation failed");
                outcome.error = Some(format!("{error:#}"));
            }
            if attach_files {
                outcome.attachments_added = self.attach_files(user, remote).await;
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn process_issue(
        &self,
        user: &UserRecord,
        remote: &TrackerIssue,
        report_text: &str,
        outcome: &mut IssueOutcome,
    ) -> Result<()> {
        let issue_key = remote.key.as_str();
        let (issue, created) = self
            .store
            .get_or_create_issue(NewMirroredIssue {
                remote_key: remote.key.clone(),
                owner_id: user.user_id.clone(),
                title: remote.summary.clone(),
                description: remote.description.clone(),
            })
            .await
            .context("failed to mirror issue")?;
        if created {
            tracing::debug!(issue_key, issue_id = issue.id, "mirrored new issue");
        }

        let mut stored = self
            .store
            .list_sub_items(issue.id)
            .await
            .context("failed to list sub-items")?;
        if stored.is_empty() {
            outcome.state = IssueState::MirroredNoSubItems;
            let extraction = self
                .extractor
                .extract(issue_key, &issue.description, self.config.max_sub_items)
                .await;
            outcome.extraction = Some(extraction.source.into());
            for item in &extraction.items {
                self.store
                    .upsert_sub_item(issue.id, &item.content)
                    .await
                    .context("failed to store extracted sub-item")?;
            }
            stored = self
                .store
                .list_sub_items(issue.id)
                .await
                .context("failed to list sub-items")?;
        } else {
            outcome.extraction = Some(ExtractionStep::Existing);
        }
        outcome.state = IssueState::MirroredWithSubItems;

        let current: Vec<SubItemState> = stored
            .iter()
            .map(|item| SubItemState::new(item.content.clone(), item.is_done))
            .collect();
        let reconciliation = self
            .reconciler
            .reconcile(issue_key, &current, report_text)
            .await;
        outcome.reconciliation = Some(reconciliation.source);
        self.write_back(&stored, &reconciliation.items).await?;

        outcome.progress_percent = progress_percent(&reconciliation.items);
        outcome.sub_items = reconciliation.items;
        let complete =
            !outcome.sub_items.is_empty() && outcome.sub_items.iter().all(|item| item.is_done);
        if complete {
            outcome.state = IssueState::Complete;
            self.complete_remote(remote, report_text, outcome).await;
        }
        Ok(())
    }

    async fn write_back(&self, stored: &[SubItem], reconciled: &[SubItemState]) -> Result<()> {
        for (item, verdict) in stored.iter().zip(reconciled) {
            if item.is_done != verdict.is_done {
                self.store
                    .set_sub_item_done(item.id, verdict.is_done)
                    .await
                    .with_context(|| format!("failed to update sub-item {}", item.id))?;
            }
        }
        Ok(())
    }

    /// Moves the remote issue to its done state and posts the audit comment.
    ///
    /// Remote failures are recorded on the outcome and logged; local completion stands.
    async fn complete_remote(
        &self,
        remote: &TrackerIssue,
        report_text: &str,
        outcome: &mut IssueOutcome,
    ) {
        let issue_key = remote.key.as_str();
        let aliases = &self.config.transition_aliases;
        if aliases.status_matches(WorkflowAction::Done, &remote.status) {
            tracing::debug!(issue_key, status = %remote.status, "remote issue already done");
            outcome.transition = Some(TransitionOutcome {
                transition_found: true,
                transition_id: None,
                success: true,
            });
            return;
        }

        let available = match self.tracker.list_transitions(issue_key).await {
            Ok(available) => available,
            Err(error) => {
                tracing::warn!(issue_key, %error, "failed to list remote transitions");
                Vec::new()
            }
        };
        outcome.transition = Some(match aliases.find_transition(WorkflowAction::Done, &available) {
            None => {
                let names: Vec<&str> = available.iter().map(|t| t.name.as_str()).collect();
                tracing::warn!(
                    issue_key,
                    available = ?names,
                    "no remote transition matches the done aliases"
                );
                TransitionOutcome {
                    transition_found: false,
                    transition_id: None,
                    success: false,
                }
            }
            Some(transition) => {
                let result = self
                    .tracker
                    .execute_transition(issue_key, &transition.id)
                    .await;
                if let Err(error) = &result {
                    tracing::warn!(issue_key, transition_id = %transition.id, %error, "remote transition failed");
                } else {
                    tracing::info!(issue_key, transition = %transition.name, "moved remote issue to done");
                }
                TransitionOutcome {
                    transition_found: true,
                    transition_id: Some(transition.id.clone()),
                    success: result.is_ok(),
                }
            }
        });

        match self
            .tracker
            .add_comment(issue_key, &audit_comment(report_text))
            .await
        {
            Ok(()) => outcome.comment_posted = true,
            Err(error) => tracing::warn!(issue_key, %error, "failed to post audit comment"),
        }
    }

    async fn attach_files(&self, user: &UserRecord, remote: &TrackerIssue) -> usize {
        let Some(root) = self.config.attachment_root.clone() else {
            return 0;
        };
        let expertise = user.expertise.clone();
        let summary = remote.summary.clone();
        let description = remote.description.clone();
        let matched = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            match_files(&root, expertise.as_deref(), &summary, &description)
        })
        .await;

        let files = match matched {
            Ok(Ok(files)) => files,
            Ok(Err(error)) => {
                tracing::warn!(issue_key = %remote.key, error = %format!("{error:#}"), "attachment scan failed");
                return 0;
            }
            Err(error) => {
                tracing::warn!(issue_key = %remote.key, %error, "attachment scan task failed");
                return 0;
            }
        };
        attach_matching_files(
            self.tracker.as_ref(),
            &remote.key,
            &files,
            &remote.attachment_names,
        )
        .await
    }
}
