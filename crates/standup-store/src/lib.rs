//! Record store abstractions for reports, mirrored issues, and sub-items.
//!
//! Two backends share one contract: [`InMemoryRecordStore`] for tests and
//! [`SqliteRecordStore`] for durable use. Both enforce at most one mirrored issue per
//! `(remote_key, owner)` and at most one sub-item per `(issue, content)`, and both
//! cascade a user purge to that user's reports, issues, and sub-items.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;
mod types;

pub use sqlite::SqliteRecordStore;
pub use types::{
    MirroredIssue, NewMirroredIssue, ProfileUpdate, ReportRecord, SubItem, SubscriptionTier,
    TierFeature, UserRecord, UserRole,
};

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, RecordStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("user '{0}' not found")]
    UserNotFound(String),
    #[error("mirrored issue {0} not found")]
    IssueNotFound(i64),
    #[error("sub-item {0} not found")]
    SubItemNotFound(i64),
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Async store contract used by the reconciliation engine and the CLI.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the user, creating a basic-tier record on first access.
    async fn ensure_user(&self, user_id: &str, email: &str) -> StoreResult<UserRecord>;
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;
    async fn update_profile(&self, user_id: &str, update: ProfileUpdate)
        -> StoreResult<UserRecord>;
    /// Deletes the user with their reports, mirrored issues, and sub-items.
    async fn purge_user(&self, user_id: &str) -> StoreResult<bool>;

    async fn record_report(&self, user_id: &str, text: &str) -> StoreResult<ReportRecord>;
    async fn latest_report(&self, user_id: &str) -> StoreResult<Option<ReportRecord>>;
    /// Reports ordered by creation time, oldest first.
    async fn list_reports(&self, user_id: &str) -> StoreResult<Vec<ReportRecord>>;
    /// Every user's reports, newest first.
    async fn list_all_reports(&self) -> StoreResult<Vec<ReportRecord>>;

    /// Get-or-create keyed on `(remote_key, owner_id)`; the flag is true when created.
    async fn get_or_create_issue(
        &self,
        issue: NewMirroredIssue,
    ) -> StoreResult<(MirroredIssue, bool)>;
    async fn list_issues(&self, owner_id: &str) -> StoreResult<Vec<MirroredIssue>>;

    /// Sub-items in insertion order.
    async fn list_sub_items(&self, issue_id: i64) -> StoreResult<Vec<SubItem>>;
    /// Idempotent insert keyed on `(issue_id, content)`; the flag is true when created.
    async fn upsert_sub_item(&self, issue_id: i64, content: &str) -> StoreResult<(SubItem, bool)>;
    async fn set_sub_item_done(&self, sub_item_id: i64, is_done: bool) -> StoreResult<()>;
}

pub(crate) fn validate_sub_item_content(content: &str) -> StoreResult<()> {
    if content.trim().is_empty() {
        return Err(RecordStoreError::InvalidValue {
            field: "sub_item.content",
            reason: "content must not be empty".to_string(),
        });
    }
    Ok(())
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    users: HashMap<String, UserRecord>,
    reports: Vec<ReportRecord>,
    issues: Vec<MirroredIssue>,
    sub_items: Vec<SubItem>,
    next_report_id: i64,
    next_issue_id: i64,
    next_sub_item_id: i64,
}

impl StoreInner {
    fn allocate(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn ensure_user(&self, user_id: &str, email: &str) -> StoreResult<UserRecord> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserRecord {
                user_id: user_id.to_string(),
                email: email.to_string(),
                tracker_account_id: None,
                tracker_email: None,
                display_name: None,
                expertise: None,
                tier: SubscriptionTier::Basic,
                role: UserRole::Worker,
                created_at: Utc::now(),
            });
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> StoreResult<UserRecord> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| RecordStoreError::UserNotFound(user_id.to_string()))?;
        update.apply(user);
        Ok(user.clone())
    }

    async fn purge_user(&self, user_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(user_id).is_none() {
            return Ok(false);
        }
        inner.reports.retain(|report| report.user_id != user_id);
        let purged_issue_ids: Vec<i64> = inner
            .issues
            .iter()
            .filter(|issue| issue.owner_id == user_id)
            .map(|issue| issue.id)
            .collect();
        inner.issues.retain(|issue| issue.owner_id != user_id);
        inner
            .sub_items
            .retain(|item| !purged_issue_ids.contains(&item.issue_id));
        Ok(true)
    }

    async fn record_report(&self, user_id: &str, text: &str) -> StoreResult<ReportRecord> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(user_id) {
            return Err(RecordStoreError::UserNotFound(user_id.to_string()));
        }
        let report = ReportRecord {
            id: StoreInner::allocate(&mut inner.next_report_id),
            user_id: user_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        inner.reports.push(report.clone());
        Ok(report)
    }

    async fn latest_report(&self, user_id: &str) -> StoreResult<Option<ReportRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .reports
            .iter()
            .filter(|report| report.user_id == user_id)
            .max_by_key(|report| (report.created_at, report.id))
            .cloned())
    }

    async fn list_reports(&self, user_id: &str) -> StoreResult<Vec<ReportRecord>> {
        let inner = self.inner.read().await;
        let mut reports: Vec<ReportRecord> = inner
            .reports
            .iter()
            .filter(|report| report.user_id == user_id)
            .cloned()
            .collect();
        reports.sort_by_key(|report| (report.created_at, report.id));
        Ok(reports)
    }

    async fn list_all_reports(&self) -> StoreResult<Vec<ReportRecord>> {
        let mut reports = self.inner.read().await.reports.clone();
        reports.sort_by_key(|report| std::cmp::Reverse((report.created_at, report.id)));
        Ok(reports)
    }

    async fn get_or_create_issue(
        &self,
        issue: NewMirroredIssue,
    ) -> StoreResult<(MirroredIssue, bool)> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&issue.owner_id) {
            return Err(RecordStoreError::UserNotFound(issue.owner_id));
        }
        if let Some(existing) = inner
            .issues
            .iter()
            .find(|row| row.remote_key == issue.remote_key && row.owner_id == issue.owner_id)
        {
            return Ok((existing.clone(), false));
        }

        let created = MirroredIssue {
            id: StoreInner::allocate(&mut inner.next_issue_id),
            remote_key: issue.remote_key,
            owner_id: issue.owner_id,
            title: issue.title,
            description: issue.description,
            created_at: Utc::now(),
        };
        inner.issues.push(created.clone());
        Ok((created, true))
    }

    async fn list_issues(&self, owner_id: &str) -> StoreResult<Vec<MirroredIssue>> {
        let inner = self.inner.read().await;
        Ok(inner
            .issues
            .iter()
            .filter(|issue| issue.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_sub_items(&self, issue_id: i64) -> StoreResult<Vec<SubItem>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sub_items
            .iter()
            .filter(|item| item.issue_id == issue_id)
            .cloned()
            .collect())
    }

    async fn upsert_sub_item(&self, issue_id: i64, content: &str) -> StoreResult<(SubItem, bool)> {
        validate_sub_item_content(content)?;
        let mut inner = self.inner.write().await;
        if !inner.issues.iter().any(|issue| issue.id == issue_id) {
            return Err(RecordStoreError::IssueNotFound(issue_id));
        }
        if let Some(existing) = inner
            .sub_items
            .iter()
            .find(|item| item.issue_id == issue_id && item.content == content)
        {
            return Ok((existing.clone(), false));
        }

        let created = SubItem {
            id: StoreInner::allocate(&mut inner.next_sub_item_id),
            issue_id,
            content: content.to_string(),
            is_done: false,
        };
        inner.sub_items.push(created.clone());
        Ok((created, true))
    }

    async fn set_sub_item_done(&self, sub_item_id: i64, is_done: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .sub_items
            .iter_mut()
            .find(|item| item.id == sub_item_id)
            .ok_or(RecordStoreError::SubItemNotFound(sub_item_id))?;
        item.is_done = is_done;
        Ok(())
    }
}
