use anyhow::{Context, Result};
use standup_store::{ProfileUpdate, RecordStore, UserRecord};
use standup_tracker::IssueTracker;

/// Fills in tracker identity for a user that has none yet.
///
/// The tracker's address lands in `tracker_email`; the identity email that drives
/// assignee searches is never touched. Tracker failures are logged and leave the record unchanged; store failures propagate.
pub async fn sync_profile(
    store: &dyn RecordStore,
    tracker: &dyn IssueTracker,
    user_id: &str,
) -> Result<UserRecord> {
    let user = store
        .get_user(user_id)
        .await
        .with_context(|| format!("failed to load user '{user_id}'"))?
        .with_context(|| format!("user '{user_id}' does not exist"))?;
    if user.tracker_account_id.is_some() {
        return Ok(user);
    }

    let account = match tracker.current_account().await {
        Ok(account) => account,
        Err(error) => {
            tracing::warn!(user_id, %error, "tracker profile sync failed");
            return Ok(user);
        }
    };

    let update = ProfileUpdate {
        tracker_account_id: Some(account.account_id),
        display_name: account.display_name,
        tracker_email: account.email.filter(|email| !email.trim().is_empty()),
        ..ProfileUpdate::default()
    };
    let updated = store
        .update_profile(user_id, update)
        .await
        .with_context(|| format!("failed to store tracker profile for '{user_id}'"))?;
    tracing::info!(
        user_id,
        account_id = updated.tracker_account_id.as_deref().unwrap_or_default(),
        "synced tracker profile"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use standup_store::{InMemoryRecordStore, RecordStore};
    use standup_tracker::TrackerAccount;

    use super::sync_profile;
    use crate::test_support::FakeTracker;

    #[tokio::test]
    async fn functional_sync_profile_stores_current_account() {
        let store = InMemoryRecordStore::new();
        store.ensure_user("u1", "old@example.com").await.expect("user");
        let tracker = FakeTracker {
            account: Some(TrackerAccount {
                account_id: "acc-9".to_string(),
                display_name: Some("Sam Worker".to_string()),
                email: Some("sam@example.com".to_string()),
            }),
            ..FakeTracker::default()
        };

        let user = sync_profile(&store, &tracker, "u1").await.expect("sync");
        assert_eq!(user.tracker_account_id.as_deref(), Some("acc-9"));
        assert_eq!(user.display_name.as_deref(), Some("Sam Worker"));
        assert_eq!(user.tracker_email.as_deref(), Some("sam@example.com"));
        assert_eq!(user.email, "old@example.com");

        let again = sync_profile(&store, &tracker, "u1").await.expect("sync");
        assert_eq!(again, user);
        assert_eq!(tracker.calls(), vec!["myself".to_string()]);
    }

    #[tokio::test]
    async fn regression_tracker_failure_leaves_profile_unchanged() {
        let store = InMemoryRecordStore::new();
        let before = store.ensure_user("u2", "u2@example.com").await.expect("user");
        let tracker = FakeTracker::default();
        let after = sync_profile(&store, &tracker, "u2").await.expect("sync");
        assert_eq!(after, before);
        assert!(sync_profile(&store, &tracker, "ghost").await.is_err());
    }
}
