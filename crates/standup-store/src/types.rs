use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Capability a subscription tier unlocks.
pub enum TierFeature {
    Model,
    Tracker,
    FileCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SubscriptionTier` values.
pub enum SubscriptionTier {
    #[default]
    Basic,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }

    pub fn features(self) -> &'static [TierFeature] {
        match self {
            Self::Basic => &[TierFeature::Model, TierFeature::Tracker],
            Self::Pro => &[
                TierFeature::Model,
                TierFeature::Tracker,
                TierFeature::FileCheck,
            ],
        }
    }

    pub fn has_feature(self, feature: TierFeature) -> bool {
        self.features().contains(&feature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Whether a user only submits reports or may also read everyone's.
pub enum UserRole {
    #[default]
    Worker,
    Manager,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Manager => "manager",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "worker" => Some(Self::Worker),
            "manager" => Some(Self::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Locally stored identity and profile attributes for one worker.
///
/// `email` is the identity used for assignee searches. `tracker_email` is whatever
/// address the tracker credentials report and is informational only.
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    pub tracker_account_id: Option<String>,
    pub tracker_email: Option<String>,
    pub display_name: Option<String>,
    pub expertise: Option<String>,
    pub tier: SubscriptionTier,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Partial profile update; `None` fields are left untouched.
pub struct ProfileUpdate {
    pub tracker_account_id: Option<String>,
    pub tracker_email: Option<String>,
    pub display_name: Option<String>,
    pub expertise: Option<String>,
    pub tier: Option<SubscriptionTier>,
    pub role: Option<UserRole>,
}

impl ProfileUpdate {
    pub(crate) fn apply(self, user: &mut UserRecord) {
        if let Some(tracker_email) = self.tracker_email {
            user.tracker_email = Some(tracker_email);
        }
        if let Some(account_id) = self.tracker_account_id {
            user.tracker_account_id = Some(account_id);
        }
        if let Some(display_name) = self.display_name {
            user.display_name = Some(display_name);
        }
        if let Some(expertise) = self.expertise {
            user.expertise = Some(expertise);
        }
        if let Some(tier) = self.tier {
            user.tier = tier;
        }
        if let Some(role) = self.role {
            user.role = role;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Immutable free-text progress report.
pub struct ReportRecord {
    pub id: i64,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Snapshot fields used when a remote issue is first seen for an owner.
pub struct NewMirroredIssue {
    pub remote_key: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Local mirror of a remote tracker issue. Title and description are never refreshed.
pub struct MirroredIssue {
    pub id: i64,
    pub remote_key: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Derived unit of work belonging to one mirrored issue.
pub struct SubItem {
    pub id: i64,
    pub issue_id: i64,
    pub content: String,
    pub is_done: bool,
}

#[cfg(test)]
mod tests {
    use super::{SubscriptionTier, TierFeature, UserRole};

    #[test]
    fn unit_tier_features_gate_file_check_to_pro() {
        assert!(SubscriptionTier::Basic.has_feature(TierFeature::Model));
        assert!(SubscriptionTier::Basic.has_feature(TierFeature::Tracker));
        assert!(!SubscriptionTier::Basic.has_feature(TierFeature::FileCheck));
        assert!(SubscriptionTier::Pro.has_feature(TierFeature::FileCheck));
    }

    #[test]
    fn unit_tier_parse_is_case_insensitive() {
        assert_eq!(SubscriptionTier::parse(" PRO "), Some(SubscriptionTier::Pro));
        assert_eq!(SubscriptionTier::parse("basic"), Some(SubscriptionTier::Basic));
        assert_eq!(SubscriptionTier::parse("enterprise"), None);
        assert_eq!(SubscriptionTier::default(), SubscriptionTier::Basic);
    }

    #[test]
    fn unit_role_defaults_to_worker_and_parses() {
        assert_eq!(UserRole::default(), UserRole::Worker);
        assert_eq!(UserRole::parse("Manager"), Some(UserRole::Manager));
        assert_eq!(UserRole::parse("admin"), None);
        assert_eq!(UserRole::Manager.as_str(), "manager");
    }
}
