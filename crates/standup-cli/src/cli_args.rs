use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_role(value: &str) -> Result<standup_store::UserRole, String> {
    standup_store::UserRole::parse(value)
        .ok_or_else(|| format!("unknown role '{value}', expected worker or manager"))
}

fn parse_tier(value: &str) -> Result<standup_store::SubscriptionTier, String> {
    standup_store::SubscriptionTier::parse(value)
        .ok_or_else(|| format!("unknown tier '{value}', expected basic or pro"))
}

#[derive(Debug, Parser)]
#[command(
    name = "standup",
    about = "Reconcile daily progress reports with assigned tracker issues",
    version
)]
pub struct Cli {
    #[arg(
        long = "jira-url",
        env = "STANDUP_JIRA_URL",
        default_value = "",
        help = "Base URL of the Jira site, e.g. https://example.atlassian.net"
    )]
    pub jira_url: String,

    #[arg(
        long = "jira-email",
        env = "STANDUP_JIRA_EMAIL",
        default_value = "",
        help = "Account email used for Jira basic authentication"
    )]
    pub jira_email: String,

    #[arg(
        long = "jira-api-token",
        env = "STANDUP_JIRA_API_TOKEN",
        hide_env_values = true,
        default_value = "",
        help = "Jira API token paired with --jira-email"
    )]
    pub jira_api_token: String,

    #[arg(
        long = "jira-project",
        env = "STANDUP_JIRA_PROJECTS",
        value_delimiter = ',',
        help = "Project keys searched for assigned issues (comma-delimited)"
    )]
    pub jira_projects: Vec<String>,

    #[arg(
        long,
        env = "STANDUP_MODEL",
        default_value = standup_core::config::DEFAULT_MODEL,
        help = "Chat model used for sub-item extraction and reconciliation"
    )]
    pub model: String,

    #[arg(
        long = "api-base",
        env = "STANDUP_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for OpenAI-compatible APIs"
    )]
    pub api_base: String,

    #[arg(
        long = "api-key",
        env = "STANDUP_API_KEY",
        hide_env_values = true,
        help = "API key for the OpenAI-compatible endpoint"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "state-db",
        env = "STANDUP_STATE_DB",
        default_value = ".standup/standup.sqlite",
        help = "SQLite database holding reports, mirrored issues, and sub-items"
    )]
    pub state_db: PathBuf,

    #[arg(
        long = "max-sub-items",
        env = "STANDUP_MAX_SUB_ITEMS",
        default_value_t = standup_core::config::DEFAULT_MAX_SUB_ITEMS,
        value_parser = parse_positive_usize,
        help = "Upper bound on sub-items derived per issue"
    )]
    pub max_sub_items: usize,

    #[arg(
        long = "request-timeout-ms",
        env = "STANDUP_REQUEST_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each tracker and model HTTP request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "model-timeout-ms",
        env = "STANDUP_MODEL_TIMEOUT_MS",
        default_value_t = standup_core::config::DEFAULT_MODEL_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Deadline for one model call including retries; on expiry the fallback is used"
    )]
    pub model_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "STANDUP_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per tracker request and per model request before giving up"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "tracker-timeout-ms",
        env = "STANDUP_TRACKER_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "Deadline for one tracker operation including retries and backoff"
    )]
    pub tracker_timeout_ms: u64,

    #[arg(
        long = "attachment-root",
        env = "STANDUP_ATTACHMENT_ROOT",
        help = "Shared folder scanned for files to attach to issues (pro tier)"
    )]
    pub attachment_root: Option<PathBuf>,

    #[arg(
        long = "config",
        env = "STANDUP_CONFIG",
        help = "TOML file overriding extractor keywords and transition aliases"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Args)]
pub struct CliUser {
    #[arg(long = "email", env = "STANDUP_USER_EMAIL", help = "Worker email used for tracker searches")]
    pub email: String,

    #[arg(
        long = "user",
        env = "STANDUP_USER",
        help = "Stable user id; defaults to the email"
    )]
    pub user_id: Option<String>,
}

impl CliUser {
    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Record a report and reconcile every assigned issue against it.
    SubmitReport {
        #[command(flatten)]
        user: CliUser,
        #[arg(long, conflicts_with = "text_file", required_unless_present = "text_file")]
        text: Option<String>,
        #[arg(long = "text-file")]
        text_file: Option<PathBuf>,
    },
    /// Reconcile assigned issues against the latest stored report.
    Progress {
        #[command(flatten)]
        user: CliUser,
    },
    /// Fill in the tracker account id and display name from the tracker.
    SyncProfile {
        #[command(flatten)]
        user: CliUser,
    },
    /// Set tier, role, and expertise for a user.
    SetProfile {
        #[command(flatten)]
        user: CliUser,
        #[arg(long, value_parser = parse_tier)]
        tier: Option<standup_store::SubscriptionTier>,
        #[arg(long, value_parser = parse_role)]
        role: Option<standup_store::UserRole>,
        #[arg(long)]
        expertise: Option<String>,
    },
    /// Print a user's reports, oldest first. Managers may pass --all for everyone's, newest first.
    Reports {
        #[command(flatten)]
        user: CliUser,
        #[arg(long)]
        all: bool,
    },
    /// Delete a user with their reports, mirrored issues, and sub-items.
    PurgeUser {
        #[command(flatten)]
        user: CliUser,
    },
}

impl CliCommand {
    pub fn user(&self) -> &CliUser {
        match self {
            Self::SubmitReport { user, .. }
            | Self::Progress { user }
            | Self::SyncProfile { user }
            | Self::SetProfile { user, .. }
            | Self::Reports { user, .. }
            | Self::PurgeUser { user } => user,
        }
    }
}
