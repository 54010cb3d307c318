use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use standup_ai::{LlmClient, OpenAiClient, OpenAiConfig, UnconfiguredLlmClient};
use standup_core::{EngineConfig, IssueMirrorManager};
use standup_store::{ProfileUpdate, RecordStore, ReportRecord, SqliteRecordStore, UserRole};
use standup_tracker::{JiraClient, JiraConfig};

use crate::cli_args::{Cli, CliCommand};
use crate::config_file::load_config_file;

const JIRA_RETRY_BASE_DELAY_MS: u64 = 500;

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::new(&cli.state_db)
            .with_context(|| format!("failed to open state db '{}'", cli.state_db.display()))?,
    );
    let user = cli.command.user().clone();
    let user_id = user.user_id().to_string();

    match &cli.command {
        CliCommand::SubmitReport {
            text, text_file, ..
        } => {
            let report_text = read_report_text(text.as_deref(), text_file.as_deref())?;
            let manager = build_manager(&cli, store)?;
            let outcome = manager
                .submit_report(&user_id, &user.email, &report_text)
                .await?;
            print_json(&outcome)
        }
        CliCommand::Progress { .. } => {
            let manager = build_manager(&cli, store)?;
            let view = manager.view_progress(&user_id, &user.email).await?;
            print_json(&view)
        }
        CliCommand::SyncProfile { .. } => {
            store.ensure_user(&user_id, &user.email).await?;
            let tracker = build_tracker(&cli)?;
            let profile =
                standup_core::profile_sync::sync_profile(store.as_ref(), &tracker, &user_id)
                    .await?;
            print_json(&profile)
        }
        CliCommand::SetProfile {
            tier,
            role,
            expertise,
            ..
        } => {
            store.ensure_user(&user_id, &user.email).await?;
            let profile = store
                .update_profile(
                    &user_id,
                    ProfileUpdate {
                        tier: *tier,
                        role: *role,
                        expertise: expertise.clone(),
                        ..ProfileUpdate::default()
                    },
                )
                .await?;
            print_json(&profile)
        }
        CliCommand::Reports { all, .. } => {
            let reports = list_reports(store.as_ref(), &user_id, *all).await?;
            print_json(&reports)
        }
        CliCommand::PurgeUser { .. } => {
            let purged = store.purge_user(&user_id).await?;
            print_json(&serde_json::json!({ "user_id": user_id, "purged": purged }))
        }
    }
}

/// One user's reports, or every user's when `all` is set and the caller is a manager.
async fn list_reports(
    store: &dyn RecordStore,
    user_id: &str,
    all: bool,
) -> Result<Vec<ReportRecord>> {
    if !all {
        return Ok(store.list_reports(user_id).await?);
    }
    let role = store.get_user(user_id).await?.map(|user| user.role);
    if role != Some(UserRole::Manager) {
        anyhow::bail!("user '{user_id}' is not a manager; --all requires the manager role");
    }
    Ok(store.list_all_reports().await?)
}

fn read_report_text(text: Option<&str>, text_file: Option<&Path>) -> Result<String> {
    match (text, text_file) {
        (Some(text), _) => Ok(text.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report file '{}'", path.display())),
        (None, None) => anyhow::bail!("either --text or --text-file is required"),
    }
}

pub(crate) fn build_engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig {
        model: cli.model.clone(),
        max_sub_items: cli.max_sub_items,
        model_timeout: Duration::from_millis(cli.model_timeout_ms),
        project_keys: cli
            .jira_projects
            .iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect(),
        attachment_root: cli.attachment_root.clone(),
        ..EngineConfig::default()
    };
    if let Some(path) = cli.config.as_deref() {
        load_config_file(path)?.apply(&mut config);
    }
    Ok(config)
}

fn build_tracker(cli: &Cli) -> Result<JiraClient> {
    JiraClient::new(JiraConfig {
        base_url: cli.jira_url.clone(),
        email: cli.jira_email.clone(),
        api_token: cli.jira_api_token.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: JIRA_RETRY_BASE_DELAY_MS,
        operation_timeout_ms: cli.tracker_timeout_ms,
    })
    .context("failed to configure Jira client")
}

/// Without an API key every model call fails, so extraction and reconciliation use their fallbacks.
fn build_llm(cli: &Cli) -> Result<Arc<dyn LlmClient>> {
    let api_key = cli.api_key.as_deref().map(str::trim).unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("no model API key configured; using rule-based sub-item handling");
        return Ok(Arc::new(UnconfiguredLlmClient));
    }
    let client = OpenAiClient::new(OpenAiConfig {
        api_base: cli.api_base.clone(),
        api_key: api_key.to_string(),
        organization: None,
        request_timeout_ms: cli.request_timeout_ms,
        max_retries: cli.retry_max_attempts.saturating_sub(1),
        retry_budget_ms: cli.model_timeout_ms,
        retry_jitter: true,
    })
    .context("failed to configure model client")?;
    Ok(Arc::new(client))
}

fn build_manager(cli: &Cli, store: Arc<dyn RecordStore>) -> Result<IssueMirrorManager> {
    let config = build_engine_config(cli)?;
    let tracker = Arc::new(build_tracker(cli)?);
    Ok(IssueMirrorManager::new(store, tracker, build_llm(cli)?, config)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use std::sync::Arc;

    use clap::Parser;
    use standup_ai::{ChatRequest, LlmClient, Message, StandupAiError};
    use standup_store::{InMemoryRecordStore, ProfileUpdate, RecordStore, UserRole};
    use tempfile::tempdir;

    use super::{build_engine_config, build_llm, build_manager, list_reports, read_report_text};
    use crate::cli_args::Cli;

    fn submit_cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "standup",
            "--jira-url",
            "https://example.atlassian.net",
            "--jira-email",
            "bot@example.com",
            "--jira-api-token",
            "token",
        ];
        args.extend_from_slice(extra);
        args.extend_from_slice(&[
            "submit-report",
            "--email",
            "sam@example.com",
            "--text",
            "Finished the deck.",
        ]);
        Cli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn functional_engine_config_merges_flags_and_config_file() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("standup.toml");
        fs::write(&config_path, "[transitions]\ndone = [\"Finish\"]\n").expect("write");
        let config_arg = config_path.display().to_string();
        let cli = Cli::try_parse_from([
            "standup",
            "--jira-project",
            "OPS, ,FIN",
            "--max-sub-items",
            "5",
            "--config",
            config_arg.as_str(),
            "progress",
            "--email",
            "sam@example.com",
        ])
        .expect("parse");

        let config = build_engine_config(&cli).expect("config");
        assert_eq!(config.max_sub_items, 5);
        assert_eq!(config.project_keys, vec!["OPS", "FIN"]);
        assert_eq!(config.transition_aliases.done, vec!["Finish"]);
    }

    #[test]
    fn unit_read_report_text_prefers_inline_text() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("report.txt");
        fs::write(&path, "from file").expect("write");
        assert_eq!(read_report_text(Some("inline"), None).expect("text"), "inline");
        assert_eq!(read_report_text(None, Some(&path)).expect("text"), "from file");
        assert!(read_report_text(None, None).is_err());
    }

    #[tokio::test]
    async fn regression_missing_api_key_still_builds_manager_with_failing_model() {
        let cli = submit_cli(&[]);
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        assert!(build_manager(&cli, store).is_ok());

        let llm = build_llm(&cli).expect("llm");
        let error = llm
            .complete(ChatRequest {
                model: cli.model.clone(),
                messages: vec![Message::user("hi")],
                json_mode: true,
                max_tokens: None,
                temperature: Some(0.0),
            })
            .await
            .expect_err("no key configured");
        assert!(matches!(error, StandupAiError::MissingApiKey));

        let keyed = submit_cli(&["--api-key", "sk-test"]);
        assert!(build_llm(&keyed).is_ok());
    }

    #[tokio::test]
    async fn functional_all_reports_require_manager_role() {
        let store = InMemoryRecordStore::new();
        store.ensure_user("lead", "lead@example.com").await.expect("lead");
        store.ensure_user("sam", "sam@example.com").await.expect("sam");
        store.record_report("sam", "Finished the deck.").await.expect("report");
        store.record_report("lead", "Reviewed the deck.").await.expect("report");

        assert_eq!(list_reports(&store, "lead", false).await.expect("own").len(), 1);
        assert!(list_reports(&store, "lead", true).await.is_err());

        store
            .update_profile(
                "lead",
                ProfileUpdate {
                    role: Some(UserRole::Manager),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .expect("promote");
        let all = list_reports(&store, "lead", true).await.expect("all");
        let owners: Vec<&str> = all.iter().map(|report| report.user_id.as_str()).collect();
        assert_eq!(owners, vec!["lead", "sam"]);
    }
}
