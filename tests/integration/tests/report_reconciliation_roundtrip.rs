use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use standup_ai::{OpenAiClient, OpenAiConfig};
use standup_core::issue_mirror::ExtractionStep;
use standup_core::{EngineConfig, IssueMirrorManager, IssueState, ReconciliationSource};
use standup_store::{RecordStore, SqliteRecordStore};
use standup_tracker::{JiraClient, JiraConfig};
use tempfile::tempdir;

const REPORT: &str = "Drafted the memo and sent it to legal.";

fn jira(server: &MockServer) -> Arc<JiraClient> {
    Arc::new(
        JiraClient::new(JiraConfig {
            base_url: server.base_url(),
            email: "bot@example.com".to_string(),
            api_token: "secret".to_string(),
            request_timeout_ms: 5_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
            operation_timeout_ms: 10_000,
        })
        .expect("jira client"),
    )
}

fn model(server: &MockServer) -> Arc<OpenAiClient> {
    Arc::new(
        OpenAiClient::new(OpenAiConfig {
            api_base: format!("{}/v1", server.base_url()),
            api_key: "test-key".to_string(),
            organization: None,
            request_timeout_ms: 5_000,
            max_retries: 0,
            retry_budget_ms: 0,
            retry_jitter: false,
        })
        .expect("model client"),
    )
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        project_keys: vec!["OPS".to_string()],
        model_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

fn chat_reply(content: serde_json::Value) -> serde_json::Value {
    json!({
        "choices": [{
            "message": {"content": content.to_string()},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 10, "total_tokens": 20}
    })
}

fn mock_search(server: &MockServer, description: &str, status: &str) {
    server.mock(|when, then| {
        when.method(GET).path("/rest/api/2/search");
        then.status(200).json_body(json!({
            "issues": [{
                "key": "OPS-7",
                "fields": {
                    "summary": "Legal memo",
                    "description": description,
                    "status": {"name": status}
                }
            }]
        }));
    });
}

#[tokio::test]
async fn integration_completed_report_closes_issue_and_persists_state() {
    let jira_server = MockServer::start();
    let model_server = MockServer::start();
    let temp = tempdir().expect("tempdir");

    mock_search(&jira_server, "Draft the memo. Send it to legal.", "In Progress");
    let list_transitions = jira_server.mock(|when, then| {
        when.method(GET).path("/rest/api/2/issue/OPS-7/transitions");
        then.status(200).json_body(json!({
            "transitions": [{"id": "21", "name": "In Review"}, {"id": "31", "name": "Resolve"}]
        }));
    });
    let execute = jira_server.mock(|when, then| {
        when.method(POST)
            .path("/rest/api/2/issue/OPS-7/transitions")
            .json_body(json!({"transition": {"id": "31"}}));
        then.status(204);
    });
    let comment = jira_server.mock(|when, then| {
        when.method(POST)
            .path("/rest/api/2/issue/OPS-7/comment")
            .json_body(json!({"body": format!("All sub-items completed: {REPORT}")}));
        then.status(201).json_body(json!({"id": "1"}));
    });
    let extract = model_server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_includes("task-summarization assistant");
        then.status(200).json_body(chat_reply(json!({
            "task_key": "OPS-7",
            "subtasks": [{"content": "draft the memo"}, {"content": "Send memo to legal."}]
        })));
    });
    let reconcile = model_server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_includes("reviewing progress");
        then.status(200).json_body(chat_reply(json!({
            "subtasks": [
                {"content": "Draft the memo", "is_done": true},
                {"content": "Send memo to legal", "is_done": "true"}
            ]
        })));
    });

    let db_path = temp.path().join("state.sqlite");
    let store = Arc::new(SqliteRecordStore::new(&db_path).expect("store"));
    let manager = IssueMirrorManager::new(
        store.clone(),
        jira(&jira_server),
        model(&model_server),
        engine_config(),
    )
    .expect("manager");

    let outcome = manager
        .submit_report("worker", "worker@example.com", REPORT)
        .await
        .expect("submission");

    extract.assert();
    reconcile.assert();
    list_transitions.assert();
    execute.assert();
    comment.assert();

    let task = &outcome.updated_tasks[0];
    assert_eq!(task.issue_key, "OPS-7");
    assert_eq!(task.state, IssueState::Complete);
    assert_eq!(task.extraction, Some(ExtractionStep::Model));
    assert_eq!(task.reconciliation, Some(ReconciliationSource::Model));
    assert_eq!(task.progress_percent, 100.0);
    assert!(task.comment_posted);

    let reopened = SqliteRecordStore::new(&db_path).expect("reopen");
    let issues = reopened.list_issues("worker").await.expect("issues");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].title, "Legal memo");
    let items = reopened.list_sub_items(issues[0].id).await.expect("items");
    let contents: Vec<&str> = items.iter().map(|item| item.content.as_str()).collect();
    assert_eq!(contents, vec!["Draft the memo", "Send memo to legal"]);
    assert!(items.iter().all(|item| item.is_done));
    let latest = reopened
        .latest_report("worker")
        .await
        .expect("latest")
        .expect("report recorded");
    assert_eq!(latest.text, REPORT);

    let json = serde_json::to_value(&outcome).expect("outcome serializes");
    assert_eq!(json["updated_tasks"][0]["state"], "complete");
    assert_eq!(json["updated_tasks"][0]["transition"]["transition_id"], "31");
}

#[tokio::test]
async fn integration_model_outage_degrades_to_fallback_and_keeps_progress() {
    let jira_server = MockServer::start();
    let model_server = MockServer::start();
    let temp = tempdir().expect("tempdir");

    mock_search(
        &jira_server,
        "Prepare quarterly report.\nShare with finance team.",
        "To Do",
    );
    let transitions = jira_server.mock(|when, then| {
        when.method(GET).path("/rest/api/2/issue/OPS-7/transitions");
        then.status(200).json_body(json!({"transitions": []}));
    });
    let outage = model_server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(503).body("overloaded");
    });

    let store = Arc::new(SqliteRecordStore::new(temp.path().join("state.sqlite")).expect("store"));
    let manager = IssueMirrorManager::new(
        store.clone(),
        jira(&jira_server),
        model(&model_server),
        engine_config(),
    )
    .expect("manager");

    let first = manager
        .submit_report("worker", "worker@example.com", "Prepared the quarterly report.")
        .await
        .expect("first submission");
    let second = manager
        .submit_report("worker", "worker@example.com", "Shared it with finance.")
        .await
        .expect("second submission");

    // extraction + reconciliation on the first pass, reconciliation only on the second
    outage.assert_hits(3);
    transitions.assert_hits(0);

    let first_task = &first.updated_tasks[0];
    assert_eq!(first_task.extraction, Some(ExtractionStep::Fallback));
    assert_eq!(first_task.reconciliation, Some(ReconciliationSource::Fallback));
    assert_eq!(first_task.progress_percent, 0.0);
    let second_task = &second.updated_tasks[0];
    assert_eq!(second_task.extraction, Some(ExtractionStep::Existing));
    assert_eq!(second_task.sub_items, first_task.sub_items);
    assert_eq!(second_task.sub_items.len(), 2);
    assert_eq!(second_task.sub_items[0].content, "Prepare quarterly report");
    assert_ne!(first.report_id, second.report_id);

    assert_eq!(store.list_reports("worker").await.expect("reports").len(), 2);
}
