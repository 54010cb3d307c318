use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::transport_helpers::{
    is_retryable_tracker_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};
use crate::{IssueTracker, TrackerAccount, TrackerError, TrackerIssue, TrackerTransition};

const SEARCH_MAX_RESULTS: &str = "100";
const SEARCH_FIELDS: &str = "summary,status,description,attachment";
const ERROR_BODY_MAX_CHARS: usize = 800;

#[derive(Debug, Clone)]
/// Connection settings for a Jira Cloud/Server REST endpoint.
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Upper bound on one tracker operation, retries and backoff included.
    pub operation_timeout_ms: u64,
}

#[derive(Clone)]
/// Jira REST v2 implementation of [`IssueTracker`].
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
    operation_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraIssueFields,
}

#[derive(Debug, Deserialize)]
struct JiraIssueFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<JiraNamed>,
    #[serde(default)]
    attachment: Option<Vec<JiraAttachment>>,
}

#[derive(Debug, Deserialize)]
struct JiraAttachment {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct JiraNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JiraTransitionsResponse {
    #[serde(default)]
    transitions: Vec<JiraTransition>,
}

#[derive(Debug, Deserialize)]
struct JiraTransition {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraMyself {
    account_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self, TrackerError> {
        if config.base_url.trim().is_empty() {
            return Err(TrackerError::InvalidConfig(
                "jira base url must not be empty".to_string(),
            ));
        }
        if config.email.trim().is_empty() || config.api_token.trim().is_empty() {
            return Err(TrackerError::InvalidConfig(
                "jira email and api token are required".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("standup-tracker"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                TrackerError::InvalidConfig(format!("failed to create jira http client: {error}"))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            email: config.email.trim().to_string(),
            api_token: config.api_token.trim().to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms.max(1)),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.email, Some(&self.api_token))
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        request_builder: F,
    ) -> Result<reqwest::Response, TrackerError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        match tokio::time::timeout(
            self.operation_timeout,
            self.send_attempts(operation, request_builder),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, "jira request exceeded operation deadline");
                Err(TrackerError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: u64::try_from(self.operation_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }

    async fn send_attempts<F>(
        &self,
        operation: &str,
        mut request_builder: F,
    ) -> Result<reqwest::Response, TrackerError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header(
                    "x-standup-retry-attempt",
                    attempt.saturating_sub(1).to_string(),
                )
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_tracker_status(status.as_u16())
                    {
                        tracing::debug!(
                            operation,
                            attempt,
                            status = status.as_u16(),
                            "retrying jira request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    return Err(TrackerError::Status {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, ERROR_BODY_MAX_CHARS),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tracing::debug!(operation, attempt, %error, "retrying jira request");
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(TrackerError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }

    async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T, TrackerError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, request_builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| TrackerError::Decode {
                operation: operation.to_string(),
                source,
            })
    }
}

/// Builds the assignee JQL used for the per-user issue sync.
pub(crate) fn assigned_issues_jql(user_email: &str, project_keys: &[String]) -> String {
    let escaped_email = user_email.trim().replace('\\', "\\\\").replace('"', "\\\"");
    let projects = project_keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    format!("assignee = \"{escaped_email}\" AND project in ({projects}) ORDER BY created DESC")
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn search_assigned(
        &self,
        user_email: &str,
        project_keys: &[String],
    ) -> Result<Vec<TrackerIssue>, TrackerError> {
        if project_keys.iter().all(|key| key.trim().is_empty()) {
            tracing::warn!("no jira project keys configured; skipping assignee search");
            return Ok(Vec::new());
        }

        let jql = assigned_issues_jql(user_email, project_keys);
        let response: JiraSearchResponse = self
            .request_json("search assigned issues", || {
                self.request(Method::GET, "/rest/api/2/search").query(&[
                    ("jql", jql.as_str()),
                    ("maxResults", SEARCH_MAX_RESULTS),
                    ("fields", SEARCH_FIELDS),
                ])
            })
            .await?;

        Ok(response
            .issues
            .into_iter()
            .map(|issue| TrackerIssue {
                key: issue.key,
                summary: issue.fields.summary.unwrap_or_default(),
                description: issue.fields.description.unwrap_or_default(),
                status: issue
                    .fields
                    .status
                    .map(|status| status.name)
                    .unwrap_or_default(),
                attachment_names: issue
                    .fields
                    .attachment
                    .unwrap_or_default()
                    .into_iter()
                    .map(|attachment| attachment.filename)
                    .collect(),
            })
            .collect())
    }

    async fn list_transitions(
        &self,
        issue_key: &str,
    ) -> Result<Vec<TrackerTransition>, TrackerError> {
        let path = format!("/rest/api/2/issue/{issue_key}/transitions");
        let response: JiraTransitionsResponse = self
            .request_json("list transitions", || self.request(Method::GET, &path))
            .await?;
        Ok(response
            .transitions
            .into_iter()
            .map(|transition| TrackerTransition {
                id: transition.id,
                name: transition.name,
            })
            .collect())
    }

    async fn execute_transition(
        &self,
        issue_key: &str,
        transition_id: &str,
    ) -> Result<(), TrackerError> {
        let path = format!("/rest/api/2/issue/{issue_key}/transitions");
        let payload = json!({ "transition": { "id": transition_id } });
        self.send_with_retry("execute transition", || {
            self.request(Method::POST, &path).json(&payload)
        })
        .await?;
        Ok(())
    }

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<(), TrackerError> {
        let path = format!("/rest/api/2/issue/{issue_key}/comment");
        let payload = json!({ "body": body });
        self.send_with_retry("add comment", || {
            self.request(Method::POST, &path).json(&payload)
        })
        .await?;
        Ok(())
    }

    async fn add_attachment(
        &self,
        issue_key: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), TrackerError> {
        let path = format!("/rest/api/2/issue/{issue_key}/attachments");
        self.send_with_retry("add attachment", || {
            let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name.to_string());
            self.request(Method::POST, &path)
                .header("X-Atlassian-Token", "no-check")
                .multipart(reqwest::multipart::Form::new().part("file", part))
        })
        .await?;
        Ok(())
    }

    async fn current_account(&self) -> Result<TrackerAccount, TrackerError> {
        let myself: JiraMyself = self
            .request_json("resolve current account", || {
                self.request(Method::GET, "/rest/api/2/myself")
            })
            .await?;
        Ok(TrackerAccount {
            account_id: myself.account_id,
            display_name: myself.display_name,
            email: myself.email_address,
        })
    }
}
