use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::retry::{
    is_transient_status, is_transient_transport_error, request_id, retry_after_ms, RetryPolicy,
};
use crate::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, StandupAiError};

const REQUEST_ID_HEADER: &str = "x-standup-request-id";
const RETRY_ATTEMPT_HEADER: &str = "x-standup-retry-attempt";

#[derive(Debug, Clone)]
/// Connection settings for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub retry_jitter: bool,
}

#[derive(Debug, Clone)]
/// Chat completions client used for sub-item extraction and reconciliation prompts.
pub struct OpenAiClient {
    http: reqwest::Client,
    completions_url: String,
    retry: RetryPolicy,
}

fn header_value(raw: &str, what: &str) -> Result<HeaderValue, StandupAiError> {
    HeaderValue::from_str(raw)
        .map_err(|error| StandupAiError::InvalidResponse(format!("invalid {what} header: {error}")))
}

fn completions_url(api_base: &str) -> String {
    let base = api_base.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, StandupAiError> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err(StandupAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"), "API key")?);
        if let Some(organization) = config.organization.as_deref() {
            headers.insert("OpenAI-Organization", header_value(organization, "organization")?);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            http,
            completions_url: completions_url(&config.api_base),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                budget_ms: config.retry_budget_ms,
                jitter: config.retry_jitter,
            },
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, StandupAiError> {
        let body = build_chat_request_body(&request);
        let started = Instant::now();
        let mut attempt = 0_usize;

        loop {
            let sent = self
                .http
                .post(&self.completions_url)
                .header(REQUEST_ID_HEADER, request_id())
                .header(RETRY_ATTEMPT_HEADER, attempt.to_string())
                .json(&body)
                .send()
                .await;

            let (failure, transient, retry_after) = match sent {
                Ok(response) if response.status().is_success() => {
                    let raw = response.text().await?;
                    return parse_chat_response(&raw);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    (
                        StandupAiError::HttpStatus { status, body },
                        is_transient_status(status),
                        retry_after,
                    )
                }
                Err(error) => {
                    let transient = is_transient_transport_error(&error);
                    (StandupAiError::Http(error), transient, None)
                }
            };

            let delay = transient
                .then(|| {
                    self.retry
                        .delay_before_retry(attempt, started.elapsed(), retry_after)
                })
                .flatten();
            match delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(failure),
            }
        }
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if request.json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    body
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, StandupAiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        StandupAiError::InvalidResponse("response contained no choices".to_string())
    })?;

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message {
            role: MessageRole::Assistant,
            content: flatten_openai_content(choice.message.content.as_ref()),
        },
        finish_reason: choice.finish_reason,
        usage,
    })
}

fn flatten_openai_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| {
                let part = part.as_object()?;
                match part.get("type").and_then(Value::as_str) {
                    Some("text") | Some("output_text") | None => {
                        part.get("text").and_then(Value::as_str)
                    }
                    Some(_) => None,
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
