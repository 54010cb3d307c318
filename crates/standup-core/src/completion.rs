use std::sync::Arc;
use std::time::Duration;

use standup_ai::{ChatRequest, LlmClient, Message, StandupAiError};
use thiserror::Error;

#[derive(Debug, Error)]
/// Failure of a single completion call; every variant routes callers to their fallback.
pub enum CompletionError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model backend failed: {0}")]
    Backend(#[from] StandupAiError),
    #[error("model returned empty output")]
    EmptyOutput,
}

/// Prompt-in, raw-text-out adapter over an [`LlmClient`] with a hard deadline.
///
/// Constructed once at startup and shared by the extractor and the reconciler.
#[derive(Clone)]
pub struct CompletionModel {
    client: Arc<dyn LlmClient>,
    model: String,
    timeout: Duration,
}

impl CompletionModel {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends `prompt` at temperature 0 and returns the raw assistant text.
    pub async fn complete(
        &self,
        system: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(prompt)],
            json_mode: true,
            max_tokens: Some(max_output_tokens),
            temperature: Some(0.0),
        };

        let response = tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| CompletionError::Timeout(self.timeout))??;
        let text = response.message.text_content().trim().to_string();
        if text.is_empty() {
            return Err(CompletionError::EmptyOutput);
        }
        Ok(text)
    }
}
