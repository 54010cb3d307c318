//! Provider-neutral chat completion types and the OpenAI-compatible client.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, StandupAiError,
    UnconfiguredLlmClient,
};
