//! Provider-neutral chat types and HTTP completion clients for Kiln.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiCompatibleClient, OpenAiCompatibleConfig};
pub use retry::{
    completion_deadline_ms, new_request_id, next_backoff_ms, next_backoff_ms_with_jitter,
    parse_retry_after_ms, provider_retry_delay_ms, retry_budget_allows_delay,
    retry_budget_for_deadline, should_retry_status,
};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, KilnAiError, LlmClient, Message, MessageRole,
};
