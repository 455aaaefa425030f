use std::time::Duration;

use kiln_ai::{ChatRequest, KilnAiError, LlmClient, Message};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 4_096;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq)]
/// Per-call completion parameters.
pub struct CompletionSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_millis(DEFAULT_COMPLETION_TIMEOUT_MS),
        }
    }
}

/// Sends `system_prompt` plus `messages` and returns the assistant text.
///
/// Exceeding `settings.timeout` yields the retryable [`KilnAiError::Timeout`];
/// a blank completion is reported as [`KilnAiError::InvalidResponse`].
pub async fn complete_text(
    client: &dyn LlmClient,
    system_prompt: &str,
    messages: &[Message],
    settings: &CompletionSettings,
) -> Result<String, KilnAiError> {
    let mut request_messages = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.trim().is_empty() {
        request_messages.push(Message::system(system_prompt));
    }
    request_messages.extend(messages.iter().cloned());
    let request = ChatRequest {
        model: settings.model.clone(),
        messages: request_messages,
        max_tokens: Some(settings.max_tokens),
        temperature: Some(settings.temperature),
    };

    let timeout_ms = settings.timeout.as_millis() as u64;
    let response = tokio::time::timeout(settings.timeout, client.complete(request))
        .await
        .map_err(|_| KilnAiError::Timeout { timeout_ms })??;
    let text = response.message.content.trim();
    if text.is_empty() {
        return Err(KilnAiError::InvalidResponse(
            "provider returned an empty completion".to_string(),
        ));
    }
    tracing::debug!(
        model = settings.model.as_str(),
        output_tokens = response.usage.output_tokens,
        "completion received"
    );
    Ok(text.to_string())
}
