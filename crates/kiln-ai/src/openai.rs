use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, new_request_id, parse_retry_after_ms, should_retry_status,
        RetryPolicy,
    },
    ChatRequest, ChatResponse, ChatUsage, KilnAiError, LlmClient, Message, MessageRole,
};

#[derive(Debug, Clone)]
/// Settings for any endpoint speaking the `/chat/completions` wire format.
pub struct OpenAiCompatibleConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub retry_jitter: bool,
}

#[derive(Debug, Clone)]
/// HTTP client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, KilnAiError> {
        if config.api_key.trim().is_empty() {
            return Err(KilnAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| KilnAiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            budget_ms: self.config.retry_budget_ms,
            jitter: self.config.retry_jitter,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, KilnAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let policy = self.retry_policy();
        let started = std::time::Instant::now();
        let mut attempt = 0_usize;

        loop {
            let request_id = new_request_id();
            tracing::debug!(
                request_id = request_id.as_str(),
                attempt,
                model = request.model.as_str(),
                "sending chat completion request"
            );
            let response = self
                .client
                .post(&url)
                .header("x-kiln-request-id", request_id)
                .header("x-kiln-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await.unwrap_or_default();
                    if should_retry_status(status.as_u16()) {
                        if let Some(delay_ms) = policy.delay_for(attempt, elapsed_ms, retry_after_ms)
                        {
                            tracing::warn!(
                                status = status.as_u16(),
                                attempt,
                                delay_ms,
                                "retrying chat completion after provider status"
                            );
                            sleep(std::time::Duration::from_millis(delay_ms)).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(KilnAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if is_retryable_http_error(&error) {
                        if let Some(delay_ms) = policy.delay_for(attempt, elapsed_ms, None) {
                            tracing::warn!(
                                attempt,
                                delay_ms,
                                error = %error,
                                "retrying chat completion after transport error"
                            );
                            sleep(std::time::Duration::from_millis(delay_ms)).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(KilnAiError::Http(error));
                }
            }
        }
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, KilnAiError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| KilnAiError::InvalidResponse("response contained no choices".to_string()))?;

    let text = flatten_content(choice.message.content.as_ref());
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
            content: text,
        },
        finish_reason: choice.finish_reason,
        usage,
    })
}

/// Accepts both plain-string content and the array-of-parts form.
fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_chat_request_body, parse_chat_response};
    use crate::{ChatRequest, Message};

    #[test]
    fn unit_request_body_skips_blank_messages_and_sets_sampling() {
        let body = build_chat_request_body(&ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                Message::system("be terse"),
                Message::assistant("  "),
                Message::user("hello"),
            ],
            max_tokens: Some(256),
            temperature: Some(0.2),
        });
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn unit_parse_chat_response_flattens_part_arrays() {
        let raw = json!({
            "choices": [{
                "message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]},
                "finish_reason": "stop"
            }]
        })
        .to_string();
        let parsed = parse_chat_response(&raw).expect("parse");
        assert_eq!(parsed.message.content, "a\nb");
        assert_eq!(parsed.usage.total_tokens, 0);
    }

    #[test]
    fn regression_parse_chat_response_rejects_empty_choices() {
        let error = parse_chat_response(r#"{"choices":[]}"#).expect_err("no choices");
        assert!(error.to_string().contains("no choices"));
    }
}
