use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use httpmock::prelude::*;
use kiln_ai::{
    ChatRequest, ChatResponse, ChatUsage, KilnAiError, LlmClient, Message, OpenAiCompatibleClient,
    OpenAiCompatibleConfig,
};
use kiln_extract::{ExtractionOrigin, ExtractionRequest, ResponseCodeExtractor};
use kiln_memory::{ConversationStore, ConversationStoreConfig};
use kiln_orchestrator::{
    apply_files, ChatService, FixRequest, FixService, LocalFileSink, ReplySource,
};
use serde_json::json;
use tempfile::tempdir;

const HEURISTIC_SOLUTION: &str = "\
The page never loads its stylesheet. Use these files:

```html
<!DOCTYPE html>
<html>
<head><link rel=\"stylesheet\" href=\"style.css\"></head>
<body><h1>Hello</h1></body>
</html>
```

```css
h1 {
  color: rebeccapurple;
}
```
";

struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for CountingClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, KilnAiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let last = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse {
            message: Message::assistant(format!("reply {call} to {last}")),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        })
    }
}

fn provider_client(server: &MockServer) -> Arc<dyn LlmClient> {
    Arc::new(
        OpenAiCompatibleClient::new(OpenAiCompatibleConfig {
            api_base: format!("{}/v1", server.base_url()),
            api_key: "integration-key".to_string(),
            request_timeout_ms: 5_000,
            max_retries: 0,
            retry_budget_ms: 0,
            retry_jitter: false,
        })
        .expect("provider client"),
    )
}

#[tokio::test]
async fn integration_fix_flow_over_http_writes_heuristic_files_and_persists_turn() {
    let server = MockServer::start();
    let provider = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer integration-key");
        then.status(200).json_body(json!({
            "choices": [{
                "message": {"content": HEURISTIC_SOLUTION},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 60, "total_tokens": 100}
        }));
    });
    let temp = tempdir().expect("tempdir");
    let memory_dir = temp.path().join("memory");
    let project = temp.path().join("project");
    let store = Arc::new(ConversationStore::new(
        ConversationStoreConfig::per_repository(&memory_dir),
    ));
    let service = FixService::new(store, Some(provider_client(&server)));

    let outcome = service
        .apply_fix(
            &FixRequest {
                key: "acme/web".to_string(),
                problem: "styles are missing".to_string(),
                ..FixRequest::default()
            },
            &LocalFileSink::new(&project),
        )
        .await
        .expect("fix succeeds");

    provider.assert();
    assert!(outcome.applied);
    assert_eq!(outcome.source, ReplySource::Provider);
    assert_eq!(
        outcome.report.written,
        vec!["public/index.html", "public/style.css"]
    );
    assert!(outcome
        .extracted
        .iter()
        .all(|file| file.origin == ExtractionOrigin::Heuristic));
    assert_eq!(
        std::fs::read_to_string(project.join("public/style.css")).expect("css"),
        "h1 {\n  color: rebeccapurple;\n}\n"
    );

    let reopened = ConversationStore::new(ConversationStoreConfig::per_repository(&memory_dir));
    let record = reopened.load("acme/web").await;
    assert_eq!(record.messages.len(), 2);
    assert_eq!(record.total_conversations, 1);
    assert!(memory_dir.join("conversation_acme/web.json").is_file());
}

#[tokio::test]
async fn integration_provider_outage_leaves_history_untouched() {
    let server = MockServer::start();
    let provider = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(503).body("overloaded");
    });
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(ConversationStore::new(ConversationStoreConfig::shared(
        temp.path().join("conversations.json"),
    )));
    let service = ChatService::new(store.clone(), Some(provider_client(&server)));

    let error = service
        .chat("session-1", "hello")
        .await
        .expect_err("outage surfaces");

    provider.assert_calls(1);
    assert!(error.is_retryable());
    assert!(store.load("session-1").await.is_empty());
    assert!(!temp.path().join("conversations.json").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_concurrent_chats_on_one_key_keep_every_turn() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(ConversationStore::new(
        ConversationStoreConfig::per_repository(temp.path()),
    ));
    let client: Arc<dyn LlmClient> = Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    });
    let service = ChatService::new(store.clone(), Some(client));

    let mut handles = Vec::new();
    for index in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .chat("acme/web", &format!("message {index}"))
                .await
                .expect("chat succeeds")
        }));
    }
    for handle in handles {
        handle.await.expect("task joins");
    }

    let record = store.load("acme/web").await;
    assert_eq!(record.messages.len(), 16);
    assert_eq!(record.total_conversations, 8);
    for index in 0..8 {
        let needle = format!("message {index}");
        assert_eq!(
            record
                .messages
                .iter()
                .filter(|message| message.content == needle)
                .count(),
            1
        );
    }
}

#[tokio::test]
async fn integration_reapplying_the_same_response_is_idempotent() {
    let temp = tempdir().expect("tempdir");
    let sink = LocalFileSink::new(temp.path());
    let extractor = ResponseCodeExtractor::default();
    let request = ExtractionRequest::new(HEURISTIC_SOLUTION);

    let first = apply_files(&sink, &extractor.extract(&request)).await;
    let html_after_first =
        std::fs::read_to_string(temp.path().join("public/index.html")).expect("html");
    let second = apply_files(&sink, &extractor.extract(&request)).await;
    let html_after_second =
        std::fs::read_to_string(temp.path().join("public/index.html")).expect("html");

    assert_eq!(first, second);
    assert_eq!(html_after_first, html_after_second);
}

#[tokio::test]
async fn regression_malformed_store_self_heals_through_chat() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("conversations.json");
    std::fs::write(&path, "{ \"session-1\": { \"messages\": [ truncated").expect("seed");
    let store = Arc::new(ConversationStore::new(ConversationStoreConfig::shared(&path)));
    let client: Arc<dyn LlmClient> = Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    });
    let service = ChatService::new(store, Some(client));

    let reply = service.chat("session-1", "hi").await.expect("chat succeeds");
    assert_eq!(reply.history_len, 2);

    let raw = std::fs::read_to_string(&path).expect("store rewritten");
    let document: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(
        document["session-1"]["messages"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );
}
