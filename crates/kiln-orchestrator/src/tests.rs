use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use kiln_ai::{ChatRequest, ChatResponse, ChatUsage, KilnAiError, LlmClient, Message, MessageRole};
use kiln_github::{GithubContentsClient, GithubContentsConfig, RepoRef};
use kiln_memory::{ConversationRole, ConversationStore, ConversationStoreConfig};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    complete_text, ChatService, CompletionSettings, FileSink, FixRequest, FixService,
    GithubFileSink, LocalFileSink, OrchestratorError, ReplySource, OFFLINE_FALLBACK_REPLY,
};

enum ScriptedReply {
    Text(&'static str),
    Error(KilnAiError),
    Stall,
}

struct ScriptedClient {
    replies: AsyncMutex<VecDeque<ScriptedReply>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(replies: Vec<ScriptedReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: AsyncMutex::new(VecDeque::from(replies)),
            requests: AsyncMutex::new(Vec::new()),
        })
    }

    async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, KilnAiError> {
        self.requests.lock().await.push(request);
        let reply = self.replies.lock().await.pop_front();
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(ChatResponse {
                message: Message::assistant(text),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage::default(),
            }),
            Some(ScriptedReply::Error(error)) => Err(error),
            Some(ScriptedReply::Stall) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(KilnAiError::InvalidResponse("stalled reply resolved".into()))
            }
            None => Err(KilnAiError::InvalidResponse(
                "scripted response queue exhausted".into(),
            )),
        }
    }
}

fn test_store(temp: &TempDir) -> Arc<ConversationStore> {
    Arc::new(ConversationStore::new(ConversationStoreConfig::per_repository(
        temp.path().join("memory"),
    )))
}

#[tokio::test]
async fn functional_chat_sends_history_and_records_both_turns() {
    let temp = tempdir().expect("tempdir");
    let store = test_store(&temp);
    store
        .append("acme/web", ConversationRole::User, "earlier question", None)
        .await;
    store
        .append("acme/web", ConversationRole::Assistant, "earlier answer", None)
        .await;
    let client = ScriptedClient::new(vec![ScriptedReply::Text("  use express.static  ")]);
    let service = ChatService::new(store.clone(), Some(client.clone()));

    let reply = service
        .chat("acme/web", "how do I serve static files?")
        .await
        .expect("chat succeeds");

    assert_eq!(reply.text, "use express.static");
    assert_eq!(reply.source, ReplySource::Provider);
    assert_eq!(reply.history_len, 4);

    let requests = client.requests().await;
    assert_eq!(requests.len(), 1);
    let roles = requests[0]
        .messages
        .iter()
        .map(|message| message.role)
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User
        ]
    );
    assert_eq!(requests[0].max_tokens, Some(4_096));

    let record = store.load("acme/web").await;
    assert_eq!(record.total_conversations, 2);
    assert_eq!(record.messages[3].content, "use express.static");
}

#[tokio::test]
async fn functional_chat_history_window_limits_context() {
    let temp = tempdir().expect("tempdir");
    let store = test_store(&temp);
    for index in 0..6 {
        store
            .append("k", ConversationRole::User, format!("q{index}"), None)
            .await;
    }
    let client = ScriptedClient::new(vec![ScriptedReply::Text("ok")]);
    let service = ChatService::new(store, Some(client.clone())).with_history_window(2);

    service.chat("k", "latest").await.expect("chat succeeds");

    let contents = client.requests().await[0]
        .messages
        .iter()
        .skip(1)
        .map(|message| message.content.clone())
        .collect::<Vec<_>>();
    assert_eq!(contents, vec!["q4", "q5", "latest"]);
}

#[tokio::test]
async fn functional_chat_without_provider_returns_labeled_fallback_and_records_nothing() {
    let temp = tempdir().expect("tempdir");
    let store = test_store(&temp);
    let service = ChatService::new(store.clone(), None);

    let reply = service.chat("acme/web", "hello").await.expect("fallback");

    assert_eq!(reply.source, ReplySource::Fallback);
    assert_eq!(reply.text, OFFLINE_FALLBACK_REPLY);
    assert!(store.load("acme/web").await.is_empty());
}

#[tokio::test]
async fn regression_chat_provider_failure_surfaces_retryable_and_records_nothing() {
    let temp = tempdir().expect("tempdir");
    let store = test_store(&temp);
    let client = ScriptedClient::new(vec![ScriptedReply::Error(KilnAiError::HttpStatus {
        status: 503,
        body: "overloaded".to_string(),
    })]);
    let service = ChatService::new(store.clone(), Some(client));

    let error = service
        .chat("acme/web", "hello")
        .await
        .expect_err("provider failure surfaces");

    assert!(error.is_retryable());
    assert!(store.load("acme/web").await.is_empty());
}

#[tokio::test]
async fn unit_chat_rejects_blank_message() {
    let temp = tempdir().expect("tempdir");
    let service = ChatService::new(test_store(&temp), None);
    let error = service.chat("k", "   ").await.expect_err("blank rejected");
    assert!(matches!(error, OrchestratorError::InvalidRequest(_)));
}

#[tokio::test]
async fn unit_complete_text_times_out_as_retryable_error() {
    let client = ScriptedClient::new(vec![ScriptedReply::Stall]);
    let settings = CompletionSettings {
        timeout: Duration::from_millis(20),
        ..CompletionSettings::default()
    };

    let error = complete_text(&*client, "system", &[Message::user("hi")], &settings)
        .await
        .expect_err("stalled provider times out");

    assert!(matches!(error, KilnAiError::Timeout { timeout_ms: 20 }));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn unit_complete_text_rejects_blank_completion() {
    let client = ScriptedClient::new(vec![ScriptedReply::Text("   ")]);
    let error = complete_text(
        &*client,
        "",
        &[Message::user("hi")],
        &CompletionSettings::default(),
    )
    .await
    .expect_err("blank completion rejected");
    assert!(matches!(error, KilnAiError::InvalidResponse(_)));
    assert_eq!(client.requests().await[0].messages.len(), 1);
}

#[tokio::test]
async fn functional_apply_fix_writes_directive_files_and_records_turn() {
    let temp = tempdir().expect("tempdir");
    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).expect("project dir");
    std::fs::write(project.join("server.js"), "const app = {};\n").expect("seed");
    let store = test_store(&temp);
    let client = ScriptedClient::new(vec![ScriptedReply::Text(
        "The app object was never created.\n\nFILES TO MODIFY:\nFILE: server.js\nCONTENT:\n```js\nconst express = require('express');\nconst app = express();\napp.listen(3000);\n```\n",
    )]);
    let service = FixService::new(store.clone(), Some(client.clone()));
    let sink = LocalFileSink::new(&project);

    let outcome = service
        .apply_fix(
            &FixRequest {
                key: "acme/web".to_string(),
                problem: "server crashes on start".to_string(),
                error_text: Some("TypeError: app.listen is not a function".to_string()),
                target_path: Some("server.js".to_string()),
                context_files: vec!["server.js".to_string(), "missing.js".to_string()],
            },
            &sink,
        )
        .await
        .expect("fix succeeds");

    assert!(outcome.applied);
    assert_eq!(outcome.report.written, vec!["server.js"]);
    assert!(outcome.report.failed.is_empty());
    assert_eq!(
        std::fs::read_to_string(project.join("server.js")).expect("read"),
        "const express = require('express');\nconst app = express();\napp.listen(3000);\n"
    );

    let prompt = &client.requests().await[0].messages[1].content;
    assert!(prompt.contains("Current contents of `server.js`"));
    assert!(!prompt.contains("missing.js"));

    let record = store.load("acme/web").await;
    assert_eq!(record.messages.len(), 2);
    let metadata = record.messages[1].metadata.as_ref().expect("metadata");
    assert_eq!(metadata["written"], json!(["server.js"]));
}

#[tokio::test]
async fn functional_apply_fix_with_no_extractable_files_keeps_solution() {
    let temp = tempdir().expect("tempdir");
    let store = test_store(&temp);
    let solution = "Restart the dev server; the port was still bound by a zombie process.";
    let client = ScriptedClient::new(vec![ScriptedReply::Text(solution)]);
    let service = FixService::new(store, Some(client));
    let sink = LocalFileSink::new(temp.path().join("project"));

    let outcome = service
        .apply_fix(
            &FixRequest {
                key: "acme/web".to_string(),
                problem: "EADDRINUSE".to_string(),
                ..FixRequest::default()
            },
            &sink,
        )
        .await
        .expect("fix returns outcome");

    assert!(!outcome.applied);
    assert_eq!(outcome.solution, solution);
    assert!(outcome.extracted.is_empty());
    assert!(!temp.path().join("project").exists());
}

#[tokio::test]
async fn functional_apply_fix_without_provider_is_not_applied() {
    let temp = tempdir().expect("tempdir");
    let store = test_store(&temp);
    let service = FixService::new(store.clone(), None);
    let sink = LocalFileSink::new(temp.path());

    let outcome = service
        .apply_fix(
            &FixRequest {
                key: "k".to_string(),
                problem: "broken".to_string(),
                ..FixRequest::default()
            },
            &sink,
        )
        .await
        .expect("fallback outcome");

    assert!(!outcome.applied);
    assert_eq!(outcome.source, ReplySource::Fallback);
    assert!(store.load("k").await.is_empty());
}

#[tokio::test]
async fn integration_github_sink_updates_existing_file_with_its_sha() {
    let server = MockServer::start();
    let get_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/web/contents/server.js")
            .query_param("ref", "fixes");
        then.status(200).json_body(json!({
            "type": "file",
            "path": "server.js",
            "sha": "blob-1",
            "encoding": "base64",
            "content": "b2xkCg=="
        }));
    });
    let put_mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/repos/acme/web/contents/server.js")
            .json_body_includes(json!({"sha": "blob-1", "branch": "fixes"}).to_string());
        then.status(200).json_body(json!({
            "content": {"sha": "blob-2"},
            "commit": {"sha": "c1", "html_url": null}
        }));
    });
    let client = GithubContentsClient::new(GithubContentsConfig {
        api_base: server.base_url(),
        token: "t".to_string(),
        retry_max_attempts: 1,
        ..GithubContentsConfig::default()
    })
    .expect("client");
    let sink = GithubFileSink::new(
        client,
        RepoRef::parse("acme/web").expect("repo"),
        Some("fixes".to_string()),
        "kiln: apply fix",
    );

    sink.write_file("server.js", "new\n").await.expect("write");

    get_mock.assert();
    put_mock.assert();
    assert_eq!(sink.read_file("server.js").await.as_deref(), Some("old\n"));
}

#[tokio::test]
async fn integration_github_sink_creates_missing_file_without_sha() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/contents/public/index.html");
        then.status(404).json_body(json!({"message": "Not Found"}));
    });
    let put_mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/repos/acme/web/contents/public/index.html")
            .json_body(json!({
                "message": "kiln: apply fix",
                "content": "PGh0bWw+PC9odG1sPgo="
            }));
        then.status(201).json_body(json!({
            "content": {"sha": "blob-1"},
            "commit": {"sha": "c1"}
        }));
    });
    let client = GithubContentsClient::new(GithubContentsConfig {
        api_base: server.base_url(),
        token: "t".to_string(),
        retry_max_attempts: 1,
        ..GithubContentsConfig::default()
    })
    .expect("client");
    let sink = GithubFileSink::new(
        client,
        RepoRef::parse("acme/web").expect("repo"),
        None,
        "kiln: apply fix",
    );

    sink.write_file("public/index.html", "<html></html>\n")
        .await
        .expect("create");

    put_mock.assert();
}
