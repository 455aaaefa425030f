use std::sync::Arc;

use kiln_ai::{LlmClient, Message};
use kiln_extract::{ExtractedFile, ExtractionRequest, ResponseCodeExtractor};
use kiln_memory::{ConversationRole, ConversationStore};
use serde::Serialize;
use serde_json::json;

use crate::file_sink::{apply_files, ApplyReport, FileSink};
use crate::prompts::{build_fix_prompt, history_messages, FIX_SYSTEM_PROMPT};
use crate::provider::{complete_text, CompletionSettings};
use crate::{
    require_non_empty, OrchestratorError, ReplySource, DEFAULT_HISTORY_WINDOW,
    OFFLINE_FALLBACK_REPLY,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Public struct `FixRequest` used across Kiln components.
pub struct FixRequest {
    pub key: String,
    pub problem: String,
    pub error_text: Option<String>,
    /// Caller's best guess of the file to change.
    pub target_path: Option<String>,
    /// Files whose current content is read from the sink and shown to the model.
    pub context_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Public struct `FixOutcome` used across Kiln components.
pub struct FixOutcome {
    /// True when at least one extracted file was written.
    pub applied: bool,
    /// Raw model response, kept intact even when nothing was applied.
    pub solution: String,
    pub extracted: Vec<ExtractedFile>,
    pub report: ApplyReport,
    pub source: ReplySource,
}

#[derive(Clone)]
/// Prompt, extract, and apply flow for fix requests.
pub struct FixService {
    store: Arc<ConversationStore>,
    client: Option<Arc<dyn LlmClient>>,
    extractor: ResponseCodeExtractor,
    settings: CompletionSettings,
    history_window: usize,
}

impl FixService {
    pub fn new(store: Arc<ConversationStore>, client: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            store,
            client,
            extractor: ResponseCodeExtractor::default(),
            settings: CompletionSettings::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_extractor(mut self, extractor: ResponseCodeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_settings(mut self, settings: CompletionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    pub async fn apply_fix(
        &self,
        request: &FixRequest,
        sink: &dyn FileSink,
    ) -> Result<FixOutcome, OrchestratorError> {
        require_non_empty("conversation key", &request.key)?;
        require_non_empty("problem", &request.problem)?;

        let Some(client) = self.client.as_ref() else {
            tracing::warn!(
                key = request.key.as_str(),
                "no completion provider configured; fix not attempted"
            );
            return Ok(FixOutcome {
                applied: false,
                solution: OFFLINE_FALLBACK_REPLY.to_string(),
                extracted: Vec::new(),
                report: ApplyReport::default(),
                source: ReplySource::Fallback,
            });
        };

        let mut current_files = Vec::new();
        for path in &request.context_files {
            match sink.read_file(path).await {
                Some(content) => current_files.push((path.clone(), content)),
                None => tracing::debug!(path = path.as_str(), "context file not readable"),
            }
        }
        let prompt = build_fix_prompt(
            &request.problem,
            request.error_text.as_deref(),
            request.target_path.as_deref(),
            &current_files,
        );
        let history = self
            .store
            .recent_context(&request.key, self.history_window)
            .await;
        let mut messages = history_messages(&history);
        messages.push(Message::user(prompt));
        let solution = complete_text(
            client.as_ref(),
            FIX_SYSTEM_PROMPT,
            &messages,
            &self.settings,
        )
        .await
        .map_err(OrchestratorError::provider)?;

        let extracted = self.extractor.extract(&ExtractionRequest {
            response: &solution,
            target_path: request.target_path.as_deref(),
            error_text: request.error_text.as_deref(),
            instruction: Some(request.problem.as_str()),
        });
        let report = apply_files(sink, &extracted).await;
        let applied = !report.written.is_empty();
        tracing::debug!(
            key = request.key.as_str(),
            sink = sink.describe().as_str(),
            extracted = extracted.len(),
            written = report.written.len(),
            failed = report.failed.len(),
            "fix request finished"
        );

        self.store
            .append(
                &request.key,
                ConversationRole::User,
                request.problem.as_str(),
                Some(json!({
                    "kind": "fix",
                    "errorText": request.error_text,
                    "targetPath": request.target_path,
                })),
            )
            .await;
        self.store
            .append(
                &request.key,
                ConversationRole::Assistant,
                solution.as_str(),
                Some(json!({
                    "kind": "fix",
                    "applied": applied,
                    "written": report.written,
                    "failed": report.failed,
                })),
            )
            .await;

        Ok(FixOutcome {
            applied,
            solution,
            extracted,
            report,
            source: ReplySource::Provider,
        })
    }
}
