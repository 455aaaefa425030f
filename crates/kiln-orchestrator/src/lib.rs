//! Chat and apply-fix flows wiring conversation memory, the completion
//! provider, response extraction and file sinks together.

mod chat_service;
mod file_sink;
mod fix_service;
pub mod prompts;
mod provider;
#[cfg(test)]
mod tests;

use kiln_ai::KilnAiError;
use serde::Serialize;
use thiserror::Error;

pub use chat_service::{ChatReply, ChatService};
pub use file_sink::{
    apply_files, ApplyReport, FileSink, GithubFileSink, LocalFileSink, WriteFailure,
};
pub use fix_service::{FixOutcome, FixRequest, FixService};
pub use provider::{
    complete_text, CompletionSettings, DEFAULT_COMPLETION_TIMEOUT_MS, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};

/// Default number of stored messages sent back to the provider as history.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Reply text used when no completion provider is configured.
pub const OFFLINE_FALLBACK_REPLY: &str = "[kiln offline] No completion provider is configured, so this request was not sent to a model and nothing was recorded. Configure an API key to enable generated replies.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Where reply text came from.
pub enum ReplySource {
    Provider,
    Fallback,
}

#[derive(Debug, Error)]
/// Enumerates failures surfaced by chat and fix flows.
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("completion provider failed (retryable: {retryable}): {source}")]
    Provider {
        retryable: bool,
        #[source]
        source: KilnAiError,
    },
}

impl OrchestratorError {
    pub(crate) fn provider(source: KilnAiError) -> Self {
        Self::Provider {
            retryable: source.is_retryable(),
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), OrchestratorError> {
    if value.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}
