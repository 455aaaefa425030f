use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_ai::{
    completion_deadline_ms, retry_budget_for_deadline, LlmClient, OpenAiCompatibleClient,
    OpenAiCompatibleConfig,
};
use kiln_github::{GithubContentsClient, GithubContentsConfig};
use kiln_memory::{ConversationStore, ConversationStoreConfig, DEFAULT_SHARED_STORE_FILE_NAME};
use kiln_orchestrator::CompletionSettings;

use crate::cli_args::Cli;
use crate::cli_types::CliMemoryLayout;

pub(crate) fn build_conversation_store(cli: &Cli) -> ConversationStore {
    let mut config = match cli.memory_layout {
        CliMemoryLayout::Shared => {
            ConversationStoreConfig::shared(cli.memory_dir.join(DEFAULT_SHARED_STORE_FILE_NAME))
        }
        CliMemoryLayout::PerRepository => ConversationStoreConfig::per_repository(&cli.memory_dir),
    };
    config.max_messages = cli.memory_max_messages;
    config.lock_stale_after = Duration::from_millis(cli.memory_lock_stale_ms);
    ConversationStore::new(config)
}

/// Ceiling for one completion call, retries included.
pub(crate) fn completion_ceiling_ms(cli: &Cli) -> u64 {
    cli.completion_timeout_ms
        .unwrap_or_else(|| completion_deadline_ms(cli.max_retries, cli.request_timeout_ms))
}

/// Provider client, or `None` when no API key is configured.
pub(crate) fn build_llm_client(cli: &Cli) -> Result<Option<Arc<dyn LlmClient>>> {
    let Some(api_key) = cli
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
    else {
        tracing::debug!("no completion api key configured");
        return Ok(None);
    };
    let client = OpenAiCompatibleClient::new(OpenAiCompatibleConfig {
        api_base: cli.api_base.clone(),
        api_key: api_key.to_string(),
        request_timeout_ms: cli.request_timeout_ms,
        max_retries: cli.max_retries,
        retry_budget_ms: retry_budget_for_deadline(
            completion_ceiling_ms(cli),
            cli.request_timeout_ms,
        ),
        retry_jitter: true,
    })
    .context("failed to create completion client")?;
    Ok(Some(Arc::new(client)))
}

pub(crate) fn completion_settings(cli: &Cli) -> CompletionSettings {
    CompletionSettings {
        model: cli.model.clone(),
        max_tokens: cli.max_tokens,
        temperature: cli.temperature,
        timeout: Duration::from_millis(completion_ceiling_ms(cli)),
    }
}

pub(crate) fn build_github_client(cli: &Cli) -> Result<GithubContentsClient> {
    let token = cli
        .github_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .context("--github-token (or KILN_GITHUB_TOKEN) is required with --github-repo")?;
    GithubContentsClient::new(GithubContentsConfig {
        api_base: cli.github_api_base.clone(),
        token: token.to_string(),
        ..GithubContentsConfig::default()
    })
    .context("failed to create github contents client")
}
