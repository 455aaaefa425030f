use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use kiln_github::DEFAULT_GITHUB_API_BASE;
use kiln_orchestrator::{
    DEFAULT_COMPLETION_TIMEOUT_MS, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
};

use crate::cli_types::{
    parse_positive_u64, parse_positive_usize, parse_temperature, CliMemoryLayout,
};

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    about = "Chat and apply generated fixes with repository-scoped memory",
    version
)]
/// Public struct `Cli` used across Kiln components.
pub struct Cli {
    #[arg(
        long,
        env = "KILN_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for the OpenAI-compatible completion API"
    )]
    pub api_base: String,

    #[arg(
        long,
        env = "KILN_API_KEY",
        hide_env_values = true,
        help = "Completion API key. Without it chat and fix return an offline fallback"
    )]
    pub api_key: Option<String>,

    #[arg(long, env = "KILN_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(
        long = "max-tokens",
        env = "KILN_MAX_TOKENS",
        default_value_t = DEFAULT_MAX_TOKENS
    )]
    pub max_tokens: u32,

    #[arg(
        long,
        env = "KILN_TEMPERATURE",
        default_value_t = 0.2,
        value_parser = parse_temperature
    )]
    pub temperature: f32,

    #[arg(
        long = "request-timeout-ms",
        env = "KILN_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_COMPLETION_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Timeout for one HTTP attempt against the completion API"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "completion-timeout-ms",
        env = "KILN_COMPLETION_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Ceiling for one completion call including retries. Defaults to every attempt timing out plus backoff"
    )]
    pub completion_timeout_ms: Option<u64>,

    #[arg(
        long = "max-retries",
        env = "KILN_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for retryable provider failures"
    )]
    pub max_retries: usize,

    #[arg(
        long = "history-window",
        env = "KILN_HISTORY_WINDOW",
        default_value_t = DEFAULT_HISTORY_WINDOW,
        value_parser = parse_positive_usize,
        help = "Stored messages sent back to the model as context"
    )]
    pub history_window: usize,

    #[arg(
        long = "memory-dir",
        env = "KILN_MEMORY_DIR",
        default_value = ".kiln/memory",
        help = "Directory holding conversation store documents"
    )]
    pub memory_dir: PathBuf,

    #[arg(
        long = "memory-layout",
        env = "KILN_MEMORY_LAYOUT",
        value_enum,
        default_value_t = CliMemoryLayout::PerRepository
    )]
    pub memory_layout: CliMemoryLayout,

    #[arg(
        long = "memory-max-messages",
        env = "KILN_MEMORY_MAX_MESSAGES",
        default_value_t = kiln_memory::DEFAULT_MAX_MESSAGES,
        value_parser = parse_positive_usize
    )]
    pub memory_max_messages: usize,

    #[arg(
        long = "memory-lock-stale-ms",
        env = "KILN_MEMORY_LOCK_STALE_MS",
        default_value_t = kiln_memory::DEFAULT_LOCK_STALE_MS,
        value_parser = parse_positive_u64,
        help = "Age after which a held store lock is force-released"
    )]
    pub memory_lock_stale_ms: u64,

    #[arg(
        long = "github-token",
        env = "KILN_GITHUB_TOKEN",
        hide_env_values = true
    )]
    pub github_token: Option<String>,

    #[arg(
        long = "github-api-base",
        env = "KILN_GITHUB_API_BASE",
        default_value = DEFAULT_GITHUB_API_BASE
    )]
    pub github_api_base: String,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Send one chat message for a conversation key.
    Chat {
        #[arg(long)]
        key: String,
        #[arg(long)]
        message: String,
    },
    /// Ask for a fix and apply the extracted files.
    Fix(FixArgs),
    /// Inspect or reset stored conversations.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("destination")
        .required(true)
        .args(["output_dir", "github_repo"])
))]
pub struct FixArgs {
    #[arg(long)]
    pub key: String,

    #[arg(long)]
    pub problem: String,

    #[arg(long = "error", help = "Error output that triggered the request")]
    pub error_text: Option<String>,

    #[arg(long = "target-path")]
    pub target_path: Option<String>,

    #[arg(
        long = "file",
        help = "File whose current content is shown to the model; repeatable"
    )]
    pub files: Vec<String>,

    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    #[arg(long = "github-repo", help = "Target repository as owner/repo")]
    pub github_repo: Option<String>,

    #[arg(long, requires = "github_repo")]
    pub branch: Option<String>,

    #[arg(long = "commit-message", default_value = "kiln: apply generated fix")]
    pub commit_message: String,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// Print stored messages for a key.
    Show {
        #[arg(long)]
        key: String,
        #[arg(long, value_parser = parse_positive_usize)]
        limit: Option<usize>,
    },
    /// Remove one key, or every stored conversation.
    #[command(group(ArgGroup::new("scope").required(true).args(["key", "all"])))]
    Clear {
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        all: bool,
    },
}
