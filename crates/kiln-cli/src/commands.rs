use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_github::RepoRef;
use kiln_orchestrator::{
    ChatService, FileSink, FixRequest, FixService, GithubFileSink, LocalFileSink,
};
use serde::Serialize;
use serde_json::json;

use crate::cli_args::{Cli, CliCommand, FixArgs, HistoryCommand};
use crate::runtime_setup::{
    build_conversation_store, build_github_client, build_llm_client, completion_settings,
};

pub(crate) async fn run_cli(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let store = Arc::new(build_conversation_store(&cli));
    match &cli.command {
        CliCommand::Chat { key, message } => {
            let service = ChatService::new(store, build_llm_client(&cli)?)
                .with_settings(completion_settings(&cli))
                .with_history_window(cli.history_window);
            let reply = service.chat(key, message).await?;
            write_json(out, &reply)
        }
        CliCommand::Fix(args) => {
            let service = FixService::new(store, build_llm_client(&cli)?)
                .with_settings(completion_settings(&cli))
                .with_history_window(cli.history_window);
            let sink = build_sink(&cli, args)?;
            let outcome = service
                .apply_fix(&fix_request(args), sink.as_ref())
                .await?;
            write_json(out, &outcome)
        }
        CliCommand::History { command } => match command {
            HistoryCommand::Show { key, limit } => {
                let mut record = store.load(key).await;
                if let Some(limit) = limit {
                    record.messages = record.tail(*limit).to_vec();
                }
                write_json(
                    out,
                    &json!({
                        "key": key,
                        "totalConversations": record.total_conversations,
                        "lastUpdated": record.last_updated,
                        "messages": record.messages,
                    }),
                )
            }
            HistoryCommand::Clear { key: Some(key), .. } => {
                let existed = store.clear(key).await;
                write_json(out, &json!({ "cleared": key, "existed": existed }))
            }
            HistoryCommand::Clear { key: None, .. } => {
                store.clear_all().await;
                write_json(out, &json!({ "cleared": "all" }))
            }
        },
    }
}

fn fix_request(args: &FixArgs) -> FixRequest {
    FixRequest {
        key: args.key.clone(),
        problem: args.problem.clone(),
        error_text: args.error_text.clone(),
        target_path: args.target_path.clone(),
        context_files: args.files.clone(),
    }
}

fn build_sink(cli: &Cli, args: &FixArgs) -> Result<Box<dyn FileSink>> {
    if let Some(raw_repo) = args.github_repo.as_deref() {
        let repo = RepoRef::parse(raw_repo)?;
        return Ok(Box::new(GithubFileSink::new(
            build_github_client(cli)?,
            repo,
            args.branch.clone(),
            args.commit_message.clone(),
        )));
    }
    let output_dir = args
        .output_dir
        .clone()
        .context("either --output-dir or --github-repo is required")?;
    Ok(Box::new(LocalFileSink::new(output_dir)))
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render json output")?;
    writeln!(out, "{rendered}").context("failed to write output")?;
    Ok(())
}
