//! Prompt text and history conversion.

use kiln_ai::Message;
use kiln_memory::{ConversationRole, StoredMessage};

pub const CHAT_SYSTEM_PROMPT: &str = "You are Kiln, a coding assistant for small web projects. \
Answer concisely. Put code in fenced blocks and name the file each block belongs to.";

pub const FIX_SYSTEM_PROMPT: &str = "You fix bugs in small web projects. Reply with a short \
explanation of the cause, then list every changed file in exactly this format:

FILES TO MODIFY:
FILE: <path relative to the project root>
CONTENT:
<complete new contents of the file>

Repeat FILE and CONTENT for each file. Always send complete file contents, never diffs.";

/// Converts stored history into provider messages, oldest first.
pub fn history_messages(history: &[StoredMessage]) -> Vec<Message> {
    history
        .iter()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| match message.role {
            ConversationRole::User => Message::user(message.content.clone()),
            ConversationRole::Assistant => Message::assistant(message.content.clone()),
        })
        .collect()
}

/// User turn for an apply-fix request.
pub fn build_fix_prompt(
    problem: &str,
    error_text: Option<&str>,
    target_path: Option<&str>,
    current_files: &[(String, String)],
) -> String {
    let mut prompt = format!("Problem:\n{}\n", problem.trim());
    if let Some(error_text) = error_text.filter(|text| !text.trim().is_empty()) {
        prompt.push_str(&format!("\nError output:\n```\n{}\n```\n", error_text.trim()));
    }
    if let Some(target_path) = target_path {
        prompt.push_str(&format!("\nThe fix most likely belongs in `{target_path}`.\n"));
    }
    for (path, content) in current_files {
        prompt.push_str(&format!(
            "\nCurrent contents of `{path}`:\n```\n{}\n```\n",
            content.trim_end()
        ));
    }
    prompt
}
