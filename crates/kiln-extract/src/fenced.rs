//! Fenced code blocks routed to paths by content heuristics.

use std::sync::OnceLock;

use kiln_core::sanitize_relative_path;
use regex::Regex;

use crate::content::{fence_closes, fence_open, normalize_content, Fence};
use crate::{ExtractedFile, ExtractionOrigin};

const FALLBACK_FILE_PREFIX: &str = "fix";
const FALLBACK_FILE_EXTENSION: &str = "js";

const KNOWN_LANGUAGE_TAGS: &[&str] = &[
    "bash",
    "css",
    "html",
    "javascript",
    "js",
    "json",
    "jsonc",
    "jsx",
    "sh",
    "ts",
    "tsx",
    "typescript",
];

#[derive(Debug, Clone, PartialEq, Eq)]
/// One fenced region of a response.
pub struct FencedBlock {
    /// Lowercased first word of the info string, when present.
    pub language: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
/// Content predicate mapped to the file it should be written to.
pub struct HeuristicRule {
    pub name: &'static str,
    pub target: &'static str,
    pub matches: fn(&str) -> bool,
}

/// Rules evaluated top to bottom; the first match wins.
pub const HEURISTIC_RULES: [HeuristicRule; 4] = [
    HeuristicRule {
        name: "html_document",
        target: "public/index.html",
        matches: looks_like_html_document,
    },
    HeuristicRule {
        name: "server_bootstrap",
        target: "server.js",
        matches: looks_like_server_bootstrap,
    },
    HeuristicRule {
        name: "stylesheet",
        target: "public/style.css",
        matches: looks_like_stylesheet,
    },
    HeuristicRule {
        name: "package_manifest",
        target: "package.json",
        matches: looks_like_package_manifest,
    },
];

/// Path chosen by the first matching heuristic rule.
pub fn infer_target_from_content(content: &str) -> Option<&'static str> {
    HEURISTIC_RULES
        .iter()
        .find(|rule| (rule.matches)(content))
        .map(|rule| rule.target)
}

/// Every fenced block in `text`; an unterminated final block runs to end of text.
pub fn scan_fenced_blocks(text: &str) -> Vec<FencedBlock> {
    struct OpenBlock<'a> {
        fence: Fence,
        language: Option<String>,
        lines: Vec<&'a str>,
    }

    let mut blocks = Vec::new();
    let mut open: Option<OpenBlock<'_>> = None;
    for line in text.lines() {
        if let Some(block) = open.as_mut() {
            if !fence_closes(line, &block.fence) {
                block.lines.push(line);
                continue;
            }
        } else {
            if let Some((fence, info)) = fence_open(line) {
                open = Some(OpenBlock {
                    fence,
                    language: language_from_info(info),
                    lines: Vec::new(),
                });
            }
            continue;
        }
        if let Some(block) = open.take() {
            blocks.push(finish_block(block.language, block.lines));
        }
    }
    if let Some(block) = open.take() {
        blocks.push(finish_block(block.language, block.lines));
    }
    blocks
}

fn language_from_info(info: &str) -> Option<String> {
    let word = info
        .split_whitespace()
        .next()?
        .trim_start_matches(['{', '.'])
        .trim_end_matches('}')
        .to_ascii_lowercase();
    (!word.is_empty()).then_some(word)
}

fn finish_block(language: Option<String>, lines: Vec<&str>) -> FencedBlock {
    let mut lines = lines;
    let mut language = language;
    if language.is_none() {
        if let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) {
            let tag = lines[first].trim().to_ascii_lowercase();
            if KNOWN_LANGUAGE_TAGS.contains(&tag.as_str()) {
                lines.drain(..=first);
                language = Some(tag);
            }
        }
    }
    FencedBlock {
        language,
        body: lines.join("\n"),
    }
}

pub(crate) fn extract_heuristic_files(
    response: &str,
    target_path: Option<&str>,
) -> Vec<ExtractedFile> {
    let caller_target = target_path.and_then(sanitize_relative_path);
    let mut fallback_index = 0usize;
    let mut files = Vec::new();
    for block in scan_fenced_blocks(response) {
        let content = normalize_content(&block.body);
        if content.is_empty() {
            continue;
        }
        let path = match (infer_target_from_content(&content), caller_target.as_ref()) {
            (Some(target), _) => target.to_string(),
            (None, Some(target)) => target.clone(),
            (None, None) => {
                let path =
                    format!("{FALLBACK_FILE_PREFIX}{fallback_index}.{FALLBACK_FILE_EXTENSION}");
                fallback_index += 1;
                path
            }
        };
        tracing::debug!(
            path = path.as_str(),
            language = block.language.as_deref().unwrap_or("-"),
            "routed fenced block"
        );
        files.push(ExtractedFile {
            path,
            content,
            origin: ExtractionOrigin::Heuristic,
        });
    }
    files
}

fn looks_like_html_document(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    lower.contains("<!doctype html") || lower.contains("<html")
}

fn looks_like_server_bootstrap(content: &str) -> bool {
    ["app.listen(", "server.listen(", "createServer(", "express()"]
        .iter()
        .any(|needle| content.contains(needle))
}

fn looks_like_stylesheet(content: &str) -> bool {
    stylesheet_rule_pattern().is_some_and(|pattern| pattern.is_match(content))
}

fn looks_like_package_manifest(content: &str) -> bool {
    content.contains("\"scripts\"") || content.contains("\"dependencies\"")
}

// A selector line followed by a `property: value;` declaration.
fn stylesheet_rule_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"(?m)^[ \t]*[A-Za-z0-9_.#*:>+~,\[\]="' -]+\{\s*[A-Za-z-]+\s*:[^;{}\n]+;"#)
                .ok()
        })
        .as_ref()
}
