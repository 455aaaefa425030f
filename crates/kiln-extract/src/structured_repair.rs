//! Lenient recovery of JSON configuration files from model responses.

use kiln_core::sanitize_relative_path;
use serde_json::Value;

use crate::content::normalize_content;
use crate::fenced::scan_fenced_blocks;
use crate::{ExtractedFile, ExtractionOrigin, ExtractionRequest, ExtractorConfig};

const STRUCTURED_KEYWORDS: [&str; 5] = ["json", "manifest", "package.json", "tsconfig", "vercel"];

// Keyword in the request hints mapped to the repaired file name.
const TARGET_KEYWORDS: [(&str, &str); 3] = [
    ("package.json", "package.json"),
    ("tsconfig", "tsconfig.json"),
    ("vercel", "vercel.json"),
];

fn request_hints(request: &ExtractionRequest<'_>) -> String {
    [request.error_text, request.instruction]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
        .to_ascii_lowercase()
}

pub(crate) fn mentions_structured_config(request: &ExtractionRequest<'_>) -> bool {
    let hints = request_hints(request);
    STRUCTURED_KEYWORDS
        .iter()
        .any(|keyword| hints.contains(keyword))
}

/// First candidate that repairs into a JSON object, pretty-printed.
pub(crate) fn extract_repaired_config(
    request: &ExtractionRequest<'_>,
    config: &ExtractorConfig,
) -> Option<ExtractedFile> {
    let blocks = scan_fenced_blocks(request.response);
    let (json_blocks, other_blocks): (Vec<_>, Vec<_>) = blocks.into_iter().partition(|block| {
        matches!(
            block.language.as_deref(),
            Some("json" | "jsonc" | "json5")
        )
    });
    let candidates = json_blocks
        .iter()
        .chain(other_blocks.iter())
        .map(|block| block.body.as_str())
        .chain(std::iter::once(request.response));

    for candidate in candidates {
        let Some(object) = repair_json_object(candidate) else {
            continue;
        };
        let encoded = match serde_json::to_string_pretty(&object) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::debug!(error = %error, "failed to encode repaired config");
                continue;
            }
        };
        let path = structured_target(request, config);
        tracing::debug!(path = path.as_str(), "repaired structured config");
        return Some(ExtractedFile {
            path,
            content: normalize_content(&encoded),
            origin: ExtractionOrigin::StructuredRepair,
        });
    }
    None
}

fn repair_json_object(candidate: &str) -> Option<Value> {
    let normalized = normalize_json_like(candidate);
    let fragment = first_balanced_object(&normalized)?;
    match serde_json::from_str::<Value>(fragment) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(error) => {
            tracing::debug!(error = %error, "structured repair candidate did not parse");
            None
        }
    }
}

fn structured_target(request: &ExtractionRequest<'_>, config: &ExtractorConfig) -> String {
    if let Some(target) = request
        .target_path
        .and_then(sanitize_relative_path)
        .filter(|target| target.ends_with(".json"))
    {
        return target;
    }
    let hints = request_hints(request);
    TARGET_KEYWORDS
        .iter()
        .find(|(keyword, _)| hints.contains(keyword))
        .map(|(_, target)| (*target).to_string())
        .unwrap_or_else(|| config.default_structured_config_file.clone())
}

/// Removes comments and trailing commas outside of string literals.
pub fn normalize_json_like(text: &str) -> String {
    strip_trailing_commas(&strip_json_comments(text))
}

fn strip_json_comments(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut index = 0;
    while index < chars.len() {
        let current = chars[index];
        if in_string {
            out.push(current);
            if escaped {
                escaped = false;
            } else if current == '\\' {
                escaped = true;
            } else if current == '"' {
                in_string = false;
            }
            index += 1;
            continue;
        }
        match (current, chars.get(index + 1).copied()) {
            ('"', _) => {
                in_string = true;
                out.push(current);
                index += 1;
            }
            ('/', Some('/')) => {
                while index < chars.len() && chars[index] != '\n' {
                    index += 1;
                }
            }
            ('/', Some('*')) => {
                index += 2;
                while index < chars.len()
                    && !(chars[index] == '*' && chars.get(index + 1) == Some(&'/'))
                {
                    index += 1;
                }
                index = (index + 2).min(chars.len());
            }
            _ => {
                out.push(current);
                index += 1;
            }
        }
    }
    out
}

fn strip_trailing_commas(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (index, current) in chars.iter().copied().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if current == '\\' {
                escaped = true;
            } else if current == '"' {
                in_string = false;
            }
            out.push(current);
            continue;
        }
        if current == '"' {
            in_string = true;
        }
        if current == ',' {
            let next = chars[index + 1..]
                .iter()
                .find(|candidate| !candidate.is_whitespace())
                .copied();
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(current);
    }
    out
}

/// First `{ ... }` fragment whose braces balance, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, current) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if current == '\\' {
                escaped = true;
            } else if current == '"' {
                in_string = false;
            }
            continue;
        }
        match current {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{
        extract_repaired_config, first_balanced_object, mentions_structured_config,
        normalize_json_like,
    };
    use crate::{ExtractionRequest, ExtractorConfig};

    #[test]
    fn unit_normalize_json_like_keeps_comment_markers_inside_strings() {
        let raw = "{\n  \"url\": \"https://example.com/a,]\", // site\n  /* block */ \"n\": [1, 2,],\n}";
        let normalized = normalize_json_like(raw);
        let value: serde_json::Value = serde_json::from_str(&normalized).expect("valid json");
        assert_eq!(value["url"], "https://example.com/a,]");
        assert_eq!(value["n"], serde_json::json!([1, 2]));
    }

    #[test]
    fn unit_first_balanced_object_ignores_quoted_braces() {
        assert_eq!(
            first_balanced_object("use {\"a\": \"}\"} then more }"),
            Some("{\"a\": \"}\"}")
        );
        assert_eq!(first_balanced_object("{ \"open\": 1"), None);
        assert_eq!(first_balanced_object("no braces"), None);
    }

    #[test]
    fn unit_trigger_keywords_come_from_error_text_or_instruction() {
        let mut request = ExtractionRequest::new("{}");
        assert!(!mentions_structured_config(&request));
        request.instruction = Some("fix my Vercel deployment");
        assert!(mentions_structured_config(&request));
        request.instruction = None;
        request.error_text = Some("Invalid JSON in manifest");
        assert!(mentions_structured_config(&request));
    }

    #[test]
    fn functional_repair_defaults_to_configured_deployment_file() {
        let request = ExtractionRequest {
            response: "Try this:\n```\n{ \"rewrites\": [ { \"source\": \"/(.*)\", \"destination\": \"/\" }, ], }\n```",
            error_text: Some("Error: invalid json config"),
            ..ExtractionRequest::default()
        };
        let file =
            extract_repaired_config(&request, &ExtractorConfig::default()).expect("repaired");
        assert_eq!(file.path, "vercel.json");
        assert!(file.content.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&file.content).expect("valid json");
        assert_eq!(value["rewrites"][0]["destination"], "/");
    }

    #[test]
    fn functional_unparseable_candidates_are_skipped() {
        let request = ExtractionRequest {
            response: "```json\n{ not json at all }\n```\n```json\n{ \"ok\": true }\n```",
            error_text: Some("bad json"),
            target_path: Some("config/app.json"),
            ..ExtractionRequest::default()
        };
        let file =
            extract_repaired_config(&request, &ExtractorConfig::default()).expect("repaired");
        assert_eq!(file.path, "config/app.json");
        assert_eq!(file.content, "{\n  \"ok\": true\n}\n");
    }

    #[test]
    fn functional_non_object_json_is_not_a_candidate() {
        let request = ExtractionRequest {
            response: "```json\n[1, 2, 3]\n```",
            error_text: Some("json"),
            ..ExtractionRequest::default()
        };
        assert!(extract_repaired_config(&request, &ExtractorConfig::default()).is_none());
    }
}
