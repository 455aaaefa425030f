//! Fence recognition and content normalization shared by the strategies.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fence {
    ch: char,
    len: usize,
}

/// Recognizes an opening fence line, returning the fence and its info string.
pub(crate) fn fence_open(line: &str) -> Option<(Fence, &str)> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|candidate| *candidate == ch).count();
    if len < 3 {
        return None;
    }
    let info = trimmed[len..].trim();
    if ch == '`' && info.contains('`') {
        return None;
    }
    Some((Fence { ch, len }, info))
}

pub(crate) fn fence_closes(line: &str, fence: &Fence) -> bool {
    let trimmed = line.trim();
    trimmed.chars().count() >= fence.len && trimmed.chars().all(|candidate| candidate == fence.ch)
}

/// Advances fence state across one content line.
pub(crate) fn track_fence(open: Option<Fence>, line: &str) -> Option<Fence> {
    match open {
        Some(fence) if fence_closes(line, &fence) => None,
        Some(fence) => Some(fence),
        None => fence_open(line).map(|(fence, _)| fence),
    }
}

/// Removes the fence opening the body along with anything after its closer.
///
/// A missing closing fence keeps every remaining line.
pub(crate) fn strip_wrapping_fence(body: &str) -> String {
    let lines = body.lines().collect::<Vec<_>>();
    let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return String::new();
    };
    let Some((fence, _)) = fence_open(lines[first]) else {
        return strip_trailing_separators(&lines).join("\n");
    };
    let inner = &lines[first + 1..];
    let end = inner
        .iter()
        .position(|line| fence_closes(line, &fence))
        .unwrap_or(inner.len());
    inner[..end].join("\n")
}

fn strip_trailing_separators<'a>(lines: &'a [&'a str]) -> &'a [&'a str] {
    let mut end = lines.len();
    while end > 0 {
        let trimmed = lines[end - 1].trim();
        if trimmed.is_empty() || trimmed == "---" || trimmed == "***" {
            end -= 1;
        } else {
            break;
        }
    }
    &lines[..end]
}

/// Drops leading blank lines and trailing whitespace, then ends with exactly one newline.
pub(crate) fn normalize_content(body: &str) -> String {
    let unified = body.replace("\r\n", "\n");
    let trimmed = unified.trim_end();
    let mut offset = 0;
    for line in trimmed.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        offset += line.len();
    }
    let core = &trimmed[offset..];
    if core.is_empty() {
        return String::new();
    }
    format!("{core}\n")
}

#[cfg(test)]
mod tests {
    use super::{fence_open, normalize_content, strip_wrapping_fence, track_fence};

    #[test]
    fn unit_fence_open_reads_info_string_and_rejects_inline_code() {
        let (_, info) = fence_open("  ```javascript").expect("fence");
        assert_eq!(info, "javascript");
        assert!(fence_open("~~~").is_some());
        assert!(fence_open("``").is_none());
        assert!(fence_open("```let x = 1```").is_none());
        assert!(fence_open("plain text").is_none());
    }

    #[test]
    fn unit_track_fence_requires_matching_closer() {
        let open = track_fence(None, "````md");
        assert!(open.is_some());
        let still_open = track_fence(open, "```");
        assert!(still_open.is_some());
        assert!(track_fence(still_open, "````").is_none());
    }

    #[test]
    fn unit_strip_wrapping_fence_handles_missing_closer_and_separators() {
        assert_eq!(strip_wrapping_fence("```js\nlet a = 1;\n```\n"), "let a = 1;");
        assert_eq!(strip_wrapping_fence("\n```js\nlet a = 1;"), "let a = 1;");
        assert_eq!(strip_wrapping_fence("let a = 1;\n\n---\n"), "let a = 1;");
    }

    #[test]
    fn regression_strip_wrapping_fence_drops_prose_after_closer() {
        assert_eq!(
            strip_wrapping_fence("```js\na();\n```\nThis calls a.\n\n---\n"),
            "a();"
        );
        assert_eq!(
            strip_wrapping_fence("````md\n```\nnested\n```\n````\ntrailing note"),
            "```\nnested\n```"
        );
    }

    #[test]
    fn unit_normalize_content_keeps_indentation_and_single_trailing_newline() {
        assert_eq!(
            normalize_content("\n\n    indented();\r\nnext();\n\n\n"),
            "    indented();\nnext();\n"
        );
        assert_eq!(normalize_content("  \n \n"), "");
    }
}
