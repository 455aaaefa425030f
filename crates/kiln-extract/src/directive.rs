//! Explicit `FILE:`/`CONTENT:` directive entries.

use kiln_core::sanitize_relative_path;

use crate::content::{normalize_content, strip_wrapping_fence, track_fence, Fence};
use crate::{ExtractedFile, ExtractionOrigin, ExtractorConfig};

struct PendingEntry<'a> {
    raw_path: &'a str,
    in_content: bool,
    lines: Vec<&'a str>,
}

pub(crate) fn extract_directive_files(
    response: &str,
    config: &ExtractorConfig,
) -> Vec<ExtractedFile> {
    let Some(section) = directive_section(response, &config.directive_marker) else {
        return Vec::new();
    };

    let mut files = Vec::new();
    let mut current: Option<PendingEntry<'_>> = None;
    let mut open_fence: Option<Fence> = None;
    for line in section.lines() {
        if open_fence.is_none() {
            if let Some(raw_path) = labeled_value(line, "FILE") {
                if let Some(entry) = current.take() {
                    finish_entry(entry, &mut files);
                }
                current = Some(PendingEntry {
                    raw_path,
                    in_content: false,
                    lines: Vec::new(),
                });
                continue;
            }
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if !entry.in_content {
            if let Some(rest) = labeled_value(line, "CONTENT") {
                entry.in_content = true;
                if !rest.is_empty() {
                    open_fence = track_fence(open_fence, rest);
                    entry.lines.push(rest);
                }
            }
            continue;
        }
        open_fence = track_fence(open_fence, line);
        entry.lines.push(line);
    }
    if let Some(entry) = current.take() {
        finish_entry(entry, &mut files);
    }
    files
}

/// Text following the marker header line, if the response has one.
fn directive_section<'a>(response: &'a str, marker: &str) -> Option<&'a str> {
    let marker = marker.trim().to_ascii_lowercase();
    if marker.is_empty() {
        return None;
    }
    let mut offset = 0;
    for line in response.split_inclusive('\n') {
        let next = offset + line.len();
        if normalize_header(line) == marker {
            return Some(&response[next..]);
        }
        offset = next;
    }
    None
}

fn normalize_header(line: &str) -> String {
    line.trim()
        .trim_matches(|c: char| matches!(c, '#' | '*' | '_' | '`' | '>') || c.is_whitespace())
        .trim_end_matches(':')
        .trim()
        .to_ascii_lowercase()
}

/// Value after `label:` on a line, ignoring list markers and emphasis.
fn labeled_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let trimmed = line.trim().trim_start_matches(|c: char| {
        matches!(c, '-' | '*' | '#' | '>' | '_' | '.' | ')') || c.is_ascii_digit() || c.is_whitespace()
    });
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..]
        .trim_start_matches(['*', '_'])
        .strip_prefix(':')?;
    Some(rest.trim_start_matches(['*', '_']).trim())
}

fn finish_entry(entry: PendingEntry<'_>, files: &mut Vec<ExtractedFile>) {
    let Some(path) = sanitize_relative_path(entry.raw_path) else {
        tracing::warn!(
            raw_path = entry.raw_path,
            "skipping directive entry with unsafe or empty path"
        );
        return;
    };
    if !entry.in_content {
        tracing::debug!(path = path.as_str(), "directive entry has no CONTENT section");
        return;
    }
    let content = normalize_content(&strip_wrapping_fence(&entry.lines.join("\n")));
    if content.is_empty() {
        tracing::debug!(path = path.as_str(), "directive entry has empty content");
        return;
    }
    files.push(ExtractedFile {
        path,
        content,
        origin: ExtractionOrigin::Explicit,
    });
}
