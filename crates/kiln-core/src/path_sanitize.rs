//! Path sanitizers for model-proposed file paths and store file names.

/// Normalizes a model- or user-supplied path into a safe relative path.
///
/// Returns `None` when the path is empty after normalization or contains a
/// parent-directory segment anywhere.
pub fn sanitize_relative_path(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|ch: char| matches!(ch, '`' | '"' | '\'' | '*'))
        .trim();
    if trimmed.is_empty() {
        return None;
    }

    let unified = trimmed.replace('\\', "/");
    let without_drive = strip_drive_prefix(&unified);

    let mut segments = Vec::new();
    for segment in without_drive.split('/') {
        let segment = segment.trim();
        match segment {
            "" | "." => continue,
            ".." => return None,
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Derives the store file stem for a conversation key.
///
/// Lowercases the key, replaces every character outside `[a-z0-9-_/.]` with
/// `_`, collapses doubled separators, and neutralizes `.`/`..` segments so the
/// stem always stays inside the store directory.
pub fn store_file_stem_for_key(key: &str) -> String {
    let lowered = key.trim().to_lowercase();
    let replaced = lowered
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase()
                || ch.is_ascii_digit()
                || matches!(ch, '-' | '_' | '/' | '.')
            {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();

    let segments = replaced
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment {
            "." | ".." => "_",
            other => other,
        })
        .collect::<Vec<_>>();
    if segments.is_empty() {
        return "_".to_string();
    }
    segments.join("/")
}

fn strip_drive_prefix(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return &path[2..];
    }
    path
}

#[cfg(test)]
mod tests {
    use super::{sanitize_relative_path, store_file_stem_for_key};

    #[test]
    fn unit_sanitize_relative_path_strips_roots_and_dot_segments() {
        assert_eq!(
            sanitize_relative_path("/src/./server.js"),
            Some("src/server.js".to_string())
        );
        assert_eq!(
            sanitize_relative_path("`public\\index.html`"),
            Some("public/index.html".to_string())
        );
        assert_eq!(
            sanitize_relative_path("C:\\work\\app.js"),
            Some("work/app.js".to_string())
        );
        assert_eq!(
            sanitize_relative_path("./package.json"),
            Some("package.json".to_string())
        );
    }

    #[test]
    fn regression_sanitize_relative_path_rejects_parent_traversal() {
        assert_eq!(sanitize_relative_path("../etc/passwd"), None);
        assert_eq!(sanitize_relative_path("src/../../secret"), None);
        assert_eq!(sanitize_relative_path("   "), None);
        assert_eq!(sanitize_relative_path("/"), None);
    }

    #[test]
    fn unit_store_file_stem_for_key_matches_repository_naming_rule() {
        assert_eq!(store_file_stem_for_key("Owner/Repo"), "owner/repo");
        assert_eq!(
            store_file_stem_for_key("owner//my repo!"),
            "owner/my_repo_"
        );
        assert_eq!(store_file_stem_for_key("session-42_a.b"), "session-42_a.b");
    }

    #[test]
    fn regression_store_file_stem_for_key_neutralizes_traversal() {
        assert_eq!(store_file_stem_for_key("../../etc"), "_/_/etc");
        assert_eq!(store_file_stem_for_key("/abs/key"), "abs/key");
        assert_eq!(store_file_stem_for_key(""), "_");
    }
}
