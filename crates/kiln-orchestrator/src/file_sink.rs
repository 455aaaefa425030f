//! Destinations for extracted file writes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_core::{sanitize_relative_path, write_text_atomic_async};
use kiln_extract::ExtractedFile;
use kiln_github::{GithubContentsClient, PutFileRequest, RepoRef};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("failed to write '{path}': {reason}")]
/// One path the sink could not write.
pub struct WriteFailure {
    pub path: String,
    pub reason: String,
}

impl WriteFailure {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Per-path result of applying a batch of writes.
pub struct ApplyReport {
    pub written: Vec<String>,
    pub failed: Vec<WriteFailure>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
/// Whole-file destination for generated content.
pub trait FileSink: Send + Sync {
    /// Human-readable destination, used in logs.
    fn describe(&self) -> String;

    /// Current content of `path`, or `None` when absent or unreadable.
    async fn read_file(&self, path: &str) -> Option<String>;

    /// Replaces `path` with `content`; a repeated identical write leaves the same result.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), WriteFailure>;
}

/// Writes every file in order, continuing past individual failures.
pub async fn apply_files(sink: &dyn FileSink, files: &[ExtractedFile]) -> ApplyReport {
    let mut report = ApplyReport::default();
    for file in files {
        match sink.write_file(&file.path, &file.content).await {
            Ok(()) => {
                tracing::debug!(
                    sink = sink.describe().as_str(),
                    path = file.path.as_str(),
                    "applied extracted file"
                );
                report.written.push(file.path.clone());
            }
            Err(failure) => {
                tracing::warn!(
                    sink = sink.describe().as_str(),
                    path = failure.path.as_str(),
                    reason = failure.reason.as_str(),
                    "failed to apply extracted file"
                );
                report.failed.push(failure);
            }
        }
    }
    report
}

#[derive(Debug, Clone)]
/// Writes beneath a local project directory.
pub struct LocalFileSink {
    root: PathBuf,
}

impl LocalFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, WriteFailure> {
        let relative = sanitize_relative_path(path)
            .ok_or_else(|| WriteFailure::new(path, "path escapes the project root"))?;
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileSink for LocalFileSink {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        let resolved = self.resolve(path).ok()?;
        tokio::fs::read_to_string(resolved).await.ok()
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), WriteFailure> {
        let resolved = self.resolve(path)?;
        write_text_atomic_async(&resolved, content)
            .await
            .map_err(|error| WriteFailure::new(path, format!("{error:#}")))
    }
}

#[derive(Debug, Clone)]
/// Commits each write to a GitHub repository through the contents API.
pub struct GithubFileSink {
    client: GithubContentsClient,
    repo: RepoRef,
    branch: Option<String>,
    commit_message: String,
}

impl GithubFileSink {
    pub fn new(
        client: GithubContentsClient,
        repo: RepoRef,
        branch: Option<String>,
        commit_message: impl Into<String>,
    ) -> Self {
        Self {
            client,
            repo,
            branch,
            commit_message: commit_message.into(),
        }
    }
}

#[async_trait]
impl FileSink for GithubFileSink {
    fn describe(&self) -> String {
        match self.branch.as_deref() {
            Some(branch) => format!("github:{}@{branch}", self.repo),
            None => format!("github:{}", self.repo),
        }
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        let relative = sanitize_relative_path(path)?;
        self.client
            .get_file(&self.repo, &relative, self.branch.as_deref())
            .await
            .ok()
            .map(|file| file.content)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), WriteFailure> {
        let relative = sanitize_relative_path(path)
            .ok_or_else(|| WriteFailure::new(path, "path escapes the repository root"))?;
        let existing = match self
            .client
            .get_file(&self.repo, &relative, self.branch.as_deref())
            .await
        {
            Ok(file) => Some(file),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(WriteFailure::new(path, error.to_string())),
        };
        if existing
            .as_ref()
            .is_some_and(|file| file.content == content)
        {
            tracing::debug!(path = relative.as_str(), "github file already up to date");
            return Ok(());
        }
        let request = PutFileRequest {
            path: &relative,
            content,
            message: &self.commit_message,
            sha: existing.as_ref().map(|file| file.sha.as_str()),
            branch: self.branch.as_deref(),
        };
        self.client
            .put_file(&self.repo, &request)
            .await
            .map(|_| ())
            .map_err(|error| WriteFailure::new(path, error.to_string()))
    }
}
