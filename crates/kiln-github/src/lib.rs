//! GitHub REST contents API access for applying generated files to a repository.

mod contents_client;
mod repo_ref;
pub mod transport_helpers;

use thiserror::Error;

pub use contents_client::{
    GithubContentsClient, GithubContentsConfig, GithubFile, GithubPutReceipt, PutFileRequest,
    DEFAULT_GITHUB_API_BASE,
};
pub use repo_ref::RepoRef;

#[derive(Debug, Error)]
/// Enumerates failures surfaced by the contents API client.
pub enum GithubContentError {
    #[error("github {operation} for '{path}' not found")]
    NotFound { operation: String, path: String },
    #[error("github {operation} denied with status {status}: {body}")]
    PermissionDenied {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("github {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("github {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode github {operation}: {reason}")]
    Decode { operation: String, reason: String },
    #[error("invalid github repository '{raw}', expected owner/repo")]
    InvalidRepo { raw: String },
    #[error("invalid github client configuration: {0}")]
    InvalidConfig(String),
}

impl GithubContentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
