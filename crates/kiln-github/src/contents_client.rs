use std::time::Duration;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::transport_helpers::{
    is_retryable_github_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};
use crate::{GithubContentError, RepoRef};

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

const ERROR_BODY_MAX_CHARS: usize = 800;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `GithubContentsConfig` used across Kiln components.
pub struct GithubContentsConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for GithubContentsConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            token: String::new(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decoded file body plus the blob sha needed to update it.
pub struct GithubFile {
    pub path: String,
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Clone)]
/// Inputs for one create-or-update call.
pub struct PutFileRequest<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
    /// Current blob sha; required by GitHub when the file already exists.
    pub sha: Option<&'a str>,
    pub branch: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `GithubPutReceipt` used across Kiln components.
pub struct GithubPutReceipt {
    pub commit_sha: String,
    pub commit_url: Option<String>,
    pub content_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsFilePayload {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutFilePayload {
    content: Option<PutContentPayload>,
    commit: PutCommitPayload,
}

#[derive(Debug, Deserialize)]
struct PutContentPayload {
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutCommitPayload {
    sha: String,
    html_url: Option<String>,
}

#[derive(Debug, Clone)]
/// Token-authenticated client for `/repos/{owner}/{repo}/contents/{path}`.
pub struct GithubContentsClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubContentsClient {
    pub fn new(config: GithubContentsConfig) -> Result<Self, GithubContentError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("kiln-contents-client"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let token = config.token.trim();
        if token.is_empty() {
            return Err(GithubContentError::InvalidConfig(
                "github token is empty".to_string(),
            ));
        }
        let auth_header = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| {
                GithubContentError::InvalidConfig("invalid github authorization header".to_string())
            })?;
        headers.insert(reqwest::header::AUTHORIZATION, auth_header);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                GithubContentError::InvalidConfig(format!("failed to create http client: {error}"))
            })?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    fn contents_url(&self, repo: &RepoRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            repo.owner,
            repo.name,
            path.trim_start_matches('/')
        )
    }

    /// Fetches and decodes one file; 404 maps to [`GithubContentError::NotFound`].
    pub async fn get_file(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<GithubFile, GithubContentError> {
        let operation = "get file";
        let url = self.contents_url(repo, path);
        let payload: ContentsFilePayload = self
            .request_json(operation, path, || {
                let request = self.http.get(url.as_str());
                match git_ref {
                    Some(git_ref) => request.query(&[("ref", git_ref)]),
                    None => request,
                }
            })
            .await?;
        if payload.kind != "file" {
            return Err(GithubContentError::Decode {
                operation: operation.to_string(),
                reason: format!("'{}' is a {}, not a file", payload.path, payload.kind),
            });
        }
        let content = decode_contents_body(
            payload.content.as_deref().unwrap_or_default(),
            payload.encoding.as_deref(),
        )
        .map_err(|reason| GithubContentError::Decode {
            operation: operation.to_string(),
            reason,
        })?;
        Ok(GithubFile {
            path: payload.path,
            content,
            sha: payload.sha,
        })
    }

    /// Creates `request.path`, or updates it when `request.sha` is given.
    pub async fn put_file(
        &self,
        repo: &RepoRef,
        request: &PutFileRequest<'_>,
    ) -> Result<GithubPutReceipt, GithubContentError> {
        let mut body = json!({
            "message": request.message,
            "content": base64::engine::general_purpose::STANDARD.encode(request.content),
        });
        if let Some(sha) = request.sha {
            body["sha"] = json!(sha);
        }
        if let Some(branch) = request.branch {
            body["branch"] = json!(branch);
        }
        let url = self.contents_url(repo, request.path);
        let payload: PutFilePayload = self
            .request_json("put file", request.path, || {
                self.http.put(url.as_str()).json(&body)
            })
            .await?;
        tracing::debug!(
            repo = %repo,
            path = request.path,
            commit = payload.commit.sha.as_str(),
            "wrote file through github contents api"
        );
        Ok(GithubPutReceipt {
            commit_sha: payload.commit.sha,
            commit_url: payload.commit.html_url,
            content_sha: payload.content.and_then(|content| content.sha),
        })
    }

    async fn request_json<T, F>(
        &self,
        operation: &str,
        path: &str,
        mut request_builder: F,
    ) -> Result<T, GithubContentError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header("x-kiln-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|error| {
                            GithubContentError::Decode {
                                operation: operation.to_string(),
                                reason: error.to_string(),
                            }
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    let status = status.as_u16();
                    if attempt < self.retry_max_attempts && is_retryable_github_status(status) {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        tracing::debug!(
                            operation,
                            status,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying github request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(status_error(operation, path, status, &body));
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(GithubContentError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

fn status_error(operation: &str, path: &str, status: u16, body: &str) -> GithubContentError {
    let operation = operation.to_string();
    let body = truncate_for_error(body, ERROR_BODY_MAX_CHARS);
    match status {
        404 => GithubContentError::NotFound {
            operation,
            path: path.to_string(),
        },
        401 | 403 => GithubContentError::PermissionDenied {
            operation,
            status,
            body,
        },
        _ => GithubContentError::Status {
            operation,
            status,
            body,
        },
    }
}

fn decode_contents_body(raw: &str, encoding: Option<&str>) -> Result<String, String> {
    match encoding.unwrap_or("base64") {
        "base64" => {
            let compact = raw
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .collect::<String>();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact.as_bytes())
                .map_err(|error| format!("invalid base64 content: {error}"))?;
            String::from_utf8(bytes).map_err(|_| "file content is not valid utf-8".to_string())
        }
        "" | "none" => Ok(raw.to_string()),
        other => Err(format!("unsupported content encoding '{other}'")),
    }
}
