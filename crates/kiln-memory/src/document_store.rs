//! Durable access path for conversation documents.
use super::*;

use async_trait::async_trait;
use kiln_core::write_text_atomic_async;

use crate::ConversationDocument;

#[async_trait]
/// The only way a [`ConversationStore`](crate::ConversationStore) touches durable storage.
pub trait DocumentStore: Send + Sync {
    /// Returns an empty document when nothing has been persisted at `path` yet.
    async fn load_document(&self, path: &Path) -> Result<ConversationDocument, MemoryError>;

    async fn save_document(
        &self,
        path: &Path,
        document: &ConversationDocument,
    ) -> Result<(), MemoryError>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Pretty-printed JSON files replaced via write-temp-then-rename.
pub struct JsonFileDocumentStore;

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn load_document(&self, path: &Path) -> Result<ConversationDocument, MemoryError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConversationDocument::default());
            }
            Err(source) => {
                return Err(MemoryError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(ConversationDocument::default());
        }
        serde_json::from_str::<ConversationDocument>(&raw).map_err(|source| {
            MemoryError::MalformedPersistedState {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    async fn save_document(
        &self,
        path: &Path,
        document: &ConversationDocument,
    ) -> Result<(), MemoryError> {
        let encoded =
            serde_json::to_string_pretty(document).map_err(|source| MemoryError::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        write_text_atomic_async(path, &format!("{encoded}\n"))
            .await
            .map_err(|error| MemoryError::Write {
                path: path.to_path_buf(),
                reason: format!("{error:#}"),
            })
    }
}
