//! Conversation history store with lock-protected read-modify-write.
use super::*;

use serde_json::Value;

use crate::{
    ConversationDocument, ConversationRecord, ConversationRole, DocumentStore, FileLockTable,
    JsonFileDocumentStore, StoredMessage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Details of one document write that could not be persisted.
pub struct PersistFailure {
    pub key: Option<String>,
    pub path: PathBuf,
    pub reason: String,
}

pub type PersistFailureHook = Arc<dyn Fn(&PersistFailure) + Send + Sync>;

/// Durable, bounded, single-writer-per-file conversation history.
pub struct ConversationStore {
    config: ConversationStoreConfig,
    documents: Arc<dyn DocumentStore>,
    locks: FileLockTable,
    // Documents whose last persist failed; served instead of disk until a save succeeds.
    pending: Mutex<HashMap<PathBuf, ConversationDocument>>,
    persist_failures: AtomicU64,
    on_persist_failure: Option<PersistFailureHook>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("config", &self.config)
            .field("persist_failures", &self.persist_failures())
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    pub fn new(config: ConversationStoreConfig) -> Self {
        Self::with_document_store(config, Arc::new(JsonFileDocumentStore))
    }

    pub fn with_document_store(
        config: ConversationStoreConfig,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let locks = FileLockTable::new(config.lock_stale_after, config.lock_poll_interval);
        Self {
            config,
            documents,
            locks,
            pending: Mutex::new(HashMap::new()),
            persist_failures: AtomicU64::new(0),
            on_persist_failure: None,
        }
    }

    /// Registers a callback invoked whenever a document write fails.
    pub fn with_persist_failure_hook(mut self, hook: PersistFailureHook) -> Self {
        self.on_persist_failure = Some(hook);
        self
    }

    pub fn config(&self) -> &ConversationStoreConfig {
        &self.config
    }

    pub fn lock_table(&self) -> &FileLockTable {
        &self.locks
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    /// Document path holding `key`.
    pub fn backing_path(&self, key: &str) -> PathBuf {
        match &self.config.layout {
            StoreLayout::Shared { path } => path.clone(),
            StoreLayout::PerRepository { dir, prefix } => dir.join(format!(
                "{prefix}{}.json",
                kiln_core::store_file_stem_for_key(key)
            )),
        }
    }

    /// Current history for `key`; missing or unreadable state yields an empty record.
    pub async fn load(&self, key: &str) -> ConversationRecord {
        let path = self.backing_path(key);
        self.read_document(&path)
            .await
            .records
            .remove(key)
            .unwrap_or_default()
    }

    /// Records one turn and returns the updated, capped record.
    ///
    /// Persist failures are logged and reported through the failure hook; the
    /// turn stays visible to this process until a later save succeeds.
    pub async fn append(
        &self,
        key: &str,
        role: ConversationRole,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) -> ConversationRecord {
        let path = self.backing_path(key);
        let _guard = self.locks.acquire_lock(&path).await;
        let mut document = self.read_document(&path).await;
        let record = document.records.entry(key.to_string()).or_default();
        record.push(
            StoredMessage::new(role, content, metadata),
            self.config.max_messages,
        );
        let updated = record.clone();
        tracing::debug!(
            key,
            role = role.as_str(),
            messages = updated.messages.len(),
            "appended conversation turn"
        );
        self.persist(Some(key), &path, document).await;
        updated
    }

    /// Replaces the record for `key`, trimmed to the configured cap.
    pub async fn save(&self, key: &str, record: ConversationRecord) -> ConversationRecord {
        let path = self.backing_path(key);
        let _guard = self.locks.acquire_lock(&path).await;
        let mut document = self.read_document(&path).await;
        let mut record = record;
        record.trim_to(self.config.max_messages);
        document.records.insert(key.to_string(), record.clone());
        self.persist(Some(key), &path, document).await;
        record
    }

    /// Last `n` messages for `key` in conversational order.
    pub async fn recent_context(&self, key: &str, n: usize) -> Vec<StoredMessage> {
        self.load(key).await.tail(n).to_vec()
    }

    /// Removes one record. Returns whether the key existed.
    pub async fn clear(&self, key: &str) -> bool {
        let path = self.backing_path(key);
        let _guard = self.locks.acquire_lock(&path).await;
        let mut document = self.read_document(&path).await;
        if document.records.remove(key).is_none() {
            return false;
        }
        self.persist(Some(key), &path, document).await;
        tracing::debug!(key, "cleared conversation");
        true
    }

    /// Resets every document of this store to empty.
    pub async fn clear_all(&self) {
        let paths = self.document_paths().await;
        for path in paths {
            let _guard = self.locks.acquire_lock(&path).await;
            self.persist(None, &path, ConversationDocument::default())
                .await;
        }
        tracing::debug!("cleared all conversations");
    }

    /// Every conversation key currently held by the store.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for path in self.document_paths().await {
            keys.extend(self.read_document(&path).await.records.into_keys());
        }
        keys.sort();
        keys.dedup();
        keys
    }

    async fn read_document(&self, path: &Path) -> ConversationDocument {
        let pending = self.lock_pending().get(path).cloned();
        if let Some(pending) = pending {
            return pending;
        }
        match self.documents.load_document(path).await {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "conversation store unreadable; treating history as empty"
                );
                ConversationDocument::default()
            }
        }
    }

    async fn persist(
        &self,
        key: Option<&str>,
        path: &Path,
        document: ConversationDocument,
    ) -> bool {
        let saved = self.documents.save_document(path, &document).await;
        match saved {
            Ok(()) => {
                self.lock_pending().remove(path);
                true
            }
            Err(error) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                let failure = PersistFailure {
                    key: key.map(ToOwned::to_owned),
                    path: path.to_path_buf(),
                    reason: error.to_string(),
                };
                tracing::warn!(
                    key = key.unwrap_or("*"),
                    path = %path.display(),
                    error = %error,
                    "failed to persist conversation store; keeping turn in memory"
                );
                self.lock_pending().insert(path.to_path_buf(), document);
                if let Some(hook) = self.on_persist_failure.as_ref() {
                    hook(&failure);
                }
                false
            }
        }
    }

    async fn document_paths(&self) -> Vec<PathBuf> {
        let mut paths = match &self.config.layout {
            StoreLayout::Shared { path } => vec![path.clone()],
            StoreLayout::PerRepository { dir, prefix } => {
                collect_store_documents(dir, prefix).await
            }
        };
        for pending in self.lock_pending().keys() {
            if !paths.contains(pending) {
                paths.push(pending.clone());
            }
        }
        paths.sort();
        paths
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, ConversationDocument>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Walks `dir` for `<prefix>*.json` documents, descending into prefixed owner directories.
async fn collect_store_documents(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending_dirs = vec![(dir.to_path_buf(), true)];
    while let Some((current, top_level)) = pending_dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %current.display(),
                        error = %error,
                        "failed to list conversation store directory"
                    );
                }
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || (top_level && !name.starts_with(prefix)) {
                continue;
            }
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending_dirs.push((path, false));
            } else if file_type.is_file() && name.ends_with(".json") {
                found.push(path);
            }
        }
    }
    found
}
