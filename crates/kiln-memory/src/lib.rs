//! Persistent, repository-scoped conversation memory for Kiln.
//!
//! A [`ConversationStore`] keeps bounded per-key message history in JSON
//! documents on disk. Every read-modify-write goes through an in-process
//! advisory lock keyed by the backing file path, and every write replaces the
//! document atomically. History is a soft cache: read failures degrade to an
//! empty history instead of failing the caller.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use thiserror::Error;

mod conversation;
mod conversation_store;
mod document_store;
mod lock_table;

pub use conversation::{ConversationDocument, ConversationRecord, ConversationRole, StoredMessage};
pub use conversation_store::{ConversationStore, PersistFailure, PersistFailureHook};
pub use document_store::{DocumentStore, JsonFileDocumentStore};
pub use lock_table::{FileLockTable, LockGuard, LockToken};

pub const DEFAULT_MAX_MESSAGES: usize = 40;
pub const DEFAULT_LOCK_STALE_MS: u64 = 30_000;
pub const DEFAULT_LOCK_POLL_MS: u64 = 50;
pub const DEFAULT_STORE_FILE_PREFIX: &str = "conversation_";
pub const DEFAULT_SHARED_STORE_FILE_NAME: &str = "conversations.json";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where a store keeps its documents.
pub enum StoreLayout {
    /// One document holding every key, typically keyed by session id.
    Shared { path: PathBuf },
    /// One document per key under `dir`, named `<prefix><sanitized key>.json`.
    PerRepository { dir: PathBuf, prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ConversationStoreConfig` used across Kiln components.
pub struct ConversationStoreConfig {
    pub layout: StoreLayout,
    pub max_messages: usize,
    pub lock_stale_after: Duration,
    pub lock_poll_interval: Duration,
}

impl ConversationStoreConfig {
    pub fn shared(path: impl Into<PathBuf>) -> Self {
        Self::with_layout(StoreLayout::Shared { path: path.into() })
    }

    pub fn per_repository(dir: impl Into<PathBuf>) -> Self {
        Self::with_layout(StoreLayout::PerRepository {
            dir: dir.into(),
            prefix: DEFAULT_STORE_FILE_PREFIX.to_string(),
        })
    }

    fn with_layout(layout: StoreLayout) -> Self {
        Self {
            layout,
            max_messages: DEFAULT_MAX_MESSAGES,
            lock_stale_after: Duration::from_millis(DEFAULT_LOCK_STALE_MS),
            lock_poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_MS),
        }
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `MemoryError` values.
pub enum MemoryError {
    #[error("failed to read conversation store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("conversation store {path} is malformed: {source}")]
    MalformedPersistedState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode conversation store {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write conversation store {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

impl MemoryError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. }
            | Self::MalformedPersistedState { path, .. }
            | Self::Encode { path, .. }
            | Self::Write { path, .. } => path,
        }
    }
}
