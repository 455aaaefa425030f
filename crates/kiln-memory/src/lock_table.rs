//! In-process advisory lock table keyed by backing file path.
use super::*;

use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Acquisition marker held in the table while a writer owns a path.
pub struct LockToken {
    pub id: u64,
    pub acquired_at: Instant,
}

#[derive(Debug, Clone)]
/// Path-keyed mutual exclusion owned by one store instance.
///
/// Process-local only: two processes writing the same file are not excluded.
pub struct FileLockTable {
    held: Arc<Mutex<HashMap<PathBuf, LockToken>>>,
    next_token_id: Arc<AtomicU64>,
    reclaimed: Arc<AtomicU64>,
    stale_after: Duration,
    poll_interval: Duration,
}

/// Releases its lock when dropped, including on early return or panic unwind.
#[derive(Debug)]
pub struct LockGuard {
    table: FileLockTable,
    path: PathBuf,
    token_id: u64,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token_id(&self) -> u64 {
        self.token_id
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.table.release_lock(&self.path, self.token_id);
    }
}

impl FileLockTable {
    pub fn new(stale_after: Duration, poll_interval: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            next_token_id: Arc::new(AtomicU64::new(1)),
            reclaimed: Arc::new(AtomicU64::new(0)),
            stale_after,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Waits until `path` is free, reclaiming it when the holder is older than the stale ceiling.
    pub async fn acquire_lock(&self, path: &Path) -> LockGuard {
        loop {
            if let Some(token_id) = self.try_acquire(path) {
                return LockGuard {
                    table: self.clone(),
                    path: path.to_path_buf(),
                    token_id,
                };
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Removes the lock only when `token_id` still owns it.
    pub fn release_lock(&self, path: &Path, token_id: u64) -> bool {
        let mut held = self.lock_held();
        match held.get(path) {
            Some(token) if token.id == token_id => {
                held.remove(path);
                true
            }
            _ => false,
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.lock_held().contains_key(path)
    }

    /// Number of stale locks force-released by this table.
    pub fn reclaimed_count(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    fn try_acquire(&self, path: &Path) -> Option<u64> {
        let mut held = self.lock_held();
        let now = Instant::now();
        if let Some(existing) = held.get(path) {
            let age = now.saturating_duration_since(existing.acquired_at);
            if age < self.stale_after {
                return None;
            }
            self.reclaimed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                path = %path.display(),
                stale_token = existing.id,
                held_ms = age.as_millis() as u64,
                "force-released stale conversation store lock (recovered deadlock)"
            );
        }

        let id = self.next_token_id.fetch_add(1, Ordering::Relaxed);
        held.insert(
            path.to_path_buf(),
            LockToken {
                id,
                acquired_at: now,
            },
        );
        Some(id)
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, LockToken>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
