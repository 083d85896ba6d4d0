//! Key-value side store used as an alternative status channel
//!
//! Each agent writes its status under a key of its own, so writers never
//! contend. Values are only written when they differ from the stored value.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{BackendError, BackendResult};

/// Key-value store with a connection state
#[async_trait]
pub trait SideStore: Send + Sync {
    /// Resolves once the store is connected.
    async fn connected(&self);

    /// Write `value` under `key` unless the stored value is identical.
    async fn put(&self, key: &str, value: Vec<u8>) -> BackendResult<()>;

    async fn delete(&self, key: &str) -> BackendResult<()>;
}

/// In-memory side store
pub struct InMemorySideStore {
    connected: watch::Sender<bool>,
    entries: DashMap<String, Vec<u8>>,
    put_faults: Mutex<VecDeque<BackendError>>,
    puts: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemorySideStore {
    fn with_state(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self {
            connected: tx,
            entries: DashMap::new(),
            put_faults: Mutex::new(VecDeque::new()),
            puts: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn new_connected() -> Self {
        Self::with_state(true)
    }

    pub fn new_disconnected() -> Self {
        Self::with_state(false)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|value| value.clone())
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Make the next `put` fail with `error`.
    pub fn fail_next_put(&self, error: BackendError) {
        self.put_faults.lock().push_back(error);
    }

    /// Number of `put` calls received.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `put` calls that changed a stored value.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SideStore for InMemorySideStore {
    async fn connected(&self) {
        let mut rx = self.connected.subscribe();
        // The sender lives as long as the store, so this only ends on connect.
        let _ = rx.wait_for(|connected| *connected).await;
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> BackendResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.put_faults.lock().pop_front() {
            return Err(error);
        }
        if !*self.connected.borrow() {
            return Err(BackendError::Unavailable("side store disconnected".to_string()));
        }

        if self.entries.get(key).is_some_and(|stored| *stored == value) {
            debug!(key = %key, "Side store value unchanged");
            return Ok(());
        }
        self.entries.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        if !*self.connected.borrow() {
            return Err(BackendError::Unavailable("side store disconnected".to_string()));
        }
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_only_if_different() {
        let store = InMemorySideStore::new_connected();
        store.put("a", b"1".to_vec()).await.unwrap();
        store.put("a", b"1".to_vec()).await.unwrap();
        store.put("a", b"2".to_vec()).await.unwrap();

        assert_eq!(store.puts(), 3);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.get("a"), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_connected_waits() {
        let store = Arc::new(InMemorySideStore::new_disconnected());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.connected().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        store.set_connected(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_fault() {
        let store = InMemorySideStore::new_connected();
        store.fail_next_put(BackendError::Unavailable("lease expired".into()));
        assert!(store.put("a", vec![]).await.is_err());
        assert!(store.put("a", vec![]).await.is_ok());
        assert_eq!(store.keys(), vec!["a".to_string()]);
    }
}
