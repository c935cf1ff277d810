//! In-process coordination store.

use super::{CoordinationStore, SessionEvent, Watch, WatchEvent, WatchEventKind, validate_path};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};

struct MemoryStoreInner {
    nodes: BTreeMap<String, Vec<u8>>,
    watches: HashMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    connected: bool,
}

impl MemoryStoreInner {
    fn fire(&mut self, path: &str, kind: WatchEventKind) {
        if let Some(senders) = self.watches.remove(path) {
            for tx in senders {
                let _ = tx.send(WatchEvent {
                    kind,
                    path: path.to_string(),
                    state: SessionEvent::Connected,
                });
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

/// Watchable store held entirely in memory.
///
/// Behaves like a remote store with one-shot watches and session events, and
/// lets callers simulate disconnects and session expiry. Cloning yields
/// another handle to the same namespace.
///
/// # Examples
///
/// ```rust
/// use capture_config_agent::store::{CoordinationStore, MemoryStore};
///
/// # async fn example() -> Result<(), capture_config_agent::error::StoreError> {
/// let store = MemoryStore::new();
/// let (data, watch) = store.get_watched("/agents/global/config").await?;
/// assert!(data.is_none());
///
/// store.set("/agents/global/config", br#"{}"#).await?;
/// let event = watch.await.unwrap();
/// assert_eq!(event.path, "/agents/global/config");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
    sessions: broadcast::Sender<SessionEvent>,
}

impl MemoryStore {
    /// Create an empty, connected store.
    pub fn new() -> Self {
        let (sessions, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                nodes: BTreeMap::new(),
                watches: HashMap::new(),
                connected: true,
            })),
            sessions,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    /// Remove `path`, firing its watches.
    pub fn delete(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        let mut inner = self.lock()?;
        inner.ensure_connected()?;
        let removed = inner.nodes.remove(path).is_some();
        if removed {
            inner.fire(path, WatchEventKind::Deleted);
        }
        Ok(removed)
    }

    /// Simulate losing the connection without losing the session.
    pub fn disconnect(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.connected = false;
        }
        let _ = self.sessions.send(SessionEvent::Disconnected);
    }

    /// Simulate session expiry: every registered watch is dropped.
    pub fn expire_session(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.connected = false;
            for (path, senders) in inner.watches.drain() {
                for tx in senders {
                    let _ = tx.send(WatchEvent {
                        kind: WatchEventKind::SessionLost,
                        path: path.clone(),
                        state: SessionEvent::Expired,
                    });
                }
            }
        }
        let _ = self.sessions.send(SessionEvent::Expired);
    }

    /// Simulate a new session after [`disconnect`](Self::disconnect) or
    /// [`expire_session`](Self::expire_session).
    pub fn reconnect(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.connected = true;
        }
        let _ = self.sessions.send(SessionEvent::Reestablished);
    }

    /// Number of watches that are registered and still have a listener.
    pub fn live_watches(&self) -> usize {
        self.lock()
            .map(|inner| {
                inner
                    .watches
                    .values()
                    .flatten()
                    .filter(|tx| !tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        let inner = self.lock()?;
        inner.ensure_connected()?;
        Ok(inner.nodes.contains_key(path))
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_path(path)?;
        let inner = self.lock()?;
        inner.ensure_connected()?;
        Ok(inner.nodes.get(path).cloned())
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_path(path)?;
        let mut inner = self.lock()?;
        inner.ensure_connected()?;
        let kind = match inner.nodes.insert(path.to_string(), data.to_vec()) {
            Some(_) => WatchEventKind::DataChanged,
            None => WatchEventKind::Created,
        };
        inner.fire(path, kind);
        Ok(())
    }

    async fn get_watched(&self, path: &str) -> Result<(Option<Vec<u8>>, Watch), StoreError> {
        validate_path(path)?;
        let mut inner = self.lock()?;
        inner.ensure_connected()?;
        let (tx, rx) = oneshot::channel();
        let senders = inner.watches.entry(path.to_string()).or_default();
        senders.retain(|tx| !tx.is_closed());
        senders.push(tx);
        Ok((inner.nodes.get(path).cloned(), rx))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        validate_path(path)?;
        let inner = self.lock()?;
        inner.ensure_connected()?;
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let names: BTreeSet<String> = inner
            .nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const PATH: &str = "/base/global/config";

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get(PATH).await.unwrap(), None);
        assert!(!store.exists(PATH).await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_fires_on_create_then_change() {
        let store = MemoryStore::new();
        let (_, watch) = store.get_watched(PATH).await.unwrap();
        store.set(PATH, b"{}").await.unwrap();
        assert_eq!(watch.await.unwrap().kind, WatchEventKind::Created);

        let (data, watch) = store.get_watched(PATH).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"{}"[..]));
        store.set(PATH, b"{\"capture\":{}}").await.unwrap();
        assert_eq!(watch.await.unwrap().kind, WatchEventKind::DataChanged);
    }

    #[tokio::test]
    async fn test_watch_is_one_shot() {
        let store = MemoryStore::new();
        let (_, watch) = store.get_watched(PATH).await.unwrap();
        store.set(PATH, b"1").await.unwrap();
        watch.await.unwrap();
        assert_eq!(store.live_watches(), 0);
    }

    #[tokio::test]
    async fn test_delete_fires_watch() {
        let store = MemoryStore::new();
        store.set(PATH, b"1").await.unwrap();
        let (_, watch) = store.get_watched(PATH).await.unwrap();
        assert!(store.delete(PATH).unwrap());
        assert_eq!(watch.await.unwrap().kind, WatchEventKind::Deleted);
    }

    #[tokio::test]
    async fn test_children() {
        let store = MemoryStore::new();
        store.set("/base/cluster/a/config", b"1").await.unwrap();
        store.set("/base/cluster/a/nodes/n1/config", b"1").await.unwrap();
        store.set("/base/cluster/b/config", b"1").await.unwrap();
        assert_eq!(store.children("/base/cluster").await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.children("/base/cluster/a/nodes").await.unwrap(), vec!["n1"]);
        assert!(store.children("/base/none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_store_errors() {
        let store = MemoryStore::new();
        let mut sessions = store.session_events();
        store.disconnect();
        assert_eq!(store.get(PATH).await, Err(StoreError::NotConnected));
        assert_eq!(sessions.recv().await.unwrap(), SessionEvent::Disconnected);

        store.reconnect();
        assert_eq!(sessions.recv().await.unwrap(), SessionEvent::Reestablished);
        assert!(store.get(PATH).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_releases_watches() {
        let store = MemoryStore::new();
        let (_, watch) = store.get_watched(PATH).await.unwrap();
        store.expire_session();
        let event = timeout(Duration::from_secs(1), watch).await.unwrap().unwrap();
        assert_eq!(event.kind, WatchEventKind::SessionLost);
        assert_eq!(event.state, SessionEvent::Expired);
        assert_eq!(store.live_watches(), 0);
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set("no-slash", b"1").await,
            Err(StoreError::InvalidPath(_))
        ));
    }
}
