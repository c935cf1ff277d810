//! Directory-backed coordination store.

use super::{CoordinationStore, SessionEvent, Watch, WatchEvent, WatchEventKind, validate_path};
use crate::error::StoreError;
use async_trait::async_trait;
use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::sleep;

type WatchMap = HashMap<String, Vec<oneshot::Sender<WatchEvent>>>;

/// Pending one-shot watches, keyed by store path.
#[derive(Default)]
struct WatchRegistry {
    watches: Mutex<WatchMap>,
}

impl WatchRegistry {
    fn register(&self, path: &str) -> Result<Watch, StoreError> {
        let (tx, rx) = oneshot::channel();
        let mut watches = self
            .watches
            .lock()
            .map_err(|_| StoreError::Backend("watch registry lock poisoned".to_string()))?;
        let senders = watches.entry(path.to_string()).or_default();
        senders.retain(|tx| !tx.is_closed());
        senders.push(tx);
        Ok(rx)
    }

    fn fire(&self, path: &str, kind: WatchEventKind, state: SessionEvent) {
        let senders = match self.watches.lock() {
            Ok(mut watches) => watches.remove(path),
            Err(_) => None,
        };
        for tx in senders.into_iter().flatten() {
            let _ = tx.send(WatchEvent {
                kind,
                path: path.to_string(),
                state,
            });
        }
    }

    fn expire_all(&self) {
        let drained: Vec<(String, Vec<oneshot::Sender<WatchEvent>>)> = match self.watches.lock() {
            Ok(mut watches) => watches.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (path, senders) in drained {
            for tx in senders {
                let _ = tx.send(WatchEvent {
                    kind: WatchEventKind::SessionLost,
                    path: path.clone(),
                    state: SessionEvent::Expired,
                });
            }
        }
    }
}

/// Coordination store kept in a local directory tree.
///
/// Store path `/a/b/config` maps to the file `<root>/a/b/config`; directories
/// are interior nodes without data. Watches are served by the platform file
/// watcher. When the watcher fails, every watch is released with a
/// session-expired event and the watcher is re-created with backoff, after
/// which [`SessionEvent::Reestablished`] is broadcast.
///
/// Must be opened from within a Tokio runtime.
pub struct FsStore {
    root: PathBuf,
    registry: Arc<WatchRegistry>,
    sessions: broadcast::Sender<SessionEvent>,
    _alive: oneshot::Sender<()>,
}

impl FsStore {
    /// Open (creating if necessary) the store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or watched.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.as_ref()).map_err(io_error)?;
        let root = root.as_ref().canonicalize().map_err(io_error)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = start_watcher(&root, event_tx.clone())
            .map_err(|e| StoreError::Backend(format!("Failed to watch store root: {}", e)))?;

        let registry = Arc::new(WatchRegistry::default());
        let (sessions, _) = broadcast::channel(16);
        let (alive_tx, alive_rx) = oneshot::channel();

        tokio::spawn(dispatch(
            root.clone(),
            Arc::clone(&registry),
            sessions.clone(),
            watcher,
            event_tx,
            event_rx,
            alive_rx,
        ));

        tracing::info!(root = %root.display(), "Directory store opened");

        Ok(Self {
            root,
            registry,
            sessions,
            _alive: alive_tx,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fs_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        validate_path(path)?;
        Ok(path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }
}

fn start_watcher(
    root: &Path,
    tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Exponential backoff with jitter for watcher re-creation.
fn backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential = 2u64.saturating_pow(attempt.saturating_sub(1));
    let capped = base_ms.saturating_mul(exponential).min(max_ms);
    let jitter = fastrand::u64(0..=capped / 10);
    Duration::from_millis(capped + jitter)
}

fn event_kind(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            Some(WatchEventKind::DataChanged)
        }
        EventKind::Remove(_) => Some(WatchEventKind::Deleted),
        EventKind::Access(_) => None,
    }
}

/// Translate an absolute file path below `root` into a store path.
fn store_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let mut path = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                path.push('/');
                path.push_str(name.to_str()?);
            }
            _ => return None,
        }
    }
    if path.is_empty() { None } else { Some(path) }
}

async fn dispatch(
    root: PathBuf,
    registry: Arc<WatchRegistry>,
    sessions: broadcast::Sender<SessionEvent>,
    watcher: RecommendedWatcher,
    event_tx: mpsc::UnboundedSender<notify::Result<Event>>,
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut alive: oneshot::Receiver<()>,
) {
    let mut watcher = Some(watcher);
    loop {
        let res = tokio::select! {
            _ = &mut alive => break,
            res = event_rx.recv() => match res {
                Some(res) => res,
                None => break,
            },
        };

        match res {
            Ok(event) => {
                let Some(kind) = event_kind(&event.kind) else {
                    continue;
                };
                for file in &event.paths {
                    if let Some(path) = store_path(&root, file) {
                        registry.fire(&path, kind, SessionEvent::Connected);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Store watcher failed, expiring watches");
                drop(watcher.take());
                registry.expire_all();
                let _ = sessions.send(SessionEvent::Expired);

                let mut attempt = 0;
                while watcher.is_none() {
                    attempt += 1;
                    tokio::select! {
                        _ = &mut alive => return,
                        _ = sleep(backoff(attempt, 200, 10_000)) => {}
                    }
                    match start_watcher(&root, event_tx.clone()) {
                        Ok(w) => {
                            watcher = Some(w);
                            tracing::info!(attempt, "Store watcher re-established");
                            let _ = sessions.send(SessionEvent::Reestablished);
                        }
                        Err(e) => {
                            tracing::warn!(
                                attempt,
                                error = %e,
                                "Failed to re-create store watcher"
                            );
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(root = %root.display(), "Directory store dispatcher stopped");
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl CoordinationStore for FsStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let file = self.fs_path(path)?;
        tokio::fs::try_exists(&file).await.map_err(io_error)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let file = self.fs_path(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(_) if file.is_dir() => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let file = self.fs_path(path)?;
        let parent = file
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?
            .to_path_buf();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&parent)?;
            let mut tmp = tempfile::Builder::new().prefix(".").tempfile_in(&parent)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&file).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .map_err(io_error)
    }

    async fn get_watched(&self, path: &str) -> Result<(Option<Vec<u8>>, Watch), StoreError> {
        self.fs_path(path)?;
        // Register before reading so a write in between still fires.
        let watch = self.registry.register(path)?;
        let data = self.get(path).await?;
        Ok((data, watch))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.fs_path(path)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    fn name(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}
