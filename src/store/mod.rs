//! Coordination store client seam.
//!
//! The agent never talks to a concrete store directly. Everything goes through
//! [`CoordinationStore`], a hierarchical, watchable key/value namespace with
//! one-shot watches and session state events. Reconnection is the client's
//! business; the agent only reacts to [`SessionEvent::Reestablished`].

#[cfg(feature = "fs-store")]
mod fs;
mod memory;
mod paths;

#[cfg(feature = "fs-store")]
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use paths::LayerPaths;

use crate::error::StoreError;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::{broadcast, oneshot};

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The path came into existence.
    Created,
    /// The data at the path changed.
    DataChanged,
    /// The path was removed.
    Deleted,
    /// The session the watch belonged to is gone; the watch will never fire.
    SessionLost,
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchEventKind::Created => "created",
            WatchEventKind::DataChanged => "data_changed",
            WatchEventKind::Deleted => "deleted",
            WatchEventKind::SessionLost => "session_lost",
        };
        f.write_str(name)
    }
}

/// A fired one-shot watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Event type.
    pub kind: WatchEventKind,
    /// Watched path.
    pub path: String,
    /// Session state when the event was delivered.
    pub state: SessionEvent,
}

/// Session state transitions of the store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected with a live session.
    Connected,
    /// Connection lost; the session may still recover.
    Disconnected,
    /// The session expired; every registered watch is gone.
    Expired,
    /// A new session was established after a disconnect or expiry.
    Reestablished,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::Connected => "connected",
            SessionEvent::Disconnected => "disconnected",
            SessionEvent::Expired => "expired",
            SessionEvent::Reestablished => "reestablished",
        };
        f.write_str(name)
    }
}

/// Receiving side of a one-shot watch.
///
/// Resolves once with the event, or with an error when the store dropped the
/// watch without firing it.
pub type Watch = oneshot::Receiver<WatchEvent>;

/// Client to a hierarchical, watchable key/value store.
///
/// A missing path is never an error: reads return `None`, and a watched read
/// of a missing path still returns a watch that fires when the path is
/// created.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Check whether `path` exists.
    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Read the data stored at `path`.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `data` at `path`, creating it (and its parents) if absent.
    async fn set(&self, path: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read `path` and register a one-shot watch on it.
    async fn get_watched(&self, path: &str) -> Result<(Option<Vec<u8>>, Watch), StoreError>;

    /// List the child names of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Subscribe to session state events.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Human-readable name for logging.
    fn name(&self) -> String;
}

/// Reject paths the store namespace cannot represent.
pub(crate) fn validate_path(path: &str) -> Result<(), StoreError> {
    let valid = path == "/"
        || (path.starts_with('/')
            && path
                .split('/')
                .skip(1)
                .all(|segment| !segment.is_empty() && segment != "." && segment != ".."));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/xnta/yaf-config/global/config").is_ok());
        assert!(validate_path("relative/path").is_err());
        assert!(validate_path("/trailing/").is_err());
        assert!(validate_path("/double//slash").is_err());
        assert!(validate_path("/up/../escape").is_err());
    }
}
