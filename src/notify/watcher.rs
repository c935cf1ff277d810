use crate::core::{ApplyCoordinator, LayerScope, ReconcileOutcome};
use crate::store::{CoordinationStore, SessionEvent, Watch, WatchEvent, WatchEventKind};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Idle interval after which watches are re-armed and layers re-checked.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a reconcile pass was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// First pass after start.
    Startup,
    /// A watch on a layer path fired.
    Changed {
        /// Layer whose path fired.
        scope: LayerScope,
        /// What happened.
        kind: WatchEventKind,
    },
    /// The store session was re-established; earlier watches are not trusted.
    SessionReestablished,
    /// Session events were dropped; state is unknown.
    SessionLagged,
    /// No event arrived within the idle interval.
    IdleRecheck,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => f.write_str("startup"),
            Trigger::Changed { scope, kind } => write!(f, "{} layer {}", scope, kind),
            Trigger::SessionReestablished => f.write_str("session reestablished"),
            Trigger::SessionLagged => f.write_str("session events lagged"),
            Trigger::IdleRecheck => f.write_str("idle recheck"),
        }
    }
}

enum SessionSignal {
    Event(SessionEvent),
    Lagged(u64),
}

/// Detects possible layer changes and asks the coordinator to reconcile.
///
/// One loop, one pass at a time: the loop arms a one-shot watch on every
/// layer path, then waits for the first of a fired watch, a store session
/// event, the idle timer or shutdown. Watches are re-armed on every
/// iteration, so a watch lost with an expired session is replaced at the
/// latest one idle interval later. The idle timer also re-runs reconcile,
/// which is a no-op when nothing changed and the retry path after a store
/// outage.
///
/// # Examples
///
/// ```rust,no_run
/// use capture_config_agent::notify::ChangeWatcher;
/// # use capture_config_agent::core::ApplyCoordinator;
/// # use std::sync::Arc;
/// # use std::time::Duration;
///
/// # async fn example(coordinator: Arc<ApplyCoordinator>) {
/// let watcher = ChangeWatcher::new(coordinator).with_idle_timeout(Duration::from_secs(30));
/// watcher.run(async { tokio::signal::ctrl_c().await.ok(); }).await;
/// # }
/// ```
pub struct ChangeWatcher {
    coordinator: Arc<ApplyCoordinator>,
    idle_timeout: Duration,
}

impl ChangeWatcher {
    /// Watch the layer paths of `coordinator`.
    pub fn new(coordinator: Arc<ApplyCoordinator>) -> Self {
        Self {
            coordinator,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Override the idle interval.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn store(&self) -> &Arc<dyn CoordinationStore> {
        self.coordinator.store()
    }

    /// Run the loop on its own task.
    pub fn spawn<F>(self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` resolves.
    ///
    /// A pass already in flight when `shutdown` resolves runs to completion;
    /// no new pass starts afterwards.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut sessions = self.store().session_events();

        info!(
            store = %self.store().name(),
            cluster = %self.coordinator.paths().cluster(),
            node_id = %self.coordinator.paths().node_id(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "Change watcher started"
        );

        self.reconcile(Trigger::Startup).await;

        loop {
            let [global, cluster, node] = self.arm().await;

            let trigger = tokio::select! {
                biased;

                _ = &mut shutdown => break,

                signal = next_session_signal(&mut sessions) => match signal {
                    SessionSignal::Event(SessionEvent::Reestablished) => {
                        Trigger::SessionReestablished
                    }
                    SessionSignal::Event(state) => {
                        warn!(%state, "Store session state changed");
                        continue;
                    }
                    SessionSignal::Lagged(skipped) => {
                        warn!(skipped, "Missed store session events");
                        Trigger::SessionLagged
                    }
                },

                Some(event) = fired(global) => self.classify(LayerScope::Global, event),
                Some(event) = fired(cluster) => self.classify(LayerScope::Cluster, event),
                Some(event) = fired(node) => self.classify(LayerScope::Node, event),

                _ = tokio::time::sleep(self.idle_timeout) => Trigger::IdleRecheck,
            };

            match trigger {
                // Watch lost with its session; re-arm only.
                Trigger::Changed {
                    scope,
                    kind: WatchEventKind::SessionLost,
                } => debug!(%scope, "Watch dropped with session, re-arming"),
                trigger => self.reconcile(trigger).await,
            }
        }

        info!("Change watcher stopped");
    }

    fn classify(&self, scope: LayerScope, event: WatchEvent) -> Trigger {
        debug!(%scope, path = %event.path, kind = %event.kind, state = %event.state, "Watch fired");
        Trigger::Changed {
            scope,
            kind: event.kind,
        }
    }

    /// Arm a watch on every layer path. A path that cannot be watched right
    /// now is left unarmed until the next iteration.
    async fn arm(&self) -> [Option<Watch>; 3] {
        let mut watches = [None, None, None];
        for (slot, (scope, path)) in watches.iter_mut().zip(self.coordinator.paths().all()) {
            match self.store().get_watched(&path).await {
                Ok((_, watch)) => *slot = Some(watch),
                Err(e) => warn!(%scope, %path, error = %e, "Failed to arm watch"),
            }
        }
        watches
    }

    async fn reconcile(&self, trigger: Trigger) {
        debug!(%trigger, "Reconciling");
        match self.coordinator.reconcile().await {
            Ok(ReconcileOutcome::Unchanged) => debug!(%trigger, "No configuration change"),
            Ok(ReconcileOutcome::Applied { restarted }) => {
                info!(%trigger, restarted, "Reconcile applied a new configuration")
            }
            Err(e) => error!(%trigger, error = %e, "Reconcile failed"),
        }
    }
}

/// Wait for an armed watch. Unarmed slots and watches the store dropped
/// without firing never resolve to `Some`.
async fn fired(watch: Option<Watch>) -> Option<WatchEvent> {
    watch?.await.ok()
}

async fn next_session_signal(sessions: &mut broadcast::Receiver<SessionEvent>) -> SessionSignal {
    match sessions.recv().await {
        Ok(event) => SessionSignal::Event(event),
        Err(RecvError::Lagged(skipped)) => SessionSignal::Lagged(skipped),
        // The store outlives the watcher, so this only happens on teardown.
        Err(RecvError::Closed) => std::future::pending().await,
    }
}
