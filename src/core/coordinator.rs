//! The reconcile loop body: read, merge, compare, apply.

use super::merge::ConfigMerger;
use super::model::{CaptureConfig, ConfigLayer, LayerScope};
use crate::error::{AgentError, Result};
use crate::render::ConfigWriter;
use crate::store::{CoordinationStore, LayerPaths};
use crate::supervisor::RestartOrchestrator;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::ReconcileMetrics;

/// Result of a successful reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resolved configuration equals the applied one; nothing was done.
    Unchanged,
    /// A new configuration was rendered. `restarted` is false when the
    /// restart sequence failed afterwards.
    Applied {
        /// Whether the restart sequence completed.
        restarted: bool,
    },
}

/// What one read of a layer path produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerState {
    /// Nothing stored at the path.
    Missing,
    /// Stored data could not be decoded and was ignored.
    Malformed {
        /// Decoder message.
        reason: String,
    },
    /// Decoded layer.
    Present(ConfigLayer),
}

/// A resolved configuration together with how each layer contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Merged configuration.
    pub config: CaptureConfig,
    /// Layer read results, in merge order.
    pub layers: Vec<(LayerScope, String, LayerState)>,
}

impl Resolution {
    /// Number of layers that took part in the merge.
    pub fn present(&self) -> usize {
        self.layers
            .iter()
            .filter(|(_, _, state)| matches!(state, LayerState::Present(_)))
            .count()
    }
}

/// Owns the applied configuration and drives render and restart when it
/// changes.
///
/// Passes are serialized: concurrent callers of [`reconcile`](Self::reconcile)
/// wait for the one in flight. The applied configuration is recorded before
/// render and restart run, so a pass whose restart fails is not repeated until
/// the resolved configuration changes again.
pub struct ApplyCoordinator {
    store: Arc<dyn CoordinationStore>,
    paths: LayerPaths,
    defaults: CaptureConfig,
    writer: Arc<dyn ConfigWriter>,
    restarter: RestartOrchestrator,
    apply_lock: Mutex<()>,
    applied: ArcSwapOption<CaptureConfig>,
    #[cfg(feature = "metrics")]
    metrics: Option<ReconcileMetrics>,
}

impl ApplyCoordinator {
    /// Create a coordinator merging over [`CaptureConfig::defaults`].
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        paths: LayerPaths,
        writer: Arc<dyn ConfigWriter>,
        restarter: RestartOrchestrator,
    ) -> Self {
        Self {
            store,
            paths,
            defaults: CaptureConfig::defaults(),
            writer,
            restarter,
            apply_lock: Mutex::new(()),
            applied: ArcSwapOption::empty(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Record reconcile metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The store layers are read from.
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Layer paths of this node.
    pub fn paths(&self) -> &LayerPaths {
        &self.paths
    }

    /// The restart orchestrator.
    pub fn restarter(&self) -> &RestartOrchestrator {
        &self.restarter
    }

    /// The last configuration an apply was attempted for, if any.
    ///
    /// Lock-free; never blocks on a pass in flight.
    pub fn applied(&self) -> Option<Arc<CaptureConfig>> {
        self.applied.load_full()
    }

    async fn read_layer(&self, scope: LayerScope) -> Result<(LayerScope, String, LayerState)> {
        let path = self.paths.path(scope);
        let state = match self.store.get(&path).await? {
            None => {
                debug!(%scope, %path, "Layer absent");
                LayerState::Missing
            }
            Some(data) => match CaptureConfig::from_layer_bytes(&data) {
                Ok(config) => LayerState::Present(ConfigLayer {
                    scope,
                    path: path.clone(),
                    config,
                }),
                Err(e) => {
                    let err = AgentError::MalformedLayer {
                        path: path.clone(),
                        reason: e.to_string(),
                    };
                    warn!(%scope, error = %err, "Ignoring malformed configuration layer");
                    #[cfg(feature = "metrics")]
                    {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_malformed_layer(scope.as_str());
                        }
                    }
                    LayerState::Malformed {
                        reason: e.to_string(),
                    }
                }
            },
        };
        Ok((scope, path, state))
    }

    /// Read all three layers and merge them, without applying anything.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::StoreUnavailable`] if any layer cannot be read.
    /// Missing and malformed layers are not errors.
    pub async fn resolve(&self) -> Result<Resolution> {
        let (global, cluster, node) = tokio::join!(
            self.read_layer(LayerScope::Global),
            self.read_layer(LayerScope::Cluster),
            self.read_layer(LayerScope::Node),
        );
        let layers = vec![global?, cluster?, node?];

        let config = {
            let layer = |scope: LayerScope| {
                layers.iter().find_map(|(s, _, state)| match state {
                    LayerState::Present(layer) if *s == scope => Some(&layer.config),
                    _ => None,
                })
            };
            ConfigMerger::resolve(
                &self.defaults,
                layer(LayerScope::Global),
                layer(LayerScope::Cluster),
                layer(LayerScope::Node),
            )
        };

        Ok(Resolution { config, layers })
    }

    /// Run one read, merge, compare and apply pass.
    ///
    /// # Errors
    ///
    /// Store and render failures end the pass with an error. A failed restart
    /// is logged and reported as `Applied { restarted: false }`.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let _guard = self.apply_lock.lock().await;

        #[cfg(feature = "metrics")]
        let timer = self.metrics.as_ref().map(|m| m.start_reconcile());

        let result = self.reconcile_locked().await;

        #[cfg(feature = "metrics")]
        {
            if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
                match &result {
                    Ok(ReconcileOutcome::Unchanged) => metrics.record_unchanged(timer),
                    Ok(ReconcileOutcome::Applied { restarted: true }) => {
                        metrics.record_applied(timer)
                    }
                    Ok(ReconcileOutcome::Applied { restarted: false }) => {
                        metrics.record_restart_failure(timer)
                    }
                    Err(AgentError::RenderFailure { .. }) => metrics.record_render_failure(timer),
                    Err(_) => metrics.record_failure(timer),
                }
                metrics.update_config_age();
            }
        }

        result
    }

    async fn reconcile_locked(&self) -> Result<ReconcileOutcome> {
        let resolution = self.resolve().await?;
        let previous = self.applied.load_full();

        if previous.as_deref() == Some(&resolution.config) {
            debug!(layers = resolution.present(), "Configuration unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        info!(
            cluster = %self.paths.cluster(),
            node_id = %self.paths.node_id(),
            layers = resolution.present(),
            first_apply = previous.is_none(),
            "Configuration changed, applying"
        );

        let config = Arc::new(resolution.config);
        self.applied.store(Some(Arc::clone(&config)));

        if let Err(e) = self.writer.write(&config) {
            error!(error = %e, "Render failed, processes left untouched");
            return Err(e);
        }

        match self.restarter.restart().await {
            Ok(()) => {
                info!("Configuration applied");
                Ok(ReconcileOutcome::Applied { restarted: true })
            }
            Err(e) => {
                error!(
                    error = %e,
                    phase = %self.restarter.phase(),
                    "Restart failed, new configuration is rendered but may not be running"
                );
                Ok(ReconcileOutcome::Applied { restarted: false })
            }
        }
    }
}

impl std::fmt::Debug for ApplyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyCoordinator")
            .field("store", &self.store.name())
            .field("paths", &self.paths)
            .field("restarter", &self.restarter)
            .field("applied", &self.applied.load().is_some())
            .finish()
    }
}
