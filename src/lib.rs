//! # capture-config-agent
//!
//! Node-side agent that keeps a packet capture process configured from a
//! shared coordination store.
//!
//! ## Overview
//!
//! Configuration is published as three JSON layers (global, cluster, node).
//! The agent watches all three, merges them over compiled-in defaults, and
//! when the result differs from what it last applied:
//! - renders the capture process configuration file atomically
//! - restarts the capture process and its dependent flow processor in
//!   dependency order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capture_config_agent::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> capture_config_agent::error::Result<()> {
//! let settings = AgentSettings::builder()
//!     .with_file("/etc/capture-config-agent/agent.toml")
//!     .with_env_overrides("AGENT", "__")
//!     .load()?;
//!
//! let store = Arc::new(MemoryStore::new());
//! let paths = LayerPaths::new(&settings.store.base_path, &settings.cluster, &settings.node_id);
//! let renderer = Arc::new(Renderer::new(&settings.output_path, &settings.cluster, &settings.node_id));
//! let supervisor = Arc::new(SupervisorCtl::new(&settings.restart.supervisorctl, None));
//! let restarter = RestartOrchestrator::new(supervisor, RestartPlan::from(&settings.restart));
//!
//! let coordinator = Arc::new(ApplyCoordinator::new(store, paths, renderer, restarter));
//! ChangeWatcher::new(coordinator)
//!     .with_idle_timeout(settings.idle_timeout())
//!     .run(async { tokio::signal::ctrl_c().await.ok(); })
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `fs-store` (default): directory-tree coordination store watched with `notify`
//! - `metrics`: OpenTelemetry reconcile metrics

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod render;
pub mod store;
pub mod supervisor;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        AgentSettings, ApplyCoordinator, CaptureConfig, ConfigMerger, LayerScope,
        ReconcileOutcome,
    };
    pub use crate::error::{AgentError, Result};
    pub use crate::notify::ChangeWatcher;
    pub use crate::render::{ConfigWriter, Renderer};
    pub use crate::store::{CoordinationStore, LayerPaths, MemoryStore};
    pub use crate::supervisor::{ProcessManager, RestartOrchestrator, RestartPlan, SupervisorCtl};

    #[cfg(feature = "fs-store")]
    pub use crate::store::FsStore;
}
