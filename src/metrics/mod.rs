//! OpenTelemetry metrics for reconcile passes.
//!
//! Enabled with the `metrics` feature. Attach a [`ReconcileMetrics`] to the
//! coordinator and every pass is counted by outcome, with its duration.
//!
//! # Examples
//!
//! ```rust,no_run
//! use capture_config_agent::metrics::ReconcileMetrics;
//! use opentelemetry::global;
//!
//! let metrics = ReconcileMetrics::new(global::meter("capture-config-agent"));
//! let timer = metrics.start_reconcile();
//! // ... reconcile ...
//! metrics.record_applied(timer);
//! ```

mod reconcile_metrics;

pub use reconcile_metrics::ReconcileMetrics;
