use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Counters and timings of the apply loop.
#[derive(Clone)]
pub struct ReconcileMetrics {
    attempts: Counter<u64>,
    outcomes: Counter<u64>,
    malformed_layers: Counter<u64>,
    duration: Histogram<f64>,
    config_age_seconds: Gauge<i64>,
    last_applied: Arc<parking_lot::Mutex<Option<Instant>>>,
}

impl ReconcileMetrics {
    /// Create the instruments on `meter`.
    pub fn new(meter: Meter) -> Self {
        let attempts = meter
            .u64_counter("capture_config_agent.reconcile.attempts")
            .with_description("Total number of reconcile passes")
            .build();

        let outcomes = meter
            .u64_counter("capture_config_agent.reconcile.outcomes")
            .with_description("Reconcile passes by outcome")
            .build();

        let malformed_layers = meter
            .u64_counter("capture_config_agent.layer.malformed")
            .with_description("Layers ignored because they could not be decoded")
            .build();

        let duration = meter
            .f64_histogram("capture_config_agent.reconcile.duration")
            .with_description("Duration of reconcile passes in seconds")
            .with_unit("s")
            .build();

        let config_age_seconds = meter
            .i64_gauge("capture_config_agent.config.age")
            .with_description("Time since the last applied configuration in seconds")
            .with_unit("s")
            .build();

        Self {
            attempts,
            outcomes,
            malformed_layers,
            duration,
            config_age_seconds,
            last_applied: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Count a pass and start its timer.
    pub fn start_reconcile(&self) -> Instant {
        self.attempts.add(1, &[]);
        Instant::now()
    }

    fn finish(&self, start: Instant, outcome: &'static str) {
        let attrs = [KeyValue::new("outcome", outcome)];
        self.outcomes.add(1, &attrs);
        self.duration.record(start.elapsed().as_secs_f64(), &attrs);
    }

    /// The resolved configuration matched the last applied one.
    pub fn record_unchanged(&self, start: Instant) {
        self.finish(start, "unchanged");
    }

    /// A new configuration was rendered and the processes restarted.
    pub fn record_applied(&self, start: Instant) {
        self.finish(start, "applied");
        *self.last_applied.lock() = Some(Instant::now());
    }

    /// Rendered, but the restart sequence failed.
    pub fn record_restart_failure(&self, start: Instant) {
        self.finish(start, "restart_failed");
        *self.last_applied.lock() = Some(Instant::now());
    }

    /// Rendering the new configuration failed.
    pub fn record_render_failure(&self, start: Instant) {
        self.finish(start, "render_failed");
    }

    /// The pass failed before anything was applied.
    pub fn record_failure(&self, start: Instant) {
        self.finish(start, "failed");
    }

    /// A layer was skipped as malformed.
    pub fn record_malformed_layer(&self, scope: &'static str) {
        self.malformed_layers.add(1, &[KeyValue::new("scope", scope)]);
    }

    /// Publish the age of the applied configuration; nothing is recorded
    /// before the first apply.
    pub fn update_config_age(&self) {
        if let Some(at) = *self.last_applied.lock() {
            self.config_age_seconds.record(at.elapsed().as_secs() as i64, &[]);
        }
    }
}
