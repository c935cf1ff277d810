use super::{ProcessAction, ProcessManager};
use crate::core::settings::RestartSettings;
use crate::error::{AgentError, Result};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where a restart sequence currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    /// No restart in progress.
    Idle,
    /// Stopping the dependent process.
    StoppingDependent,
    /// Restarting the upstream process.
    RestartingUpstream,
    /// Waiting for the upstream listener to come up.
    Stabilizing,
    /// Starting the dependent process.
    StartingDependent,
    /// Waiting for the dependent process to connect.
    Settling,
    /// The last sequence did not complete.
    Failed,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestartPhase::Idle => "idle",
            RestartPhase::StoppingDependent => "stopping_dependent",
            RestartPhase::RestartingUpstream => "restarting_upstream",
            RestartPhase::Stabilizing => "stabilizing",
            RestartPhase::StartingDependent => "starting_dependent",
            RestartPhase::Settling => "settling",
            RestartPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Process names and delays of a restart sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    /// Process that owns the listener.
    pub upstream: String,
    /// Process that connects to the upstream.
    pub dependent: String,
    /// Delay after the upstream restart.
    pub stabilize: Duration,
    /// Delay after the dependent start.
    pub settle: Duration,
}

impl RestartPlan {
    /// Plan with no delays, for callers that do their own pacing.
    pub fn immediate(upstream: impl Into<String>, dependent: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            dependent: dependent.into(),
            stabilize: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

impl From<&RestartSettings> for RestartPlan {
    fn from(settings: &RestartSettings) -> Self {
        Self {
            upstream: settings.upstream.clone(),
            dependent: settings.dependent.clone(),
            stabilize: Duration::from_secs(settings.stabilize_secs),
            settle: Duration::from_secs(settings.settle_secs),
        }
    }
}

/// Restarts the upstream process without the dependent ever talking to a
/// dead listener.
///
/// The sequence is: stop dependent, restart upstream, wait `stabilize`,
/// start dependent, wait `settle`. A failed stop is only logged since the
/// dependent may simply not be running. If the upstream restart fails the
/// dependent is started again on a best-effort basis before the error is
/// returned.
pub struct RestartOrchestrator {
    manager: Arc<dyn ProcessManager>,
    plan: RestartPlan,
    phase: Mutex<RestartPhase>,
}

impl RestartOrchestrator {
    /// Create an orchestrator over `manager`.
    pub fn new(manager: Arc<dyn ProcessManager>, plan: RestartPlan) -> Self {
        Self {
            manager,
            plan,
            phase: Mutex::new(RestartPhase::Idle),
        }
    }

    /// The plan in use.
    pub fn plan(&self) -> &RestartPlan {
        &self.plan
    }

    /// The underlying process manager.
    pub fn manager(&self) -> &Arc<dyn ProcessManager> {
        &self.manager
    }

    /// Current phase. [`RestartPhase::Failed`] persists until the next run.
    pub fn phase(&self) -> RestartPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(RestartPhase::Failed)
    }

    fn enter(&self, next: RestartPhase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
        debug!(phase = %next, "Restart phase");
    }

    async fn run(&self, action: ProcessAction, target: &str) -> Result<()> {
        let output = self.manager.control(action, target).await?;
        if output.success {
            info!(
                %action,
                process = target,
                output = %output.output,
                "Process manager command succeeded"
            );
            Ok(())
        } else {
            Err(AgentError::RestartFailure {
                action: action.as_str(),
                target: target.to_string(),
                output: output.output,
            })
        }
    }

    /// Run the full restart sequence.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the upstream restart or the dependent
    /// start.
    pub async fn restart(&self) -> Result<()> {
        let RestartPlan {
            upstream,
            dependent,
            stabilize,
            settle,
        } = &self.plan;

        info!(%upstream, %dependent, "Restarting capture processes");

        self.enter(RestartPhase::StoppingDependent);
        if let Err(e) = self.run(ProcessAction::Stop, dependent).await {
            warn!(error = %e, %dependent, "Failed to stop dependent process, continuing");
        }

        self.enter(RestartPhase::RestartingUpstream);
        if let Err(e) = self.run(ProcessAction::Restart, upstream).await {
            error!(error = %e, %upstream, "Failed to restart upstream process");
            if let Err(start_err) = self.run(ProcessAction::Start, dependent).await {
                error!(error = %start_err, %dependent, "Failed to start dependent process again");
            }
            self.enter(RestartPhase::Failed);
            return Err(e);
        }

        self.enter(RestartPhase::Stabilizing);
        tokio::time::sleep(*stabilize).await;

        self.enter(RestartPhase::StartingDependent);
        if let Err(e) = self.run(ProcessAction::Start, dependent).await {
            error!(error = %e, %dependent, "Failed to start dependent process");
            self.enter(RestartPhase::Failed);
            return Err(e);
        }

        self.enter(RestartPhase::Settling);
        tokio::time::sleep(*settle).await;

        self.enter(RestartPhase::Idle);
        info!(%upstream, %dependent, "Capture processes restarted");
        Ok(())
    }
}

impl fmt::Debug for RestartOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartOrchestrator")
            .field("manager", &self.manager.name())
            .field("plan", &self.plan)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::CommandOutput;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::time::Instant;

    /// Records every call with the (paused) time it was made at.
    #[derive(Default)]
    struct RecordingManager {
        calls: Mutex<Vec<(String, Instant)>>,
        refuse: HashSet<(ProcessAction, &'static str)>,
    }

    impl RecordingManager {
        fn refusing(refuse: &[(ProcessAction, &'static str)]) -> Self {
            Self {
                refuse: refuse.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl ProcessManager for RecordingManager {
        async fn control(&self, action: ProcessAction, target: &str) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((format!("{} {}", action, target), Instant::now()));
            if self.refuse.iter().any(|(a, t)| *a == action && *t == target) {
                Ok(CommandOutput::failed(format!("{}: ERROR", target)))
            } else {
                Ok(CommandOutput::ok(format!("{}: ok", target)))
            }
        }

        async fn status(&self, target: &str) -> Result<CommandOutput> {
            Ok(CommandOutput::ok(format!("{} RUNNING", target)))
        }

        async fn ping(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn plan() -> RestartPlan {
        RestartPlan {
            upstream: "yaf".to_string(),
            dependent: "pipeline".to_string(),
            stabilize: Duration::from_secs(5),
            settle: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_order_and_delays() {
        let manager = Arc::new(RecordingManager::default());
        let orchestrator = RestartOrchestrator::new(manager.clone(), plan());

        let started = Instant::now();
        orchestrator.restart().await.unwrap();

        assert_eq!(
            manager.calls(),
            vec!["stop pipeline", "restart yaf", "start pipeline"]
        );
        let times = manager.times();
        assert!(times[2] - times[1] >= Duration::from_secs(5));
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(orchestrator.phase(), RestartPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_failure_continues() {
        let manager = Arc::new(RecordingManager::refusing(&[(ProcessAction::Stop, "pipeline")]));
        let orchestrator = RestartOrchestrator::new(manager.clone(), plan());

        orchestrator.restart().await.unwrap();
        assert_eq!(
            manager.calls(),
            vec!["stop pipeline", "restart yaf", "start pipeline"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_restores_dependent() {
        let manager = Arc::new(RecordingManager::refusing(&[(ProcessAction::Restart, "yaf")]));
        let orchestrator = RestartOrchestrator::new(manager.clone(), plan());

        let err = orchestrator.restart().await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::RestartFailure { action: "restart", .. }
        ));
        assert_eq!(
            manager.calls(),
            vec!["stop pipeline", "restart yaf", "start pipeline"]
        );
        assert_eq!(orchestrator.phase(), RestartPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependent_start_failure() {
        let manager = Arc::new(RecordingManager::refusing(&[(ProcessAction::Start, "pipeline")]));
        let orchestrator = RestartOrchestrator::new(manager.clone(), plan());

        let err = orchestrator.restart().await.unwrap_err();
        assert!(matches!(err, AgentError::RestartFailure { action: "start", .. }));
        assert_eq!(orchestrator.phase(), RestartPhase::Failed);
    }

    #[tokio::test]
    async fn test_immediate_plan() {
        let manager = Arc::new(RecordingManager::default());
        let orchestrator =
            RestartOrchestrator::new(manager.clone(), RestartPlan::immediate("yaf", "pipeline"));
        orchestrator.restart().await.unwrap();
        assert_eq!(manager.calls().len(), 3);
    }

    #[test]
    fn test_plan_from_settings() {
        let settings = crate::core::AgentSettings::default();
        let plan = RestartPlan::from(&settings.restart);
        assert_eq!(plan.stabilize, Duration::from_secs(5));
        assert_eq!(plan.settle, Duration::from_secs(2));
        assert_eq!(plan.upstream, "yaf");
    }
}
