use super::{CommandOutput, ProcessAction, ProcessManager};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Upper bound on a `status` or `pid` query.
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// [`ProcessManager`] backed by the `supervisorctl` command line tool.
///
/// `start`, `stop` and `restart` run until `supervisorctl` returns: the
/// restart sequence relies on each step having finished before the next one
/// is issued. Only `status` and `pid` queries are bounded.
#[derive(Debug, Clone)]
pub struct SupervisorCtl {
    program: String,
    config: Option<PathBuf>,
    query_timeout: Duration,
}

impl SupervisorCtl {
    /// Use `program` (usually just `supervisorctl`), optionally pointed at a
    /// specific supervisor configuration file.
    pub fn new(program: impl Into<String>, config: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Override the timeout of `status` and `pid` queries.
    pub fn with_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    fn command(&self, args: &[&str], bounded: bool) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(config) = &self.config {
            command.arg("-c").arg(config);
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(bounded);
        command
    }

    async fn run(
        &self,
        action: &'static str,
        args: &[&str],
        limit: Option<Duration>,
    ) -> Result<CommandOutput> {
        debug!(program = %self.program, ?args, ?limit, "Invoking process manager");

        let target = args.last().copied().unwrap_or_default().to_string();
        let child = self
            .command(args, limit.is_some())
            .spawn()
            .map_err(|e| AgentError::RestartFailure {
                action,
                target: target.clone(),
                output: format!("failed to run {}: {}", self.program, e),
            })?;

        let waited = match limit {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    return Err(AgentError::RestartFailure {
                        action,
                        target,
                        output: format!("timed out after {:?}", limit),
                    });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|e| AgentError::RestartFailure {
            action,
            target,
            output: e.to_string(),
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        // supervisorctl exits 0 on some failures; the reply text is authoritative.
        let refused = text.contains("ERROR") || text.contains("FATAL");
        Ok(CommandOutput {
            success: output.status.success() && !refused,
            output: text,
        })
    }
}

impl Default for SupervisorCtl {
    fn default() -> Self {
        Self::new("supervisorctl", None)
    }
}

#[async_trait]
impl ProcessManager for SupervisorCtl {
    async fn control(&self, action: ProcessAction, target: &str) -> Result<CommandOutput> {
        self.run(action.as_str(), &[action.as_str(), target], None)
            .await
    }

    async fn status(&self, target: &str) -> Result<CommandOutput> {
        let output = self
            .run("status", &["status", target], Some(self.query_timeout))
            .await?;
        // `status` exits non-zero for stopped programs; the text is still the answer.
        Ok(CommandOutput::ok(output.output))
    }

    async fn ping(&self) -> bool {
        match self.run("pid", &["pid"], Some(self.query_timeout)).await {
            Ok(output) => output.success,
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "supervisorctl"
    }
}
