//! Process manager integration.
//!
//! [`ProcessManager`] is the seam to whatever supervises the capture process
//! and its dependent flow processor. [`SupervisorCtl`] drives `supervisorctl`;
//! [`RestartOrchestrator`] sequences the stop/restart/start protocol on top
//! of any implementation.

mod orchestrator;
mod supervisorctl;

pub use orchestrator::{RestartOrchestrator, RestartPhase, RestartPlan};
pub use supervisorctl::SupervisorCtl;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Control verbs understood by the process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessAction {
    /// Start a stopped process.
    Start,
    /// Stop a running process.
    Stop,
    /// Stop then start a process.
    Restart,
}

impl ProcessAction {
    /// Verb as passed on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessAction::Start => "start",
            ProcessAction::Stop => "stop",
            ProcessAction::Restart => "restart",
        }
    }
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the process manager answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process manager reported success.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    /// Successful answer with the given text.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Failed answer with the given text.
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Something that can start, stop and restart named processes.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Run `action` against `target`.
    ///
    /// # Errors
    ///
    /// `Err` means the process manager could not be asked at all. A refusal
    /// is reported through [`CommandOutput::success`].
    async fn control(&self, action: ProcessAction, target: &str) -> Result<CommandOutput>;

    /// Human-readable status of `target`.
    async fn status(&self, target: &str) -> Result<CommandOutput>;

    /// Whether the process manager answers at all.
    async fn ping(&self) -> bool;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}
