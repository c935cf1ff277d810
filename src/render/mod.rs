//! Rendering of the capture process configuration file.
//!
//! The artifact is a Lua-style `yaf.init` file consumed by the capture
//! process and its flow processor. It is always published atomically: the
//! text goes to a temporary file next to the destination, which is then
//! renamed over it.

mod template;

pub use template::{RenderValues, bpf_filter};

use crate::core::CaptureConfig;
use crate::error::{AgentError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp format of the generation header.
const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Publishes a resolved configuration to wherever the capture process reads it.
pub trait ConfigWriter: Send + Sync {
    /// Write `config`, replacing any previous artifact atomically.
    ///
    /// # Errors
    ///
    /// On error the previously published artifact is left untouched.
    fn write(&self, config: &CaptureConfig) -> Result<()>;
}

/// Renders [`CaptureConfig`] into the capture process configuration file.
///
/// # Examples
///
/// ```rust
/// use capture_config_agent::core::CaptureConfig;
/// use capture_config_agent::render::Renderer;
///
/// let renderer = Renderer::new("/etc/yaf/yaf.init", "edge", "probe-3");
/// let text = renderer.render(&CaptureConfig::defaults(), "2024-01-01 00:00:00");
/// assert!(text.contains(r#"inf  = "eth0""#));
/// ```
#[derive(Debug, Clone)]
pub struct Renderer {
    path: PathBuf,
    cluster: String,
    node_id: String,
}

impl Renderer {
    /// Create a renderer publishing to `path` for the given node.
    pub fn new(
        path: impl Into<PathBuf>,
        cluster: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            cluster: cluster.into(),
            node_id: node_id.into(),
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Produce the artifact text with an explicit generation timestamp.
    ///
    /// Identical inputs always yield identical bytes.
    pub fn render(&self, config: &CaptureConfig, generated_at: &str) -> String {
        let values = RenderValues::from_config(config);
        template::render(&values, generated_at, &self.cluster, &self.node_id)
    }

    /// Produce the artifact text stamped with the current local time.
    pub fn render_now(&self, config: &CaptureConfig) -> String {
        let generated_at = chrono::Local::now().format(GENERATED_AT_FORMAT).to_string();
        self.render(config, &generated_at)
    }

    fn publish(&self, contents: &str) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".yaf.init.")
            .tempfile_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ConfigWriter for Renderer {
    fn write(&self, config: &CaptureConfig) -> Result<()> {
        let contents = self.render_now(config);

        tracing::info!(
            path = %self.path.display(),
            cluster = %self.cluster,
            node_id = %self.node_id,
            "Rendering capture configuration"
        );

        self.publish(&contents).map_err(|e| AgentError::RenderFailure {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            path = %self.path.display(),
            bytes = contents.len(),
            interface = %config.capture.interface,
            ipfix_port = config.capture.ipfix_port,
            output_fields = config.output.fields.len(),
            "Capture configuration published"
        );
        Ok(())
    }
}
