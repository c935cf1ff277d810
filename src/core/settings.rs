//! Agent runtime settings.
//!
//! Settings are layered with the usual precedence: compiled defaults, then an
//! optional settings file, then environment variables, then explicit
//! overrides (usually from the command line).

use crate::error::{AgentError, Result, ValidationError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which coordination store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Directory tree on the local filesystem.
    Fs,
    /// Ephemeral in-process store.
    Memory,
}

/// Coordination store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Backend.
    pub kind: StoreKind,
    /// Root directory of the `fs` backend.
    pub root: PathBuf,
    /// Namespace root of the layer paths.
    pub base_path: String,
}

/// Change watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Seconds without any event before all watches are re-armed.
    pub idle_timeout_secs: u64,
}

/// Process restart settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartSettings {
    /// Process that owns the capture listener and is restarted.
    pub upstream: String,
    /// Process that connects to the upstream; stopped first, started last.
    pub dependent: String,
    /// Seconds to wait after the upstream restart before starting the dependent.
    pub stabilize_secs: u64,
    /// Seconds to wait after the dependent started.
    pub settle_secs: u64,
    /// Process manager control program.
    pub supervisorctl: String,
    /// Optional process manager configuration file.
    pub supervisor_config: Option<PathBuf>,
}

/// Complete agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Cluster this node belongs to.
    pub cluster: String,
    /// Node identity within the cluster.
    pub node_id: String,
    /// Where the rendered capture configuration is written.
    pub output_path: PathBuf,
    /// Store settings.
    pub store: StoreSettings,
    /// Watch settings.
    pub watch: WatchSettings,
    /// Restart settings.
    pub restart: RestartSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cluster: "default".to_string(),
            node_id: "node-1".to_string(),
            output_path: PathBuf::from("/etc/yaf/yaf.init"),
            store: StoreSettings {
                kind: StoreKind::Fs,
                root: PathBuf::from("/var/lib/capture-config-agent/store"),
                base_path: "/xnta/yaf-config".to_string(),
            },
            watch: WatchSettings {
                idle_timeout_secs: 30,
            },
            restart: RestartSettings {
                upstream: "yaf".to_string(),
                dependent: "pipeline".to_string(),
                stabilize_secs: 5,
                settle_secs: 2,
                supervisorctl: "supervisorctl".to_string(),
                supervisor_config: None,
            },
        }
    }
}

impl AgentSettings {
    /// Create a loader for layered settings.
    pub fn builder() -> SettingsLoader {
        SettingsLoader::new()
    }

    /// Idle re-arm interval of the watcher.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.watch.idle_timeout_secs)
    }

    /// Check the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [("cluster", &self.cluster), ("node_id", &self.node_id)] {
            if value.is_empty() {
                errors.push(ValidationError::invalid_field(field, "must not be empty"));
            } else if value.contains('/') {
                errors.push(ValidationError::invalid_field(field, "must not contain '/'"));
            }
        }
        if !self.store.base_path.starts_with('/') {
            errors.push(ValidationError::invalid_field(
                "store.base_path",
                "must be an absolute store path",
            ));
        }
        if self.output_path.file_name().is_none() {
            errors.push(ValidationError::invalid_field(
                "output_path",
                "must name a file",
            ));
        }
        if self.watch.idle_timeout_secs == 0 {
            errors.push(ValidationError::invalid_field(
                "watch.idle_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.restart.upstream.is_empty() || self.restart.dependent.is_empty() {
            errors.push(ValidationError::invalid_field(
                "restart",
                "upstream and dependent process names must not be empty",
            ));
        } else if self.restart.upstream == self.restart.dependent {
            errors.push(ValidationError::invalid_field(
                "restart",
                "upstream and dependent must be different processes",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

/// Loads [`AgentSettings`] from defaults, an optional file, the environment
/// and explicit overrides, in increasing precedence.
///
/// # Examples
///
/// ```rust,no_run
/// use capture_config_agent::core::AgentSettings;
///
/// # fn example() -> capture_config_agent::error::Result<()> {
/// let settings = AgentSettings::builder()
///     .with_file("/etc/capture-config-agent/agent.toml")
///     .with_env_overrides("AGENT", "__")
///     .with_override("node_id", "probe-7")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    env_prefix: Option<String>,
    env_separator: Option<String>,
    overrides: Vec<(String, String)>,
}

impl SettingsLoader {
    /// Create a loader that yields the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a settings file; format is detected from the extension. A missing
    /// file is not an error.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Read environment variables such as `AGENT_NODE_ID` or
    /// `AGENT_RESTART__UPSTREAM`.
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.env_separator = Some(separator.to_string());
        self
    }

    /// Force a single key (dotted path) to a value.
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Load and validate the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed, or if the
    /// resulting settings fail validation.
    pub fn load(self) -> Result<AgentSettings> {
        let defaults = Config::try_from(&AgentSettings::default())
            .map_err(|e| AgentError::SettingsError(format!("Failed to encode defaults: {}", e)))?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.file {
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }

        if let (Some(prefix), Some(separator)) = (&self.env_prefix, &self.env_separator) {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator(separator)
                    .try_parsing(true),
            );
        }

        for (key, value) in &self.overrides {
            builder = builder.set_override(key.as_str(), value.as_str()).map_err(|e| {
                AgentError::SettingsError(format!("Failed to apply override '{}': {}", key, e))
            })?;
        }

        let settings: AgentSettings = builder
            .build()
            .map_err(|e| AgentError::SettingsError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AgentError::SettingsError(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }
}
