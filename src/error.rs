//! Error types for capture-config-agent.

use std::fmt;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while resolving and applying capture configuration.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The coordination store could not be reached or answered with an error.
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A layer payload could not be decoded.
    #[error("Malformed configuration layer at '{path}': {reason}")]
    MalformedLayer {
        /// Store path of the layer
        path: String,
        /// Decoder message
        reason: String,
    },

    /// Writing or publishing the rendered process configuration failed.
    #[error("Failed to render configuration to '{path}': {reason}")]
    RenderFailure {
        /// Destination path of the artifact
        path: String,
        /// What went wrong
        reason: String,
    },

    /// A process manager operation failed or could not be issued.
    #[error("Failed to {action} '{target}': {output}")]
    RestartFailure {
        /// Process manager action that failed
        action: &'static str,
        /// Process target name
        target: String,
        /// Captured output or spawn error
        output: String,
    },

    /// Agent settings could not be loaded.
    #[error("Failed to load agent settings: {0}")]
    SettingsError(String),

    /// Agent settings were loaded but are unusable.
    #[error("Invalid agent settings: {0}")]
    InvalidSettings(#[from] ValidationError),

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization failed outside of layer decoding.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors reported by a coordination store client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No live session with the store.
    #[error("not connected")]
    NotConnected,

    /// The path is not a valid store path.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// Backend specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Validation error for agent settings.
#[derive(Debug)]
pub enum ValidationError {
    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::Multiple(vec![
            ValidationError::invalid_field("cluster", "must not be empty"),
            ValidationError::invalid_field("watch.idle_timeout_secs", "must be greater than 0"),
        ]);
        let text = err.to_string();
        assert!(text.contains("1. Field 'cluster' is invalid"));
        assert!(text.contains("2. Field 'watch.idle_timeout_secs'"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: AgentError = StoreError::NotConnected.into();
        assert!(matches!(err, AgentError::StoreUnavailable(StoreError::NotConnected)));
        assert_eq!(err.to_string(), "Coordination store unavailable: not connected");
    }
}
