//! Unified error type hierarchy for the pinned panel controller
//!
//! Provides structured error handling with LocateError, SequencerError, HostError,
//! DescriptorError, ConfigError and ReadinessError. None of these ever reach the
//! end user directly: the control loop logs them and the only visible symptom is
//! that the panel does not switch.

use std::io;
use thiserror::Error;

use crate::models::PanelKind;

/// Element lookup errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("No node matched '{descriptor}' after {attempts} attempts")]
    NotFound { descriptor: String, attempts: u32 },
}

/// Errors reported by the host tree abstraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Unknown node id: {0}")]
    UnknownNode(usize),

    #[error("Node {0} is detached from the tree")]
    Detached(usize),

    #[error("Host rejected activation: {0}")]
    ActivationRejected(String),

    #[error("Node cannot be observed: {0}")]
    NotObservable(String),
}

/// Descriptor parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Descriptor is empty")]
    Empty,

    #[error("Unsupported descriptor syntax: '{0}'")]
    Unsupported(String),
}

/// Action Sequencer errors.
///
/// `NotFound` and `Unconfirmed` are soft failures recorded in a sequence report;
/// `ConcurrentCallRejected` and `CooldownActive` are returned by the controller's
/// entry points when a run is refused outright.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequencerError {
    #[error("Activator lookup failed: {0}")]
    NotFound(#[from] LocateError),

    #[error("Activation of {expected} was not confirmed (observed: {observed:?})")]
    Unconfirmed {
        expected: PanelKind,
        observed: Option<PanelKind>,
    },

    #[error("Sequencer already running; call rejected")]
    ConcurrentCallRejected,

    #[error("Action cooldown active for another {remaining_ms}ms")]
    CooldownActive { remaining_ms: u64 },

    #[error("Activation failed: {0}")]
    ActivationFailed(#[from] HostError),
}

/// Configuration and preference persistence errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in preference store: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid TOML in controller config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

impl From<DescriptorError> for ConfigError {
    fn from(e: DescriptorError) -> Self {
        ConfigError::ValidationFailed(e.to_string())
    }
}

/// Host readiness errors. Only produced when a readiness ceiling is configured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("Host not ready after {waited_ms}ms")]
    Timeout { waited_ms: u64 },
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_error_display() {
        let err = LocateError::NotFound {
            descriptor: "button[aria-label=\"Queue\"]".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "No node matched 'button[aria-label=\"Queue\"]' after 3 attempts"
        );
    }

    #[test]
    fn test_sequencer_error_from_locate() {
        let err: SequencerError = LocateError::NotFound {
            descriptor: "x".to_string(),
            attempts: 1,
        }
        .into();
        assert!(matches!(err, SequencerError::NotFound(_)));
    }

    #[test]
    fn test_descriptor_error_into_config_error() {
        let err: ConfigError = DescriptorError::Unsupported("div > div".to_string()).into();
        assert!(err.to_string().contains("div > div"));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err("test error".into());
        assert!(result.is_err());
    }
}
