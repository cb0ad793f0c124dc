//! Typed error hierarchy for the workflow engine.
//!
//! Each subsystem gets its own enum:
//! - [`ConfigError`]: loading and parsing the YAML configuration files
//! - [`RegistryError`]: agent lookup failures on top of config errors
//! - [`ExecutorError`]: task execution failures surfaced by an executor
//! - [`DecodeError`]: structured agent output that cannot be decoded
//!
//! Workflow phase failures are not an error type: the orchestrator folds
//! them into the analysis state (status `Failed` plus an error entry)
//! rather than propagating them to callers.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to load a YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    Missing { path: PathBuf },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Agent registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent not found: {name}")]
    NotFound { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Task execution failures surfaced by an agent executor.
///
/// Deadline expiry and unparsable output are both folded into
/// `ExecutionFailed`; callers see a single failure shape per run.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor not configured for agent '{agent}'")]
    NotConfigured { agent: String },

    #[error("Task execution failed: {0}")]
    ExecutionFailed(#[source] anyhow::Error),
}

/// Structured agent output that cannot be decoded into a phase shape.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Agent response is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("Agent response JSON is not an object")]
    NotObject,

    #[error("Agent response field '{field}' has the wrong shape")]
    WrongShape { field: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_std_error<E: std::error::Error + Send + Sync + 'static>(_err: &E) {}

    #[test]
    fn test_config_missing_includes_path() {
        let err = ConfigError::Missing {
            path: PathBuf::from("/etc/verifact/agents.yaml"),
        };
        assert!(err.to_string().contains("/etc/verifact/agents.yaml"));
        assert_std_error(&err);
    }

    #[test]
    fn test_config_invalid_carries_parse_source() {
        let yaml_err = serde_yaml::from_str::<std::collections::HashMap<String, String>>("{{")
            .unwrap_err();
        let err = ConfigError::Invalid {
            path: PathBuf::from("agents.yaml"),
            source: yaml_err,
        };
        assert!(err.to_string().contains("agents.yaml"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_registry_not_found_display() {
        let err = RegistryError::NotFound {
            name: "fact_extractor".to_string(),
        };
        assert_eq!(err.to_string(), "Agent not found: fact_extractor");
    }

    #[test]
    fn test_registry_wraps_config_error() {
        let err: RegistryError = ConfigError::Missing {
            path: PathBuf::from("missing.yaml"),
        }
        .into();
        match err {
            RegistryError::Config(ConfigError::Missing { ref path }) => {
                assert_eq!(path, &PathBuf::from("missing.yaml"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_executor_not_configured_display() {
        let err = ExecutorError::NotConfigured {
            agent: "report_writer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Executor not configured for agent 'report_writer'"
        );
    }

    #[test]
    fn test_execution_failed_wraps_cause() {
        let err = ExecutorError::ExecutionFailed(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "Task execution failed: connection reset");
        assert_std_error(&err);
    }

    #[test]
    fn test_decode_not_json_from_serde() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DecodeError = parse_err.into();
        assert!(err.to_string().starts_with("Agent response is not valid JSON"));
    }

    #[test]
    fn test_decode_wrong_shape_names_field() {
        let err = DecodeError::WrongShape { field: "claims" };
        assert!(err.to_string().contains("claims"));
    }
}
