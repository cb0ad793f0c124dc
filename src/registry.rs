//! Agent registry.
//!
//! Loads named agent definitions from a YAML file once, at startup, and
//! serves lookups by name for the rest of the process lifetime. A missing
//! or malformed file is fatal to orchestrator construction; an unknown
//! agent name at lookup time is a [`RegistryError::NotFound`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{ConfigError, RegistryError};

const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-0";

/// One agent entry from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    /// Model identifier the agent runs on.
    #[serde(default = "default_model")]
    pub model: String,
    /// System instruction text handed to the underlying runner.
    #[serde(default)]
    pub instruction: String,
    /// Names of agents this one may delegate to.
    #[serde(default)]
    pub sub_agents: Vec<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// File shape: a top-level `agents:` table keyed by agent name.
#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: HashMap<String, AgentDefinition>,
}

/// Read-only lookup table of agent definitions.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    /// Load the registry from a YAML file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            }
            .into());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: AgentsFile =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(count = file.agents.len(), "Loaded agent definitions");
        Ok(AgentRegistry {
            agents: file.agents,
        })
    }

    /// Look up one agent definition by name.
    pub fn get(&self, name: &str) -> Result<&AgentDefinition, RegistryError> {
        self.agents.get(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })
    }

    /// The model a named agent runs on. Fails only when the agent itself
    /// is unknown; the model string is always present (defaulted at load).
    pub fn model(&self, name: &str) -> Result<&str, RegistryError> {
        Ok(&self.get(name)?.model)
    }

    /// Names of the agents a named agent may delegate to.
    pub fn sub_agents(&self, name: &str) -> Result<&[String], RegistryError> {
        Ok(&self.get(name)?.sub_agents)
    }

    /// Iterate over configured agent names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Iterate over (name, definition) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentDefinition)> {
        self.agents.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
