//! Tool and session management for agents.
//!
//! Two concerns live here: the static role-to-tools table, and a cache of
//! long-lived HTTP sessions to external tool servers. Sessions are created
//! lazily on first request and reused for the life of the provider;
//! creation is serialized behind an async mutex so concurrent analyses
//! cannot race duplicate sessions into existence.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::models::AgentRole;

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// One tool server entry from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolServerConfig {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// File shape: a top-level `tool_servers:` table keyed by server name.
#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    tool_servers: HashMap<String, ToolServerConfig>,
}

/// A live connection to one tool server.
#[derive(Debug, Clone)]
pub struct ToolSession {
    pub base_url: String,
    pub client: reqwest::Client,
}

/// Lazily-built cache of tool server sessions plus the role/tool table.
pub struct SessionProvider {
    servers: HashMap<String, ToolServerConfig>,
    sessions: tokio::sync::Mutex<HashMap<String, ToolSession>>,
}

impl SessionProvider {
    /// Load server definitions from a YAML file. No sessions are opened
    /// until the first `get_session` call.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ServersFile =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(count = file.tool_servers.len(), "Loaded tool server configurations");
        Ok(SessionProvider {
            servers: file.tool_servers,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Get or create the session for a named server.
    ///
    /// Returns `Ok(None)` when the server is not configured; callers must
    /// handle absence rather than treat it as a failure.
    pub async fn get_session(&self, server_name: &str) -> Result<Option<ToolSession>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(server_name) {
            return Ok(Some(existing.clone()));
        }
        let Some(config) = self.servers.get(server_name) else {
            tracing::warn!(server = server_name, "Server not found");
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(SESSION_TIMEOUT)
            .build()
            .with_context(|| format!("Failed to build HTTP client for server '{server_name}'"))?;
        let session = ToolSession {
            base_url: config.url.clone(),
            client,
        };
        sessions.insert(server_name.to_string(), session.clone());
        tracing::debug!(server = server_name, "Created session");
        Ok(Some(session))
    }

    /// Drop every open session. Safe to call repeatedly, including when no
    /// session was ever opened.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        let count = sessions.len();
        sessions.clear();
        tracing::info!(count, "Closed all tool server sessions");
    }

    /// Number of sessions currently open.
    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Number of configured servers, open or not.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Tool names available to an agent, by role name.
    ///
    /// The root coordinator gets the "all" marker; unknown role names get
    /// no tools. This mapping is fixed configuration, not logic.
    pub fn agent_tools(&self, role: &str) -> &'static [&'static str] {
        let Ok(role) = role.parse::<AgentRole>() else {
            return &[];
        };
        match role {
            AgentRole::Root => &["all"],
            AgentRole::DocumentProcessor => &["read_file", "list_directory"],
            AgentRole::FactExtractor => &["read_file", "search"],
            AgentRole::VerificationSpecialist => &["search", "query_health_data"],
            AgentRole::ReportWriter => &["write_file", "create_issue"],
            AgentRole::QualityReviewer => &["read_file", "search"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with(contents: &str) -> SessionProvider {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_servers.yaml");
        std::fs::write(&path, contents).unwrap();
        SessionProvider::load(&path).unwrap()
    }

    #[tokio::test]
    async fn test_get_session_creates_then_reuses() {
        let provider = provider_with(
            "tool_servers:\n  health_data:\n    url: http://localhost:9000\n",
        );
        assert_eq!(provider.open_sessions().await, 0);
        let first = provider.get_session("health_data").await.unwrap().unwrap();
        assert_eq!(first.base_url, "http://localhost:9000");
        assert_eq!(provider.open_sessions().await, 1);
        let second = provider.get_session("health_data").await.unwrap().unwrap();
        assert_eq!(second.base_url, first.base_url);
        assert_eq!(provider.open_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_server_returns_none() {
        let provider = provider_with("tool_servers: {}\n");
        assert!(provider.get_session("nowhere").await.unwrap().is_none());
        assert_eq!(provider.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let provider = provider_with(
            "tool_servers:\n  search:\n    url: http://localhost:9100\n",
        );
        provider.close_all().await;
        provider.get_session("search").await.unwrap().unwrap();
        assert_eq!(provider.open_sessions().await, 1);
        provider.close_all().await;
        provider.close_all().await;
        assert_eq!(provider.open_sessions().await, 0);
    }

    #[test]
    fn test_missing_config_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(matches!(
            SessionProvider::load(&path),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn test_server_count_reflects_config() {
        let provider = provider_with(
            "tool_servers:\n  search:\n    url: http://localhost:9100\n  health_data:\n    url: http://localhost:9000\n",
        );
        assert_eq!(provider.server_count(), 2);
        assert_eq!(provider_with("tool_servers: {}\n").server_count(), 0);
    }

    #[test]
    fn test_agent_tools_table() {
        let provider = provider_with("tool_servers: {}\n");
        assert_eq!(provider.agent_tools("root"), &["all"]);
        assert_eq!(
            provider.agent_tools("document_processor"),
            &["read_file", "list_directory"]
        );
        assert_eq!(
            provider.agent_tools("verification_specialist"),
            &["search", "query_health_data"]
        );
        assert_eq!(
            provider.agent_tools("report_writer"),
            &["write_file", "create_issue"]
        );
        assert_eq!(provider.agent_tools("quality_reviewer"), &["read_file", "search"]);
        assert!(provider.agent_tools("unknown_role").is_empty());
    }
}
