//! MCP server configuration files.
//!
//! The agent receives the path unchanged via `--mcp-config`; this module only
//! checks that the file exists and has the expected shape before a process
//! is spawned.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level MCP configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    /// Named tool servers.
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServer>,
    /// Other fields we preserve but don't interpret.
    #[serde(flatten)]
    pub other: HashMap<String, serde_json::Value>,
}

/// A single MCP server entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    /// Executable for stdio servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Transport-specific fields (`type`, `url`, ...).
    #[serde(flatten)]
    pub other: HashMap<String, serde_json::Value>,
}

impl McpConfig {
    /// Load and validate an MCP configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the file is missing, is not valid JSON,
    /// or lacks an object-valued `mcpServers` key.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::validation(format!(
                "MCP configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!(
                "Failed to read MCP configuration file {}: {e}",
                path.display()
            ))
        })?;

        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            Error::validation(format!(
                "Invalid JSON in MCP configuration file {}: {e}",
                path.display()
            ))
        })?;

        let has_servers = value
            .as_object()
            .and_then(|obj| obj.get("mcpServers"))
            .is_some_and(serde_json::Value::is_object);
        if !has_servers {
            return Err(Error::validation(format!(
                "Invalid MCP configuration file {}: expected an object with `mcpServers`",
                path.display()
            )));
        }

        serde_json::from_value(value).map_err(|e| {
            Error::validation(format!(
                "Invalid MCP configuration file {}: {e}",
                path.display()
            ))
        })
    }

    /// Server names in sorted order.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.mcp_servers.keys().map(String::as_str)
    }
}
