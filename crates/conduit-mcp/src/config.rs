//! Configuration types for MCP servers.

use conduit_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

fn default_timeout() -> u64 {
    30_000
}

fn default_init_timeout() -> u64 {
    30_000
}

fn default_shutdown_grace() -> u64 {
    5_000
}

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

/// Configuration for a single stdio MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process (inherited when unset).
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Timeout for a single request in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Upper bound on the whole initialization handshake (default: 30000).
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,
    /// How long the child gets to exit after stdin closes before it is killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout_ms: default_timeout(),
            init_timeout_ms: default_init_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeouts(mut self, timeout_ms: u64, init_timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self.init_timeout_ms = init_timeout_ms;
        self
    }

    pub fn with_shutdown_grace(mut self, grace_ms: u64) -> Self {
        self.shutdown_grace_ms = grace_ms;
        self
    }
}

/// One entry of an `mcpServers` JSON document.
#[derive(Debug, Deserialize)]
struct JsonServerEntry {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonServersFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: Option<BTreeMap<String, JsonServerEntry>>,
}

impl McpConfig {
    /// Parse a JSON document of the form `{"mcpServers": {"name": {...}}}`.
    ///
    /// URL-based entries are skipped: only the stdio transport is supported.
    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: JsonServersFile = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;

        let mut servers = BTreeMap::new();
        for (name, entry) in file.mcp_servers.unwrap_or_default() {
            match (entry.command, entry.url) {
                (Some(command), _) => {
                    let mut server = McpServerConfig::new(command).with_args(entry.args);
                    server.env = entry.env.unwrap_or_default();
                    server.cwd = entry.cwd;
                    if let Some(timeout_ms) = entry.timeout_ms {
                        server.timeout_ms = timeout_ms;
                    }
                    servers.insert(name, server);
                }
                (None, Some(url)) => {
                    tracing::warn!(
                        "Skipping MCP server '{name}' ({url}): only stdio servers are supported"
                    );
                }
                (None, None) => {
                    return Err(ConfigError::InvalidValue {
                        key: format!("mcpServers.{name}"),
                        message: "expected either `command` or `url`".to_string(),
                    });
                }
            }
        }

        Ok(Self { servers })
    }

    /// Read and parse an `mcpServers` JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&content, &path.display().to_string())
    }

    /// Add servers from `other`, replacing entries with the same name.
    pub fn merge(&mut self, other: McpConfig) {
        self.servers.extend(other.servers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_server_toml() {
        let toml_str = r#"
[servers.research]
command = "poetry"
args = ["run", "python", "-m", "tools.research_server"]
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        let research = &config.servers["research"];
        assert_eq!(research.command, "poetry");
        assert_eq!(research.args.len(), 4);
        assert_eq!(research.timeout_ms, 30_000);
        assert_eq!(research.init_timeout_ms, 30_000);
        assert_eq!(research.shutdown_grace_ms, 5_000);
        assert!(research.cwd.is_none());
    }

    #[test]
    fn parse_toml_env_cwd_and_timeouts() {
        let toml_str = r#"
[servers.greeter]
command = "python"
args = ["tools/hello_service.py"]
env = { GREETING = "hello" }
cwd = "/srv/tools"
timeout_ms = 5000
init_timeout_ms = 2000
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        let greeter = &config.servers["greeter"];
        assert_eq!(greeter.env["GREETING"], "hello");
        assert_eq!(greeter.cwd.as_deref(), Some(Path::new("/srv/tools")));
        assert_eq!(greeter.timeout_ms, 5000);
        assert_eq!(greeter.init_timeout_ms, 2000);
    }

    #[test]
    fn json_servers_with_command() {
        let json = r#"{
            "mcpServers": {
                "research": {
                    "command": "python",
                    "args": ["tools/research-mcp-server.py"],
                    "env": null
                }
            }
        }"#;
        let config = McpConfig::from_json_str(json, "inline").unwrap();
        let research = &config.servers["research"];
        assert_eq!(research.command, "python");
        assert_eq!(research.args, vec!["tools/research-mcp-server.py"]);
        assert!(research.env.is_empty());
    }

    #[test]
    fn json_url_entries_are_skipped() {
        let json = r#"{
            "mcpServers": {
                "remote": {"url": "http://localhost:8000/mcp", "headers": {"x": "y"}},
                "local": {"command": "cat"}
            }
        }"#;
        let config = McpConfig::from_json_str(json, "inline").unwrap();
        assert_eq!(config.servers.len(), 1);
        assert!(config.servers.contains_key("local"));
    }

    #[test]
    fn json_entry_without_command_or_url_is_invalid() {
        let json = r#"{"mcpServers": {"broken": {"args": ["x"]}}}"#;
        let err = McpConfig::from_json_str(json, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "mcpServers.broken"));
    }

    #[test]
    fn json_without_servers_is_empty() {
        let config = McpConfig::from_json_str("{}", "inline").unwrap();
        assert!(config.servers.is_empty());
        let config = McpConfig::from_json_str(r#"{"mcpServers": null}"#, "inline").unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn malformed_json_reports_origin() {
        let err = McpConfig::from_json_str("{", "servers.json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "servers.json"));
    }

    #[test]
    fn json_file_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, r#"{"mcpServers": {"echo": {"command": "cat"}}}"#).unwrap();
        let config = McpConfig::from_json_file(&path).unwrap();
        assert_eq!(config.servers["echo"].command, "cat");

        let missing = McpConfig::from_json_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn merge_replaces_same_name() {
        let mut base = McpConfig::default();
        base.servers
            .insert("a".into(), McpServerConfig::new("cat"));
        let mut other = McpConfig::default();
        other
            .servers
            .insert("a".into(), McpServerConfig::new("tee"));
        other
            .servers
            .insert("b".into(), McpServerConfig::new("cat"));
        base.merge(other);
        assert_eq!(base.servers["a"].command, "tee");
        assert_eq!(base.servers.len(), 2);
    }
}
