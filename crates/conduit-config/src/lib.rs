//! Layered configuration for Conduit.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > `<config_dir>/config.toml` > defaults

use conduit_api::Endpoint;
use conduit_mcp::{McpConfig, McpServerConfig};
use conduit_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The default OpenAI API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com";

/// The default model (or Azure deployment) to use.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// The default Azure OpenAI `api-version` query parameter.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Resolved configuration for a Conduit run.
#[derive(Debug, Clone)]
pub struct ConduitConfig {
    pub api_key: String,
    pub endpoint: Endpoint,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    /// `None` leaves the agent's default in place.
    pub max_turns: Option<usize>,
    pub mcp: McpConfig,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    /// `"openai"` or `"azure"`.
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// OpenAI base URL, or the Azure resource endpoint when `provider = "azure"`.
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    pub system_prompt: Option<String>,
    pub max_turns: Option<usize>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub max_turns: Option<usize>,
    /// An `mcpServers` JSON file whose servers are added to the TOML ones.
    pub mcp_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavour {
    OpenAi,
    Azure,
}

impl ConduitConfig {
    /// Load configuration from the process environment and config file.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_with(overrides, |key| std::env::var(key).ok())
    }

    /// Load configuration, reading environment variables through `env`.
    pub fn load_with<F>(overrides: CliOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = env("CONDUIT_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);
        let settings = load_settings_file(&config_dir.join("config.toml"));
        let api = settings.api;

        let azure_endpoint = env("AZURE_OPENAI_ENDPOINT");
        let flavour = if azure_endpoint.is_some() {
            Flavour::Azure
        } else {
            match api.provider.as_deref() {
                None | Some("openai") => Flavour::OpenAi,
                Some("azure") => Flavour::Azure,
                Some(other) => {
                    return Err(ConfigError::InvalidValue {
                        key: "api.provider".into(),
                        message: format!("expected \"openai\" or \"azure\", got \"{other}\""),
                    });
                }
            }
        };

        let model = overrides
            .model
            .or_else(|| env("CONDUIT_MODEL"))
            .or_else(|| match flavour {
                Flavour::Azure => env("AZURE_OPENAI_DEPLOYMENT"),
                Flavour::OpenAi => None,
            })
            .or(api.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let (api_key, endpoint) = match flavour {
            Flavour::OpenAi => {
                let api_key = env("OPENAI_API_KEY").or(api.api_key).ok_or_else(|| {
                    ConfigError::MissingKey {
                        key: "api_key (set OPENAI_API_KEY or add to config.toml)".into(),
                    }
                })?;
                let base_url = env("OPENAI_BASE_URL")
                    .or(api.base_url)
                    .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
                (api_key, Endpoint::openai(base_url))
            }
            Flavour::Azure => {
                let api_key = env("AZURE_OPENAI_API_KEY").or(api.api_key).ok_or_else(|| {
                    ConfigError::MissingKey {
                        key: "api_key (set AZURE_OPENAI_API_KEY or add to config.toml)".into(),
                    }
                })?;
                let endpoint = azure_endpoint.or(api.base_url).ok_or_else(|| {
                    ConfigError::MissingKey {
                        key: "Azure endpoint (set AZURE_OPENAI_ENDPOINT or api.base_url)".into(),
                    }
                })?;
                let api_version = env("AZURE_OPENAI_API_VERSION")
                    .or(api.api_version)
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
                (
                    api_key,
                    Endpoint::azure(endpoint, model.clone(), api_version),
                )
            }
        };

        let mut mcp = McpConfig {
            servers: settings.servers,
        };
        if let Some(path) = &overrides.mcp_config {
            mcp.merge(McpConfig::from_json_file(path)?);
        }

        if let Some(0) = overrides.max_turns.or(settings.agent.max_turns) {
            return Err(ConfigError::InvalidValue {
                key: "max_turns".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(ConduitConfig {
            api_key,
            endpoint,
            model,
            max_tokens: api.max_tokens,
            temperature: api.temperature,
            system_prompt: settings.agent.system_prompt,
            max_turns: overrides.max_turns.or(settings.agent.max_turns),
            mcp,
            config_dir,
        })
    }
}

/// The Conduit config directory when `CONDUIT_CONFIG_DIR` is unset (~/.conduit/).
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conduit")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}
