//! Layered configuration for prlens.
//!
//! Values are resolved in this order, later layers winning:
//! 1. Built-in defaults
//! 2. `prlens.toml` in the working directory (or the file passed with `--config`)
//! 3. Environment variables (a `.env` file is loaded first by the binary)
//! 4. CLI flags, applied by the command that needs them
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5001
//!
//! [jira]
//! url = "https://example.atlassian.net"
//! email = "me@example.com"
//! api_token = "..."
//!
//! [azure_devops]
//! organization = "my-org"
//! project = "my-project"
//! pat = "..."
//! default_repo = "MedicineOneLibrary"
//!
//! [ai]
//! provider = "anthropic"
//! api_key = "..."
//! model = "claude-sonnet-4-5"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "prlens.toml";

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
        }
    }
}

/// Jira credentials. An empty `url` means the issue tracker is not configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraSettings {
    pub url: String,
    pub email: String,
    pub api_token: Secret,
}

impl JiraSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Azure DevOps repository host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureDevOpsSettings {
    pub organization: String,
    pub project: String,
    pub pat: Secret,
    /// Repository analysed when a request does not name one.
    pub default_repo: String,
    /// Overrides `https://dev.azure.com`, e.g. for an on-prem server.
    pub base_url: Option<String>,
    /// Upper bound on files whose contents are fetched per pull request.
    pub max_files: usize,
    pub timeout_secs: u64,
}

impl Default for AzureDevOpsSettings {
    fn default() -> Self {
        Self {
            organization: String::new(),
            project: String::new(),
            pat: Secret::default(),
            default_repo: "MedicineOneLibrary".to_string(),
            base_url: None,
            max_files: 50,
            timeout_secs: 30,
        }
    }
}

/// Supported AI providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    OpenAi,
    Anthropic,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::OpenAi => "openai",
            AiProvider::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            AiProvider::OpenAi => "https://api.openai.com",
            AiProvider::Anthropic => "https://api.anthropic.com",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AiProvider::OpenAi => "gpt-4o-mini",
            AiProvider::Anthropic => "claude-sonnet-4-5",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn key_var(&self) -> &'static str {
        match self {
            AiProvider::OpenAi => "OPENAI_API_KEY",
            AiProvider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AiProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(AiProvider::OpenAi),
            "anthropic" | "claude" => Ok(AiProvider::Anthropic),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

/// AI engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub provider: AiProvider,
    pub api_key: Secret,
    /// Falls back to the provider's default model when unset.
    pub model: Option<String>,
    /// Falls back to the provider's public endpoint when unset.
    pub base_url: Option<String>,
    pub max_tokens: u32,
    /// Combined input is truncated to this many characters before prompting.
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            api_key: Secret::default(),
            model: None,
            base_url: None,
            max_tokens: 4096,
            max_input_chars: 120_000,
            timeout_secs: 180,
        }
    }
}

impl AiSettings {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// A provider counts as configured once it has a key, or a custom
    /// endpoint (local OpenAI-compatible servers often need no key).
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() || self.base_url.is_some()
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub jira: JiraSettings,
    pub azure_devops: AzureDevOpsSettings,
    pub ai: AiSettings,
}

impl AppConfig {
    /// Load configuration from file and process environment.
    ///
    /// An explicit `path` must exist; the implicit `prlens.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let implicit = PathBuf::from(DEFAULT_CONFIG_FILE);
                if implicit.exists() {
                    Self::from_file(&implicit)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overlay environment variables. `lookup` is injected so tests never
    /// touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("PRLENS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PRLENS_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PRLENS_PORT",
                value: port.clone(),
            })?;
        }

        if let Some(url) = get("JIRA_URL") {
            self.jira.url = url;
        }
        if let Some(email) = get("JIRA_EMAIL") {
            self.jira.email = email;
        }
        if let Some(token) = get("JIRA_API_TOKEN") {
            self.jira.api_token = Secret::new(token);
        }

        if let Some(org) = get("AZDO_ORG") {
            self.azure_devops.organization = org;
        }
        if let Some(project) = get("AZDO_PROJECT") {
            self.azure_devops.project = project;
        }
        if let Some(pat) = get("AZDO_PAT") {
            self.azure_devops.pat = Secret::new(pat);
        }
        if let Some(repo) = get("AZDO_REPO") {
            self.azure_devops.default_repo = repo;
        }
        if let Some(base_url) = get("AZDO_BASE_URL") {
            self.azure_devops.base_url = Some(base_url);
        }

        if let Some(provider) = get("AI_PROVIDER") {
            self.ai.provider = provider.parse()?;
        }
        if let Some(model) = get("AI_MODEL") {
            self.ai.model = Some(model);
        }
        if let Some(base_url) = get("AI_BASE_URL") {
            self.ai.base_url = Some(base_url);
        }
        if let Some(key) = get(self.ai.provider.key_var()) {
            self.ai.api_key = Secret::new(key);
        }

        Ok(())
    }
}
