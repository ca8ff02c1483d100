use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::{Domain, Persona};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion endpoint settings
    pub backend: BackendConfig,

    /// Conversation and sampling settings
    pub chat: ChatSettings,

    /// Where grounding text for each domain lives
    pub knowledge_base: KnowledgeBaseConfig,

    /// Shared HTTP client settings
    pub http: HttpConfig,

    /// voicelink home directory
    #[serde(skip)]
    pub voicelink_home: PathBuf,
}

/// Flavour of chat-completions API to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure OpenAI deployment endpoint
    #[default]
    Azure,
    /// OpenAI-compatible `/v1/chat/completions`
    OpenAi,
}

/// Completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: ProviderKind,
    /// Azure resource endpoint or OpenAI-compatible base URL
    pub endpoint: String,
    /// Azure deployment name
    pub deployment: String,
    /// Azure API version query parameter
    pub api_version: String,
    /// Model name for OpenAI-compatible endpoints
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
}

/// Conversation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub persona: Persona,
    /// Maximum turns retained after a user append
    pub history_limit: usize,
    pub max_tokens: u32,
    /// Temperature for the ungrounded persona
    pub persona_temperature: f32,
    /// Temperature when a knowledge base is injected
    pub grounded_temperature: f32,
    /// Bound on undelivered events per stream
    pub stream_buffer: usize,
}

/// Knowledge-base source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    pub dir: PathBuf,
    /// Domain name to file name, relative to `dir` unless absolute
    pub sources: BTreeMap<String, String>,
}

/// HTTP pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

fn default_home() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".voicelink")
}

impl Default for Config {
    fn default() -> Self {
        let voicelink_home = default_home();
        Config {
            backend: BackendConfig::default(),
            chat: ChatSettings::default(),
            knowledge_base: KnowledgeBaseConfig {
                dir: voicelink_home.join("knowledge_base"),
                ..KnowledgeBaseConfig::default()
            },
            http: HttpConfig::default(),
            voicelink_home,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Azure,
            endpoint: String::new(),
            deployment: String::new(),
            api_version: "2024-06-01".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "AZURE_OPENAI_KEY".to_string(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            persona: Persona::Voice,
            history_limit: 8,
            max_tokens: 300,
            persona_temperature: 0.7,
            grounded_temperature: 0.2,
            stream_buffer: 32,
        }
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert("healthcare".to_string(), "healthcare.txt".to_string());
        sources.insert("finance".to_string(), "finance.txt".to_string());
        Self {
            dir: PathBuf::from("knowledge_base"),
            sources,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            pool_max_idle_per_host: 8,
            pool_idle_timeout_secs: 90,
        }
    }
}

impl Config {
    /// Load configuration from file and apply environment overrides
    pub fn load() -> Result<Self> {
        let voicelink_home = default_home();
        fs::create_dir_all(&voicelink_home)
            .context("Failed to create .voicelink directory")?;

        let mut config = Self::load_from(&voicelink_home.join("config.toml"))?;
        config.voicelink_home = voicelink_home;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        if let Some(parent) = path.parent() {
            config.voicelink_home = parent.to_path_buf();
        }
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.voicelink_home)
            .context("Failed to create .voicelink directory")?;
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(self.config_path(), content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.voicelink_home.join("config.toml")
    }

    /// Overlay credentials and endpoint settings from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };

        match self.backend.provider {
            ProviderKind::Azure => {
                set(&mut self.backend.endpoint, "AZURE_OPENAI_ENDPOINT");
                set(&mut self.backend.deployment, "AZURE_OPENAI_DEPLOYMENT_NAME");
                set(&mut self.backend.api_version, "AZURE_OPENAI_API_VERSION");
            }
            ProviderKind::OpenAi => {
                set(&mut self.backend.endpoint, "OPENAI_BASE_URL");
                set(&mut self.backend.model, "OPENAI_MODEL");
            }
        }

        if self.backend.api_key.is_none() {
            self.backend.api_key = lookup(&self.backend.api_key_env)
                .or_else(|| match self.backend.provider {
                    ProviderKind::Azure => None,
                    ProviderKind::OpenAi => lookup("OPENAI_API_KEY"),
                })
                .filter(|v| !v.trim().is_empty());
        }
    }

    /// Check if API key is configured
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.is_some()
    }

    /// Resolve the source file for every grounded domain that has one.
    pub fn knowledge_sources(&self) -> BTreeMap<Domain, PathBuf> {
        self.knowledge_base
            .sources
            .iter()
            .filter_map(|(name, file)| {
                let domain = Domain::parse_selector(name)?;
                if !domain.is_grounded() {
                    return None;
                }
                let path = PathBuf::from(file);
                let path = if path.is_absolute() {
                    path
                } else {
                    self.knowledge_base.dir.join(path)
                };
                Some((domain, path))
            })
            .collect()
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}
