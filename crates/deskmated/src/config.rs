//! Configuration management for deskmated.
//!
//! Loads settings from /etc/deskmate/config.toml (or `--config`) and falls
//! back to defaults for anything missing. Secrets can come from the
//! environment so they stay out of the file.

use deskmate_shared::host::OriginAllowList;
use deskmate_shared::Lexicon;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/deskmate/config.toml";

pub const ENV_GATEWAY_PRIVATE_KEY: &str = "DESKMATE_GATEWAY_PRIVATE_KEY";
pub const ENV_COMPLETION_API_KEY: &str = "DESKMATE_COMPLETION_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeskmateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub lexicon: Lexicon,
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7870".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Upstream ticketing REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "https://na.myconnectwise.net/v4_6_release/apis/3.0".to_string()
}

fn default_gateway_timeout() -> u64 {
    20
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            company: String::new(),
            public_key: String::new(),
            private_key: String::new(),
            client_id: String::new(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OpenAI-compatible completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    /// Prior chat messages forwarded with each turn
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
}

fn default_completion_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1200
}

fn default_completion_timeout() -> u64 {
    60
}

fn default_history_messages() -> usize {
    10
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_completion_endpoint(),
            model: default_completion_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout(),
            history_messages: default_history_messages(),
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_turns() -> u32 {
    deskmate_shared::throttle::DEFAULT_MAX_TURNS
}

fn default_window_secs() -> u64 {
    deskmate_shared::throttle::DEFAULT_WINDOW.as_secs()
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            window_secs: default_window_secs(),
        }
    }
}

/// Two-tier similarity search policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "default_tenant_window")]
    pub tenant_window_days: i64,
    #[serde(default = "default_global_window")]
    pub global_window_days: i64,
    /// Tenant matches below this broaden the search globally
    #[serde(default = "default_min_tenant_matches")]
    pub min_tenant_matches: usize,
    #[serde(default = "default_fetch_cap")]
    pub fetch_cap: usize,
    #[serde(default = "default_ranked_cap")]
    pub ranked_cap: usize,
}

fn default_max_keywords() -> usize {
    5
}

fn default_tenant_window() -> i64 {
    90
}

fn default_global_window() -> i64 {
    14
}

fn default_min_tenant_matches() -> usize {
    3
}

fn default_fetch_cap() -> usize {
    20
}

fn default_ranked_cap() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_keywords: default_max_keywords(),
            tenant_window_days: default_tenant_window(),
            global_window_days: default_global_window(),
            min_tenant_matches: default_min_tenant_matches(),
            fetch_cap: default_fetch_cap(),
            ranked_cap: default_ranked_cap(),
        }
    }
}

/// Resolution mining limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_evidence_cap")]
    pub evidence_cap: usize,
    #[serde(default = "default_leading_notes")]
    pub leading_notes: usize,
    #[serde(default = "default_trailing_notes")]
    pub trailing_notes: usize,
    #[serde(default = "default_note_chars")]
    pub note_chars: usize,
}

fn default_evidence_cap() -> usize {
    10
}

fn default_leading_notes() -> usize {
    2
}

fn default_trailing_notes() -> usize {
    3
}

fn default_note_chars() -> usize {
    500
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            evidence_cap: default_evidence_cap(),
            leading_notes: default_leading_notes(),
            trailing_notes: default_trailing_notes(),
            note_chars: default_note_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Upper bound on the grounding document handed to the provider
    #[serde(default = "default_max_context_chars")]
    pub max_chars: usize,
}

fn default_max_context_chars() -> usize {
    24_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_context_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub allowed_origins: OriginAllowList,
}

impl DeskmateConfig {
    /// Load from an explicit path; missing file is an error
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let mut config: DeskmateConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.lexicon = config.lexicon.normalized();
        Ok(config)
    }

    /// Load from `path` or the default location, falling back to defaults
    /// when the default file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None if Path::new(CONFIG_PATH).exists() => Self::load_from(Path::new(CONFIG_PATH))?,
            None => {
                info!("No config at {}, using defaults", CONFIG_PATH);
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        if config.gateway.company.is_empty() || config.gateway.public_key.is_empty() {
            warn!("Gateway credentials are not configured; ticket lookups will fail");
        }
        Ok(config)
    }

    /// Overlay secrets from the environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_GATEWAY_PRIVATE_KEY).filter(|v| !v.is_empty()) {
            self.gateway.private_key = key;
        }
        if let Some(key) = lookup(ENV_COMPLETION_API_KEY).filter(|v| !v.is_empty()) {
            self.completion.api_key = Some(key);
        }
    }
}
