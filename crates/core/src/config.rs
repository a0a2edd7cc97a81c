use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::PresenceSpec;

/// Environment variable that carries the gateway credential.
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Fixed gateway WebSocket URL. When unset it is looked up via `GET /gateway/bot`.
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Gateway intents bitmask. The bridge only sends, so none are needed.
    #[serde(default)]
    pub intents: u64,
    /// Upper bound on Hello -> READY/RESUMED.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_handshake_timeout() -> u64 {
    30
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            gateway_url: None,
            intents: 0,
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl DiscordConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Longest accepted message, in code points (inclusive).
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_max_message_chars() -> usize {
    2000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Extra random delay as a fraction of the step, clamped to [0, 1].
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Uptime after which a dropped session reconnects starting from the base delay again.
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_stable_after_ms() -> u64 {
    30_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            jitter: default_jitter(),
            stable_after_ms: default_stable_after_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceSelection {
    #[default]
    First,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceConfig {
    #[serde(default = "default_presence_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub selection: PresenceSelection,
    #[serde(default = "default_presence_candidates")]
    pub candidates: Vec<PresenceSpec>,
}

fn default_presence_enabled() -> bool {
    true
}

fn default_presence_candidates() -> Vec<PresenceSpec> {
    vec![PresenceSpec::default()]
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_presence_enabled(),
            selection: PresenceSelection::default(),
            candidates: default_presence_candidates(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay process environment on top of the file config.
    pub fn apply_env(&mut self) {
        self.apply_token(std::env::var(TOKEN_ENV).ok());
    }

    fn apply_token(&mut self, token: Option<String>) {
        if let Some(token) = token {
            let token = token.trim();
            if !token.is_empty() {
                self.discord.bot_token = token.to_string();
            }
        }
    }

    pub fn has_token(&self) -> bool {
        !self.discord.bot_token.trim().is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.max_message_chars == 0 {
            return Err(Error::Config("bridge.maxMessageChars must be positive".to_string()));
        }
        if self.supervisor.backoff_base_ms == 0 {
            return Err(Error::Config("supervisor.backoffBaseMs must be positive".to_string()));
        }
        if self.supervisor.backoff_cap_ms < self.supervisor.backoff_base_ms {
            return Err(Error::Config(
                "supervisor.backoffCapMs must not be below backoffBaseMs".to_string(),
            ));
        }
        Ok(())
    }
}
