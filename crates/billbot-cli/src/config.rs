//! Configuration file support

use billbot_backend::{BackendEndpoints, ChatId, UserId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that replaces the config file location
pub const CONFIG_PATH_ENV: &str = "BILLBOT_CONFIG_PATH";
/// Environment variable that overrides `bot_token`
pub const BOT_TOKEN_ENV: &str = "BILLBOT_BOT_TOKEN";

const DEFAULT_API_URL: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Invalid setting `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Configuration for billbot, as written in the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot API token
    pub bot_token: Option<String>,
    /// Username accepted in `/bill@<username>`
    pub bot_username: Option<String>,
    /// The bot's user id; taken from the token when absent
    pub bot_id: Option<UserId>,
    /// Chat the bot never serves
    pub home_chat_id: Option<ChatId>,
    /// Chat that receives approval requests
    pub admin_chat_id: Option<ChatId>,
    /// Long-poll timeout for getUpdates
    pub poll_timeout_secs: Option<u64>,
    /// Bot API base URL
    pub api_url: Option<String>,
    /// Also write logs to this file
    pub log_file: Option<PathBuf>,
    /// Backend URLs
    pub endpoints: BackendEndpoints,
}

/// Validated settings the bot runs with
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bot_token: String,
    pub bot_username: Option<String>,
    pub bot_id: UserId,
    pub home_chat_id: ChatId,
    pub admin_chat_id: ChatId,
    pub poll_timeout: Duration,
    pub api_url: String,
    pub log_file: Option<PathBuf>,
    pub endpoints: BackendEndpoints,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("billbot")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Write the example config to `path` unless a file is already there
    pub fn init(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())
    }

    /// Check required settings and fill in defaults.
    /// `token_override` wins over the configured token.
    pub fn resolve(self, token_override: Option<String>) -> Result<Settings, ConfigError> {
        let bot_token = token_override
            .filter(|t| !t.is_empty())
            .or(self.bot_token)
            .ok_or(ConfigError::Missing("bot_token"))?;
        let bot_id = match self.bot_id {
            Some(id) => id,
            None => bot_id_from_token(&bot_token)?,
        };
        let admin_chat_id = self
            .admin_chat_id
            .ok_or(ConfigError::Missing("admin_chat_id"))?;
        self.endpoints
            .validate()
            .map_err(|e| ConfigError::Invalid {
                name: "endpoints",
                reason: e.to_string(),
            })?;

        Ok(Settings {
            bot_token,
            bot_username: self.bot_username,
            bot_id,
            home_chat_id: self.home_chat_id.unwrap_or_default(),
            admin_chat_id,
            poll_timeout: Duration::from_secs(
                self.poll_timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
            ),
            api_url: self
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            log_file: self.log_file,
            endpoints: self.endpoints,
        })
    }
}

/// Bot tokens start with the bot's user id: `<id>:<secret>`
fn bot_id_from_token(token: &str) -> Result<UserId, ConfigError> {
    token
        .split_once(':')
        .and_then(|(id, _)| id.parse().ok())
        .ok_or_else(|| ConfigError::Invalid {
            name: "bot_token",
            reason: "expected <bot id>:<secret>; set bot_id explicitly".to_string(),
        })
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# billbot configuration file
# Place at ~/.config/billbot/config.toml or point BILLBOT_CONFIG_PATH at it

# Bot API token (BILLBOT_BOT_TOKEN overrides it)
bot_token = "123456:replace-me"

# Username for /bill@<username>; the id is read from the token when omitted
bot_username = "billbot"
# bot_id = 123456

# The owner's private chat, never served
home_chat_id = 0

# Chat where administrators approve bills
admin_chat_id = -1001234567890

# Long-poll timeout in seconds
poll_timeout_secs = 30

# Optional log file, in addition to stderr
# log_file = "/var/log/billbot.log"

[endpoints]
access = "https://billing.example.com/bot/access"
question = "https://billing.example.com/bot/question"
order = "https://billing.example.com/bot/order"
admin_question = "https://billing.example.com/bot/admin-question"
balances = "https://billing.example.com/bot/balances"
delete = "https://billing.example.com/bot/delete"
new_chat = "https://billing.example.com/bot/new-chat"
command = "https://billing.example.com/bot/command"
message = "https://billing.example.com/bot/message"
"#
}
