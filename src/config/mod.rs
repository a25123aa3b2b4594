
use crate::direct::error::RESTRICTED_ERROR_CODE;
use crate::direct::inbox::{default_strategies, InboxStrategy};
use crate::direct::poller::PollMode;
use crate::transport::SessionCookies;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub inbox: InboxConfig,

    #[serde(default)]
    pub replies: ReplyConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials and request shape for the private mobile API.
///
/// Either `cookies_file` (a Netscape cookies.txt export) or the explicit
/// `session_id` / `user_id` pair must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub cookies_file: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub csrf_token: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_app_id")]
    pub app_id: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Sleep after a failed cycle is `interval_ms * error_backoff_multiplier`.
    #[serde(default = "default_error_backoff_multiplier")]
    pub error_backoff_multiplier: u32,

    #[serde(default)]
    pub mode: PollMode,

    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,

    #[serde(default = "default_true")]
    pub check_pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Query shapes tried in order while the previous one is restricted.
    #[serde(default = "default_strategies")]
    pub fallback: Vec<InboxStrategy>,

    /// API error codes meaning "this query shape is not allowed".
    #[serde(default = "default_restricted_codes")]
    pub restricted_codes: Vec<i64>,

    #[serde(default = "default_thread_message_limit")]
    pub thread_message_limit: u32,

    #[serde(default = "default_inbox_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_reply_timeout_ms")]
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_base_url() -> String {
    "https://i.instagram.com/api/v1".to_string()
}
fn default_user_agent() -> String {
    "Instagram 275.0.0.27.98 Android (28/9; 480dpi; 1080x2148; OnePlus; ONEPLUS A6000; OnePlus6; qcom; en_US; 458229237)".to_string()
}
fn default_app_id() -> String {
    "567067343352427".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_interval_ms() -> u64 {
    5000
}
fn default_error_backoff_multiplier() -> u32 {
    2
}
fn default_ledger_capacity() -> usize {
    crate::direct::ledger::DEFAULT_LEDGER_CAPACITY
}
fn default_true() -> bool {
    true
}
fn default_restricted_codes() -> Vec<i64> {
    vec![RESTRICTED_ERROR_CODE]
}
fn default_thread_message_limit() -> u32 {
    10
}
fn default_inbox_limit() -> u32 {
    20
}
fn default_reply_timeout_ms() -> u64 {
    120_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_jitter_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookies_file: None,
            session_id: None,
            csrf_token: None,
            user_id: None,
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            app_id: default_app_id(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            error_backoff_multiplier: default_error_backoff_multiplier(),
            mode: PollMode::default(),
            ledger_capacity: default_ledger_capacity(),
            check_pending: true,
        }
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            fallback: default_strategies(),
            restricted_codes: default_restricted_codes(),
            thread_message_limit: default_thread_message_limit(),
            limit: default_inbox_limit(),
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SessionConfig {
    /// Session cookies from `cookies_file`, or from the explicit fields when
    /// no file is configured.
    pub fn resolve_cookies(&self) -> Result<SessionCookies> {
        if let Some(ref file) = self.cookies_file {
            let path = PathBuf::from(shellexpand::tilde(file).to_string());
            return SessionCookies::load(&path);
        }

        let mut cookies = SessionCookies::default();
        if let Some(ref session_id) = self.session_id {
            cookies.insert("sessionid", session_id.clone());
        }
        if let Some(ref user_id) = self.user_id {
            cookies.insert("ds_user_id", user_id.clone());
        }
        if let Some(ref csrf) = self.csrf_token {
            cookies.insert("csrftoken", csrf.clone());
        }
        cookies
            .validate()
            .context("Set session.cookies_file or session.session_id and session.user_id")?;
        Ok(cookies)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            // Create default config file on first run
            let config = Config::default();
            config.save_with_template()?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load an explicit config file; unlike [`Config::load`] it must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)?;

        config.expand_env_vars();

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            anyhow::bail!("polling.interval_ms must be greater than 0");
        }
        if self.polling.error_backoff_multiplier == 0 {
            anyhow::bail!("polling.error_backoff_multiplier must be at least 1");
        }
        if self.polling.ledger_capacity < 2 {
            anyhow::bail!(
                "polling.ledger_capacity must be at least 2 (got {})",
                self.polling.ledger_capacity
            );
        }

        if self.inbox.fallback.is_empty() {
            anyhow::bail!("inbox.fallback must list at least one strategy");
        }
        if let Some(pos) = self
            .inbox
            .fallback
            .iter()
            .position(|s| *s == InboxStrategy::Empty)
        {
            if pos + 1 != self.inbox.fallback.len() {
                anyhow::bail!("inbox.fallback: \"empty\" must be the last strategy");
            }
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => anyhow::bail!(
                "Unknown logging.format '{}'. Expected \"pretty\" or \"json\"",
                other
            ),
        }

        if !self.session.base_url.starts_with("http") {
            anyhow::bail!("session.base_url must be an http(s) URL");
        }

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

        Ok(base.home_dir().join(".inbox-pulse").join("config.toml"))
    }

    fn expand_env_vars(&mut self) {
        let session = &mut self.session;
        for value in [
            &mut session.session_id,
            &mut session.csrf_token,
            &mut session.user_id,
            &mut session.cookies_file,
        ]
        .into_iter()
        .flatten()
        {
            *value = expand_env(value);
        }
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["session", "cookies_file"] => Ok(self.session.cookies_file.clone().unwrap_or_default()),
            ["session", "user_id"] => Ok(self.session.user_id.clone().unwrap_or_default()),
            ["session", "base_url"] => Ok(self.session.base_url.clone()),
            ["session", "user_agent"] => Ok(self.session.user_agent.clone()),
            ["session", "app_id"] => Ok(self.session.app_id.clone()),
            ["session", "request_timeout_secs"] => {
                Ok(self.session.request_timeout_secs.to_string())
            }
            ["polling", "interval_ms"] => Ok(self.polling.interval_ms.to_string()),
            ["polling", "error_backoff_multiplier"] => {
                Ok(self.polling.error_backoff_multiplier.to_string())
            }
            ["polling", "mode"] => Ok(match self.polling.mode {
                PollMode::Ledger => "ledger".to_string(),
                PollMode::Watermark => "watermark".to_string(),
            }),
            ["polling", "ledger_capacity"] => Ok(self.polling.ledger_capacity.to_string()),
            ["polling", "check_pending"] => Ok(self.polling.check_pending.to_string()),
            ["inbox", "fallback"] => Ok(self
                .inbox
                .fallback
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(",")),
            ["inbox", "thread_message_limit"] => Ok(self.inbox.thread_message_limit.to_string()),
            ["inbox", "limit"] => Ok(self.inbox.limit.to_string()),
            ["replies", "default_timeout_ms"] => Ok(self.replies.default_timeout_ms.to_string()),
            ["retry", "max_attempts"] => Ok(self.retry.max_attempts.to_string()),
            ["retry", "base_delay_ms"] => Ok(self.retry.base_delay_ms.to_string()),
            ["retry", "max_jitter_ms"] => Ok(self.retry.max_jitter_ms.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["session", "cookies_file"] => self.session.cookies_file = Some(value.to_string()),
            ["session", "user_id"] => self.session.user_id = Some(value.to_string()),
            ["session", "base_url"] => self.session.base_url = value.to_string(),
            ["session", "user_agent"] => self.session.user_agent = value.to_string(),
            ["session", "app_id"] => self.session.app_id = value.to_string(),
            ["session", "request_timeout_secs"] => {
                self.session.request_timeout_secs = value.parse()?
            }
            ["polling", "interval_ms"] => self.polling.interval_ms = value.parse()?,
            ["polling", "error_backoff_multiplier"] => {
                self.polling.error_backoff_multiplier = value.parse()?
            }
            ["polling", "mode"] => {
                self.polling.mode = match value {
                    "ledger" => PollMode::Ledger,
                    "watermark" => PollMode::Watermark,
                    other => anyhow::bail!("Unknown polling mode: {}", other),
                }
            }
            ["polling", "ledger_capacity"] => self.polling.ledger_capacity = value.parse()?,
            ["polling", "check_pending"] => self.polling.check_pending = value.parse()?,
            ["inbox", "fallback"] => {
                self.inbox.fallback = value
                    .split(',')
                    .map(|s| {
                        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
                            .with_context(|| format!("Unknown inbox strategy: {}", s.trim()))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            ["inbox", "thread_message_limit"] => {
                self.inbox.thread_message_limit = value.parse()?
            }
            ["inbox", "limit"] => self.inbox.limit = value.parse()?,
            ["replies", "default_timeout_ms"] => self.replies.default_timeout_ms = value.parse()?,
            ["retry", "max_attempts"] => self.retry.max_attempts = value.parse()?,
            ["retry", "base_delay_ms"] => self.retry.base_delay_ms = value.parse()?,
            ["retry", "max_jitter_ms"] => self.retry.max_jitter_ms = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => self.logging.format = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Inbox Pulse Configuration
# Auto-created on first run. Edit as needed.

[session]
# Netscape cookies.txt exported from a logged-in browser session.
# cookies_file = "~/.inbox-pulse/cookies.txt"

# Or set the cookies directly (values may reference env vars):
# session_id = "${IG_SESSION_ID}"
# user_id = "${IG_USER_ID}"
# csrf_token = "${IG_CSRF_TOKEN}"

request_timeout_secs = 30

[polling]
interval_ms = 5000
# Sleep after a failed cycle = interval_ms * error_backoff_multiplier
error_backoff_multiplier = 2
# "ledger" emits every unseen item; "watermark" only each thread's newest
mode = "ledger"
ledger_capacity = 10000
check_pending = true

[inbox]
# Tried in order while the previous query is restricted
fallback = ["full", "simplified", "pending", "empty"]
restricted_codes = [4415001]
thread_message_limit = 10
limit = 20

[replies]
default_timeout_ms = 120000

[retry]
max_attempts = 3
base_delay_ms = 1000
max_jitter_ms = 1000

[logging]
level = "info"
# "pretty" or "json"
format = "pretty"
"#;
