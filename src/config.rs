//! Client configuration from defaults, an optional JSON file and the
//! environment.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use automation_api::url::DEFAULT_BASE_URL;
use automation_api::AutomationApiConfig;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::poll::{PollConfig, DEFAULT_MAX_POLL_DURATION, DEFAULT_POLL_INTERVAL};
use crate::refresh::IdentityProvider;

pub const CONFIG_PATH_ENV: &str = "ROUTINE_PILOT_CONFIG_PATH";
pub const BASE_URL_ENV: &str = "ROUTINE_PILOT_BASE_URL";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub identity: IdentityProvider,
    pub poll_interval: Duration,
    /// `None` polls without a deadline.
    pub max_poll_duration: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            identity: IdentityProvider::Native,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_duration: Some(DEFAULT_MAX_POLL_DURATION),
            request_timeout: None,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, identity: IdentityProvider) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_poll_duration = max_duration;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            max_duration: self.max_poll_duration,
        }
    }

    pub fn api_config(&self) -> AutomationApiConfig {
        let mut config = AutomationApiConfig::new(self.base_url.clone());
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            config = config.with_timeout(timeout);
        }
        config
    }

    /// Loads defaults, then `ROUTINE_PILOT_CONFIG_PATH` if set, then the
    /// `ROUTINE_PILOT_BASE_URL` override.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env_string_opt(CONFIG_PATH_ENV) {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        if let Some(base_url) = env_string_opt(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        file.into_config()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    identity: Option<IdentityFile>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    max_poll_duration_sec: Option<u64>,
    #[serde(default)]
    timeout_sec: Option<u64>,
    #[serde(default)]
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
enum IdentityFile {
    Native,
    Hosted { url: String, anon_key: String },
}

impl ConfigFile {
    fn into_config(self) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::default();

        if let Some(base_url) = self.base_url {
            if base_url.trim().is_empty() {
                return Err(ConfigError::invalid("base_url", "must not be empty"));
            }
            config.base_url = base_url;
        }

        if let Some(identity) = self.identity {
            config.identity = match identity {
                IdentityFile::Native => IdentityProvider::Native,
                IdentityFile::Hosted { url, anon_key } => {
                    if url.trim().is_empty() {
                        return Err(ConfigError::invalid("identity.url", "must not be empty"));
                    }
                    IdentityProvider::Hosted { url, anon_key }
                }
            };
        }

        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval = positive_duration("poll_interval_ms", interval, Duration::from_millis)?;
        }
        if let Some(max) = self.max_poll_duration_sec {
            config.max_poll_duration =
                Some(positive_duration("max_poll_duration_sec", max, Duration::from_secs)?);
        }
        if let Some(timeout) = self.timeout_sec {
            config.request_timeout =
                Some(positive_duration("timeout_sec", timeout, Duration::from_secs)?);
        }
        config.user_agent = self.user_agent.filter(|value| !value.trim().is_empty());
        Ok(config)
    }
}

fn positive_duration(
    field: &'static str,
    value: u64,
    unit: fn(u64) -> Duration,
) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(unit(value))
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
