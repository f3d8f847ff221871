//! Configuration loader and validator for the booking notifier.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::runner::RunSettings;

pub const ENV_PUSHOVER_APP_TOKEN: &str = "PUSHOVER_APP_TOKEN";
pub const ENV_PUSHOVER_USER_KEY: &str = "PUSHOVER_USER_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub booking_api: BookingApi,
    #[serde(default)]
    pub pushover: Pushover,
    #[serde(default)]
    pub notify: Notify,
    #[serde(default)]
    pub state: State,
}

/// Remote booking API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingApi {
    #[serde(default = "default_booking_base_url")]
    pub base_url: String,
    pub org: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Pushover credentials and message settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pushover {
    #[serde(default = "default_pushover_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub app_token: String,
    #[serde(default)]
    pub user_key: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for Pushover {
    fn default() -> Self {
        Self {
            base_url: default_pushover_base_url(),
            app_token: String::new(),
            user_key: String::new(),
            title: default_title(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Per-run notification limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,
}

impl Default for Notify {
    fn default() -> Self {
        Self {
            max_per_run: default_max_per_run(),
        }
    }
}

/// Where the cursor lives between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum State {
    File {
        #[serde(default = "default_state_path")]
        path: String,
    },
    Sqlite {
        database_url: String,
    },
}

impl Default for State {
    fn default() -> Self {
        State::File {
            path: default_state_path(),
        }
    }
}

fn default_booking_base_url() -> String {
    "https://dans.se/api/public/".to_string()
}

fn default_pushover_base_url() -> String {
    "https://api.pushover.net/".to_string()
}

fn default_title() -> String {
    "Ny anmälan (CogWork)".to_string()
}

fn default_state_path() -> String {
    "booking_state.json".to_string()
}

fn default_max_rows() -> u32 {
    50
}

fn default_max_per_run() -> usize {
    10
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Config {
    /// Overlay Pushover secrets from the process environment.
    /// Non-empty variables win over values in the file.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_PUSHOVER_APP_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.pushover.app_token = token;
        }
        if let Some(user) = lookup(ENV_PUSHOVER_USER_KEY).filter(|v| !v.trim().is_empty()) {
            self.pushover.user_key = user;
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            max_fetch: self.booking_api.max_rows,
            max_per_run: self.notify.max_per_run,
            title: self.pushover.title.clone(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.booking_api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("booking_api.base_url must be non-empty"));
    }
    if cfg.booking_api.org.trim().is_empty() {
        return Err(ConfigError::Invalid("booking_api.org must be non-empty"));
    }
    if cfg.booking_api.max_rows == 0 {
        return Err(ConfigError::Invalid("booking_api.max_rows must be > 0"));
    }
    if cfg.booking_api.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("booking_api.timeout_seconds must be > 0"));
    }

    // Empty credentials are allowed here; sending fails instead, so a run
    // without new bookings still succeeds.
    if cfg.pushover.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("pushover.base_url must be non-empty"));
    }
    if cfg.pushover.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("pushover.timeout_seconds must be > 0"));
    }

    if cfg.notify.max_per_run == 0 {
        return Err(ConfigError::Invalid("notify.max_per_run must be > 0"));
    }

    match &cfg.state {
        State::File { path } if path.trim().is_empty() => {
            return Err(ConfigError::Invalid("state.path must be non-empty"));
        }
        State::Sqlite { database_url } if database_url.trim().is_empty() => {
            return Err(ConfigError::Invalid("state.database_url must be non-empty"));
        }
        _ => {}
    }

    Ok(())
}

/// Returns a complete sample configuration.
pub fn example() -> &'static str {
    r#"booking_api:
  base_url: "https://dans.se/api/public/"
  org: "sollentunadans"
  max_rows: 50
  timeout_seconds: 30

pushover:
  base_url: "https://api.pushover.net/"
  # Prefer the PUSHOVER_APP_TOKEN / PUSHOVER_USER_KEY environment variables.
  app_token: ""
  user_key: ""
  title: "Ny anmälan (CogWork)"
  timeout_seconds: 30

notify:
  max_per_run: 10

state:
  backend: file
  path: "booking_state.json"
"#
}
