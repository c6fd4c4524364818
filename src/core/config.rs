use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::Level;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
/// Placeholder shared secret. Only suitable for local testing.
pub const DEFAULT_HMAC_KEY: &str = "abc123";
pub const DEFAULT_RESULT_MESSAGE: &str = "Hello World";
pub const DEFAULT_RESULT_URL: &str = "http://example.com/runtask/QxZyl";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("missing value for {flag}")]
    MissingValue { flag: &'static str },
}

const KNOWN_FLAGS: &[&str] = &[
    "--host",
    "--port",
    "--hmac-key",
    "--download-dir",
    "--config-max-redirects",
    "--plan-max-redirects",
    "--result-message",
    "--result-url",
    "--log-level",
];

/// How many redirect hops each outbound fetch may follow.
///
/// Result callbacks (PATCH) never follow redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub config_max_hops: usize,
    pub plan_max_hops: usize,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            config_max_hops: 20,
            plan_max_hops: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub host: String,
    pub port: u16,
    pub hmac_key: String,
    pub download_dir: PathBuf,
    pub redirects: RedirectPolicy,
    pub result_message: String,
    pub result_url: String,
    pub log_level: Level,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            hmac_key: DEFAULT_HMAC_KEY.to_string(),
            download_dir: PathBuf::from("."),
            redirects: RedirectPolicy::default(),
            result_message: DEFAULT_RESULT_MESSAGE.to_string(),
            result_url: DEFAULT_RESULT_URL.to_string(),
            log_level: Level::INFO,
        }
    }
}

impl ReceiverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse_value("PORT", &port)?;
        }
        if let Some(key) = get("HMAC_KEY") {
            config.hmac_key = key;
        }
        if let Some(dir) = get("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(hops) = get("CONFIG_MAX_REDIRECTS") {
            config.redirects.config_max_hops = parse_value("CONFIG_MAX_REDIRECTS", &hops)?;
        }
        if let Some(hops) = get("PLAN_MAX_REDIRECTS") {
            config.redirects.plan_max_hops = parse_value("PLAN_MAX_REDIRECTS", &hops)?;
        }
        if let Some(message) = get("RESULT_MESSAGE") {
            config.result_message = message;
        }
        if let Some(url) = get("RESULT_URL") {
            config.result_url = url;
        }
        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = parse_value("LOG_LEVEL", &level)?;
        }

        Ok(config)
    }

    /// Applies `--flag value` overrides from `args[start..]`. Unrecognised
    /// arguments are skipped; a known flag without a value is an error.
    pub fn apply_flags(&mut self, args: &[String], start: usize) -> Result<(), ConfigError> {
        let mut i = start;
        while i < args.len() {
            let Some(flag) = KNOWN_FLAGS.iter().copied().find(|f| *f == args[i]) else {
                i += 1;
                continue;
            };
            let value = args
                .get(i + 1)
                .ok_or(ConfigError::MissingValue { flag })?;
            match flag {
                "--host" => self.host = value.clone(),
                "--port" => self.port = parse_value(flag, value)?,
                "--hmac-key" => self.hmac_key = value.clone(),
                "--download-dir" => self.download_dir = PathBuf::from(value),
                "--config-max-redirects" => {
                    self.redirects.config_max_hops = parse_value(flag, value)?
                }
                "--plan-max-redirects" => self.redirects.plan_max_hops = parse_value(flag, value)?,
                "--result-message" => self.result_message = value.clone(),
                "--result-url" => self.result_url = value.clone(),
                "--log-level" => self.log_level = parse_value(flag, value)?,
                _ => {}
            }
            i += 2;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_default_key(&self) -> bool {
        self.hmac_key == DEFAULT_HMAC_KEY
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}
