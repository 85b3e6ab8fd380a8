use std::time::Duration;
use tracing::Level;
use tutor_core::polling::PollPolicy;

pub const DEFAULT_API_URL: &str = "https://uouaitutor.duckdns.org";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub access_token: Option<String>,
    pub poll_interval: Duration,
    pub advance_delay: Duration,
    /// `None` when the soft ceiling is disabled.
    pub soft_ceiling: Option<Duration>,
    pub request_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_url = std::env::var("TUTOR_API_URL")
            .map(|url| url.trim().to_string())
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "TUTOR_API_URL".to_string(),
                format!("'{}' is not an http(s) URL", api_url),
            ));
        }

        let access_token = std::env::var("TUTOR_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let poll_interval = Duration::from_millis(parse_u64("POLL_INTERVAL_MS", 2000)?);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let advance_delay = Duration::from_millis(parse_u64("ADVANCE_DELAY_MS", 500)?);
        let soft_ceiling = match parse_u64("POLL_SOFT_CEILING_SECS", 300)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let request_timeout = Duration::from_secs(parse_u64("REQUEST_TIMEOUT_SECS", 30)?);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_url,
            access_token,
            poll_interval,
            advance_delay,
            soft_ceiling,
            request_timeout,
            log_level,
        })
    }

    /// The timing knobs handed to the session controller.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            soft_ceiling: self.soft_ceiling,
            advance_delay: self.advance_delay,
        }
    }
}

fn parse_u64(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
