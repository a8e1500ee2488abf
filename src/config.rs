//! Configuration types, built from environment variables.
//!
//! `Config::from_env()` reads and validates everything eagerly so the
//! `--config-check` mode can vet a deployment before any network I/O.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// IMAP mailbox connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder to poll (default INBOX).
    pub folder: String,
    /// FROM filter applied in the IMAP SEARCH (default "gitlab").
    pub sender_filter: String,
}

/// Prediction service connection settings.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

/// Issue tracker (GitLab) connection settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub token: SecretString,
    pub timeout: Duration,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub predictor: PredictorConfig,
    pub tracker: TrackerConfig,
    /// Delay between processing cycles in continuous mode.
    pub poll_interval: Duration,
    /// Minimum prediction confidence required to act. Range [0, 1].
    pub confidence_threshold: f32,
    /// Compute decisions but never call the tracker.
    pub dry_run: bool,
    /// How many failed attempts a message gets before it is given up on.
    pub max_attempts: u32,
    /// Path of the processing-state database.
    pub state_path: PathBuf,
    /// Time budget for each health probe.
    pub probe_timeout: Duration,
}

fn require(key: &str, hint: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        }),
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Build and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap = ImapConfig {
            host: require("IMAP_HOST", "Set it to the IMAP server hostname.")?,
            port: parse_var("IMAP_PORT", 993)?,
            username: require("IMAP_USERNAME", "Set it to the mailbox login.")?,
            password: SecretString::from(require(
                "IMAP_PASSWORD",
                "Set it to the mailbox password.",
            )?),
            folder: std::env::var("IMAP_FOLDER").unwrap_or_else(|_| "INBOX".to_string()),
            sender_filter: std::env::var("IMAP_SENDER_FILTER")
                .unwrap_or_else(|_| "gitlab".to_string()),
        };

        let predictor = PredictorConfig {
            base_url: require(
                "PREDICTOR_URL",
                "Set it to the prediction service base URL.",
            )?
            .trim_end_matches('/')
            .to_string(),
            api_key: std::env::var("PREDICTOR_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            timeout: Duration::from_secs(parse_var("PREDICTOR_TIMEOUT_SECS", 30_u64)?),
        };

        let tracker = TrackerConfig {
            base_url: require("GITLAB_URL", "Set it to the GitLab instance URL.")?
                .trim_end_matches('/')
                .to_string(),
            token: SecretString::from(require(
                "GITLAB_TOKEN",
                "Set it to a GitLab private access token.",
            )?),
            timeout: Duration::from_secs(parse_var("GITLAB_TIMEOUT_SECS", 30_u64)?),
        };

        let config = Self {
            imap,
            predictor,
            tracker,
            poll_interval: Duration::from_secs(parse_var("POLL_INTERVAL_SECS", 60_u64)?),
            confidence_threshold: parse_var("CONFIDENCE_THRESHOLD", 0.7_f32)?,
            dry_run: parse_bool("DRY_RUN", false),
            max_attempts: parse_var("MAX_ATTEMPTS", 3_u32)?,
            state_path: std::env::var("STATE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/assignbot.db")),
            probe_timeout: Duration::from_secs(parse_var("PROBE_TIMEOUT_SECS", 10_u64)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation, separate from `from_env` so it can be tested
    /// without touching the process environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "CONFIDENCE_THRESHOLD".to_string(),
                message: format!(
                    "must be within [0, 1], got {}",
                    self.confidence_threshold
                ),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !self.predictor.base_url.starts_with("http") {
            return Err(ConfigError::InvalidValue {
                key: "PREDICTOR_URL".to_string(),
                message: "must be an http(s) URL".to_string(),
            });
        }
        if !self.tracker.base_url.starts_with("http") {
            return Err(ConfigError::InvalidValue {
                key: "GITLAB_URL".to_string(),
                message: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            imap: ImapConfig {
                host: "imap.example.com".into(),
                port: 993,
                username: "bot".into(),
                password: SecretString::from("secret"),
                folder: "INBOX".into(),
                sender_filter: "gitlab".into(),
            },
            predictor: PredictorConfig {
                base_url: "https://predict.example.com".into(),
                api_key: None,
                timeout: Duration::from_secs(30),
            },
            tracker: TrackerConfig {
                base_url: "https://gitlab.example.com".into(),
                token: SecretString::from("glpat-test"),
                timeout: Duration::from_secs(30),
            },
            poll_interval: Duration::from_secs(60),
            confidence_threshold: 0.7,
            dry_run: false,
            max_attempts: 3,
            state_path: PathBuf::from("/tmp/assignbot.db"),
            probe_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut config = valid_config();
        config.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "CONFIDENCE_THRESHOLD"
        ));
    }

    #[test]
    fn negative_threshold_rejected() {
        let mut config = valid_config();
        config.confidence_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut config = valid_config();
        config.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "POLL_INTERVAL_SECS"
        ));
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let mut config = valid_config();
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_tracker_url_rejected() {
        let mut config = valid_config();
        config.tracker.base_url = "gitlab.example.com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "GITLAB_URL"
        ));
    }
}
