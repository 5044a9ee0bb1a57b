use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            organization: None,
            base_url: DEFAULT_BASE_URL.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::Config(format!(
                "LOG_LEVEL must be one of debug, info, warn, error (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

/// Settings for the bundled provider and the demos' log output.
///
/// Loaded explicitly and passed to whatever needs it; nothing in the crate
/// reads the environment on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from the process environment.
    ///
    /// - `OPENAI_API_KEY`: required
    /// - `OPENAI_MODEL`: default `gpt-4o-mini`
    /// - `OPENAI_ORG`: optional
    /// - `OPENAI_BASE_URL`: default `https://api.openai.com/v1`
    /// - `LOG_LEVEL`: debug, info, warn or error (default info)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup` instead of the process environment. Empty
    /// values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY")
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;

        let mut openai = OpenAiConfig::new(api_key);
        if let Some(model) = get("OPENAI_MODEL") {
            openai.model = model;
        }
        openai.organization = get("OPENAI_ORG");
        if let Some(url) = get("OPENAI_BASE_URL") {
            openai.base_url = url.trim_end_matches('/').to_string();
        }

        let level = get("LOG_LEVEL")
            .map(|l| l.parse::<LogLevel>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            openai,
            logging: LoggingConfig { level },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn loads_defaults() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();

        assert_eq!(config.openai.api_key, "sk-test");
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.openai.base_url, "https://api.openai.com/v1");
        assert!(config.openai.organization.is_none());
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn overrides_apply() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OPENAI_ORG", "org-1"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.openai.model, "gpt-4o");
        assert_eq!(config.openai.organization.as_deref(), Some("org-1"));
        assert_eq!(config.openai.base_url, "http://localhost:8080/v1");
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "k"), ("LOG_LEVEL", "loud")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("loud")));
    }

    #[test]
    fn log_level_round_trips_through_str() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert_eq!(level.as_str().parse::<LogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn deserializes_without_logging_section() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "openai": {
                "api_key": "k",
                "model": "m",
                "base_url": "u",
                "timeout": {"secs": 5, "nanos": 0}
            }
        }))
        .unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.openai.timeout, Duration::from_secs(5));
    }
}
