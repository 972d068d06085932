use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

pub const FALLBACK_TIMEZONE: Tz = chrono_tz::America::Chicago;

const MAX_EVENT_WINDOW_DAYS: i64 = 366;
const MAX_ROW_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub default_timezone: Tz,
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub model_timeout_seconds: u64,
    pub history_limit: usize,
    pub pending_task_limit: usize,
    pub event_window_days: i64,
    pub request_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".into(),
            api_port: 8000,
            database_path: PathBuf::from("./data/assistant.db"),
            default_timezone: FALLBACK_TIMEZONE,
            openai_base_url: "https://api.openai.com".into(),
            openai_api_key: String::new(),
            openai_model: "gpt-3.5-turbo".into(),
            max_output_tokens: 500,
            temperature: 0.7,
            model_timeout_seconds: 60,
            history_limit: 10,
            pending_task_limit: 5,
            event_window_days: 2,
            request_timeout_seconds: 120,
        }
    }
}

/// Parse `key` from `lookup`, falling back to `default` when unset.
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let default_timezone = match lookup("DEFAULT_TIMEZONE") {
            Some(name) => name.trim().parse::<Tz>().unwrap_or_else(|_| {
                warn!("Unknown DEFAULT_TIMEZONE '{}', using {}", name, FALLBACK_TIMEZONE);
                FALLBACK_TIMEZONE
            }),
            None => defaults.default_timezone,
        };

        let openai_api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        if openai_api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; chat requests will fail until it is configured");
        }

        let temperature: f32 = parse_var(&lookup, "TEMPERATURE", defaults.temperature)?;
        if !(0.0..=2.0).contains(&temperature) {
            anyhow::bail!("TEMPERATURE must be between 0 and 2, got {}", temperature);
        }

        let event_window_days: i64 = parse_var(&lookup, "EVENT_WINDOW_DAYS", defaults.event_window_days)?;
        if !(0..=MAX_EVENT_WINDOW_DAYS).contains(&event_window_days) {
            anyhow::bail!(
                "EVENT_WINDOW_DAYS must be between 0 and {}, got {}",
                MAX_EVENT_WINDOW_DAYS,
                event_window_days
            );
        }
        let history_limit: usize = parse_var(&lookup, "HISTORY_LIMIT", defaults.history_limit)?;
        let pending_task_limit: usize = parse_var(&lookup, "PENDING_TASK_LIMIT", defaults.pending_task_limit)?;
        for (key, value) in [("HISTORY_LIMIT", history_limit), ("PENDING_TASK_LIMIT", pending_task_limit)] {
            if value > MAX_ROW_LIMIT {
                anyhow::bail!("{} must be at most {}, got {}", key, MAX_ROW_LIMIT, value);
            }
        }

        Ok(Self {
            api_host: lookup("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_var(&lookup, "API_PORT", defaults.api_port)?,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            default_timezone,
            openai_base_url: lookup("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            openai_api_key,
            openai_model: lookup("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            max_output_tokens: parse_var(&lookup, "MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
            temperature,
            model_timeout_seconds: parse_var(&lookup, "MODEL_TIMEOUT_SECONDS", defaults.model_timeout_seconds)?,
            history_limit,
            pending_task_limit,
            event_window_days,
            request_timeout_seconds: parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- Default Time Zone: {}", self.default_timezone);
        info!("- Model: {} via {}", self.openai_model, self.openai_base_url);
        info!("- API Key: {}", if self.openai_api_key.is_empty() { "unset" } else { "set" });
        info!("- Max Output Tokens: {}", self.max_output_tokens);
        info!("- Temperature: {}", self.temperature);
        info!("- Model Timeout: {}s", self.model_timeout_seconds);
        info!("- History Limit: {}", self.history_limit);
        info!("- Pending Task Limit: {}", self.pending_task_limit);
        info!("- Event Window: +/-{} days", self.event_window_days);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.default_timezone, chrono_tz::America::Chicago);
        assert_eq!(config.openai_model, "gpt-3.5-turbo");
        assert_eq!(config.max_output_tokens, 500);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.pending_task_limit, 5);
        assert_eq!(config.event_window_days, 2);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = from_pairs(&[
            ("API_PORT", "9100"),
            ("DEFAULT_TIMEZONE", "Europe/Berlin"),
            ("OPENAI_BASE_URL", "http://localhost:1234/"),
            ("TEMPERATURE", "0.2"),
            ("HISTORY_LIMIT", "4"),
        ])
        .unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.default_timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.openai_base_url, "http://localhost:1234");
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.history_limit, 4);
    }

    #[test]
    fn test_invalid_timezone_falls_back() {
        let config = from_pairs(&[("DEFAULT_TIMEZONE", "Mars/Olympus_Mons")]).unwrap();
        assert_eq!(config.default_timezone, FALLBACK_TIMEZONE);
    }

    #[test]
    fn test_malformed_numbers_are_errors() {
        let err = from_pairs(&[("API_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
        assert!(from_pairs(&[("TEMPERATURE", "5.0")]).is_err());
    }

    #[test]
    fn test_limits_are_range_checked() {
        let err = from_pairs(&[("EVENT_WINDOW_DAYS", "100000000000000")]).unwrap_err();
        assert!(err.to_string().contains("EVENT_WINDOW_DAYS"));
        assert!(from_pairs(&[("EVENT_WINDOW_DAYS", "-1")]).is_err());
        assert!(from_pairs(&[("HISTORY_LIMIT", "5000")]).is_err());
        assert!(from_pairs(&[("PENDING_TASK_LIMIT", "-3")]).is_err());

        let config = from_pairs(&[("EVENT_WINDOW_DAYS", "0"), ("HISTORY_LIMIT", "1000")]).unwrap();
        assert_eq!(config.event_window_days, 0);
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn test_api_addr_parsing() {
        let config = Config::default();
        assert_eq!(config.api_addr().unwrap(), "127.0.0.1:8000".parse().unwrap());

        let bad = Config { api_host: "not a host".into(), ..Config::default() };
        assert!(bad.api_addr().is_err());
    }
}
