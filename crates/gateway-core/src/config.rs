//! Process configuration loaded from the environment (§6.1). Out of the
//! core's specified algorithms proper, but still the ambient boot path every
//! runnable build of this gateway needs.

use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version, about = "OpenAI-to-Gemini chat-completions gateway")]
pub struct CliArgs {
    /// Comma-separated upstream Gemini API keys. Required, at least one.
    #[arg(long, env = "GEMINI_API_KEYS")]
    pub gemini_api_keys: Option<String>,

    /// Base cooling period in seconds (>= 60).
    #[arg(long, env = "GEMINI_COOLING_PERIOD")]
    pub gemini_cooling_period: Option<String>,

    /// Per-request upstream timeout in seconds (>= 10).
    #[arg(long, env = "GEMINI_REQUEST_TIMEOUT")]
    pub gemini_request_timeout: Option<String>,

    /// Max retries before a key is marked FAILED; also the dispatcher's attempt ceiling.
    #[arg(long, env = "GEMINI_MAX_RETRIES")]
    pub gemini_max_retries: Option<String>,

    /// Comma-separated client API keys. Empty => insecure mode.
    #[arg(long, env = "SECURITY_ADAPTER_API_KEYS")]
    pub security_adapter_api_keys: Option<String>,

    /// Comma-separated admin API keys. Empty => admin endpoints return 403.
    #[arg(long, env = "SECURITY_ADMIN_API_KEYS")]
    pub security_admin_api_keys: Option<String>,

    #[arg(long, env = "SERVICE_HOST")]
    pub service_host: Option<String>,

    #[arg(long, env = "SERVICE_PORT")]
    pub service_port: Option<String>,

    #[arg(long, env = "SERVICE_LOG_LEVEL")]
    pub service_log_level: Option<String>,

    #[arg(long, env = "SERVICE_CORS_ORIGINS")]
    pub service_cors_origins: Option<String>,

    #[arg(long, env = "SERVICE_ENVIRONMENT")]
    pub service_environment: Option<String>,

    #[arg(long, env = "CACHE_ENABLED")]
    pub cache_enabled: Option<String>,

    #[arg(long, env = "CACHE_MAX_SIZE")]
    pub cache_max_size: Option<String>,

    #[arg(long, env = "CACHE_TTL")]
    pub cache_ttl: Option<String>,

    #[arg(long, env = "CACHE_KEY_PREFIX")]
    pub cache_key_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl: Duration,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_keys: Vec<String>,
    pub gemini_cooling_period: Duration,
    pub gemini_request_timeout: Duration,
    pub gemini_max_retries: u32,
    pub client_api_keys: Vec<String>,
    pub admin_api_keys: Vec<String>,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub cors_origins: Vec<String>,
    pub environment: Environment,
    pub cache: CacheConfig,
}

pub fn load_from_env() -> anyhow::Result<Config> {
    Config::from_args(CliArgs::parse())
}

impl Config {
    pub fn from_args(args: CliArgs) -> anyhow::Result<Self> {
        let gemini_api_keys = split_csv_required(args.gemini_api_keys, "GEMINI_API_KEYS")?;

        let gemini_cooling_period = parse_bounded_u64(
            args.gemini_cooling_period,
            "GEMINI_COOLING_PERIOD",
            300,
            60,
        )?;
        let gemini_request_timeout = parse_bounded_u64(
            args.gemini_request_timeout,
            "GEMINI_REQUEST_TIMEOUT",
            120,
            10,
        )?;
        let gemini_max_retries = parse_bounded_u64(
            args.gemini_max_retries,
            "GEMINI_MAX_RETRIES",
            3,
            1,
        )? as u32;

        let client_api_keys = split_csv_optional(args.security_adapter_api_keys);
        let admin_api_keys = split_csv_optional(args.security_admin_api_keys);

        let host = sanitize(args.service_host).unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match sanitize(args.service_port) {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid SERVICE_PORT value: {raw}"))?,
            None => 8080,
        };
        let log_level = sanitize(args.service_log_level).unwrap_or_else(|| "info".to_string());
        let cors_origins = split_csv_optional(args.service_cors_origins);
        let environment = match sanitize(args.service_environment).as_deref() {
            None | Some("development") => Environment::Development,
            Some("staging") => Environment::Staging,
            Some("production") => Environment::Production,
            Some(other) => bail!("invalid SERVICE_ENVIRONMENT value: {other}"),
        };

        let cache_enabled = parse_bool(args.cache_enabled, "CACHE_ENABLED")?.unwrap_or(false);
        let cache_max_size = match sanitize(args.cache_max_size) {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid CACHE_MAX_SIZE value: {raw}"))?,
            None => 0,
        };
        if cache_enabled && cache_max_size == 0 {
            bail!("CACHE_MAX_SIZE must be > 0 when CACHE_ENABLED is set");
        }
        let cache_ttl = parse_bounded_u64(args.cache_ttl, "CACHE_TTL", 60, 0)?;
        let cache_key_prefix =
            sanitize(args.cache_key_prefix).unwrap_or_else(|| "gateway".to_string());

        Ok(Config {
            gemini_api_keys,
            gemini_cooling_period: Duration::from_secs(gemini_cooling_period),
            gemini_request_timeout: Duration::from_secs(gemini_request_timeout),
            gemini_max_retries,
            client_api_keys,
            admin_api_keys,
            host,
            port,
            log_level,
            cors_origins,
            environment,
            cache: CacheConfig {
                enabled: cache_enabled,
                max_size: cache_max_size,
                ttl: Duration::from_secs(cache_ttl),
                key_prefix: cache_key_prefix,
            },
        })
    }
}

fn sanitize(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn split_csv_optional(value: Option<String>) -> Vec<String> {
    sanitize(value)
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn split_csv_required(value: Option<String>, env_name: &str) -> anyhow::Result<Vec<String>> {
    let items = split_csv_optional(value);
    if items.is_empty() {
        bail!("{env_name} is required and must contain at least one non-empty value");
    }
    Ok(items)
}

fn parse_bounded_u64(
    value: Option<String>,
    env_name: &str,
    default: u64,
    minimum: u64,
) -> anyhow::Result<u64> {
    let Some(raw) = sanitize(value) else {
        return Ok(default);
    };
    let parsed = raw
        .parse::<u64>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    if parsed < minimum {
        bail!("{env_name} must be >= {minimum}, got {parsed}");
    }
    Ok(parsed)
}

fn parse_bool(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize(value) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => bail!("invalid {env_name} value: {raw}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_keys(keys: &str) -> CliArgs {
        CliArgs {
            gemini_api_keys: Some(keys.to_string()),
            gemini_cooling_period: None,
            gemini_request_timeout: None,
            gemini_max_retries: None,
            security_adapter_api_keys: None,
            security_admin_api_keys: None,
            service_host: None,
            service_port: None,
            service_log_level: None,
            service_cors_origins: None,
            service_environment: None,
            cache_enabled: None,
            cache_max_size: None,
            cache_ttl: None,
            cache_key_prefix: None,
        }
    }

    #[test]
    fn missing_api_keys_fails() {
        let args = args_with_keys("");
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn trims_and_drops_empty_entries() {
        let args = args_with_keys(" k1, ,k2 ,");
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.gemini_api_keys, vec!["k1", "k2"]);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let args = args_with_keys("k1");
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.gemini_cooling_period, Duration::from_secs(300));
        assert_eq!(config.gemini_request_timeout, Duration::from_secs(120));
        assert_eq!(config.gemini_max_retries, 3);
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn cache_enabled_requires_max_size() {
        let mut args = args_with_keys("k1");
        args.cache_enabled = Some("true".to_string());
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn rejects_cooling_period_below_minimum() {
        let mut args = args_with_keys("k1");
        args.gemini_cooling_period = Some("10".to_string());
        assert!(Config::from_args(args).is_err());
    }
}
