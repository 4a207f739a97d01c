use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub rollup: RollupSettings,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub stats_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub enabled: bool,
    pub worker_count: usize,
    pub queue_size: usize,
    /// Base URL task paths are delivered to, e.g. `http://127.0.0.1:8080`.
    pub handler_base_url: String,
    pub max_retry_secs: u64,
}

impl QueueConfig {
    pub fn max_retry_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupSettings {
    pub max_conflict_retries: u32,
}

impl RollupConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let default_handler = format!("http://127.0.0.1:{}", common_config.port);

        Ok(RollupConfig {
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("rollup_db"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
                stats_ttl_secs: parse_env("STATS_CACHE_TTL_SECS", 300)?,
            },
            queue: QueueConfig {
                enabled: parse_env("QUEUE_ENABLED", true)?,
                worker_count: parse_env("QUEUE_WORKER_COUNT", 4)?,
                queue_size: parse_env("QUEUE_SIZE", 1000)?,
                handler_base_url: get_env("QUEUE_HANDLER_BASE_URL", Some(&default_handler), false)?,
                max_retry_secs: parse_env("QUEUE_MAX_RETRY_SECS", 300)?,
            },
            rollup: RollupSettings {
                max_conflict_retries: parse_env("ROLLUP_MAX_CONFLICT_RETRIES", 3)?,
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            common: common_config,
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => parse_value(key, &val),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_accepts_numbers_and_bools() {
        let workers: usize = parse_value("QUEUE_WORKER_COUNT", " 8 ").unwrap();
        assert_eq!(workers, 8);

        let enabled: bool = parse_value("QUEUE_ENABLED", "false").unwrap();
        assert!(!enabled);
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        let result: Result<u64, _> = parse_value("QUEUE_MAX_RETRY_SECS", "soon");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("QUEUE_MAX_RETRY_SECS"));
    }

    #[test]
    fn test_get_env_falls_back_to_default_outside_prod() {
        let value = get_env("ROLLUP_TEST_SURELY_UNSET_VAR", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn test_get_env_required_in_prod() {
        let result = get_env("ROLLUP_TEST_SURELY_UNSET_VAR", Some("fallback"), true);
        assert!(result.is_err());
    }
}
