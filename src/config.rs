use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// All configuration knobs recognized by the proxy. Every field has a
/// documented default; there is no CLI flag layer, so the only way to
/// override these is the `HEIMDALL_*` environment variables read by
/// [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub upstreams: Vec<SocketAddr>,
    pub cache_size: usize,
    pub cache_ttl_cap: Duration,
    pub max_concurrent: usize,
    pub upstream_timeout: Duration,
    pub retry_attempts: usize,
    pub health_check_interval: Duration,
    pub log_retention_days: u32,
    pub aggregation_interval: Duration,
    /// TTL used for synthesized custom-mapping responses (default 300s).
    pub custom_mapping_ttl: u32,
    /// Failure threshold before an upstream is marked unhealthy (default 3).
    pub unhealthy_threshold: u32,
    /// Path to the custom-mapping seed JSON file, if any.
    pub mapping_seed_file: Option<String>,
    /// Bind address for the HTTP API adapter; `None` disables it.
    pub http_bind_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:53".parse().expect("default listen_addr is valid"),
            upstreams: vec![
                "8.8.8.8:53".parse().expect("default upstream is valid"),
                "1.1.1.1:53".parse().expect("default upstream is valid"),
            ],
            cache_size: 10_000,
            cache_ttl_cap: Duration::from_secs(5 * 60),
            max_concurrent: 100,
            upstream_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            health_check_interval: Duration::from_secs(30),
            log_retention_days: 30,
            aggregation_interval: Duration::from_secs(60 * 60),
            custom_mapping_ttl: 300,
            unhealthy_threshold: 3,
            mapping_seed_file: None,
            http_bind_addr: Some("127.0.0.1:8080".parse().unwrap()),
        }
    }
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// [`Config::default`] for any knob that isn't set. Invalid values
    /// produce a [`ConfigError`], fatal at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("HEIMDALL_LISTEN_ADDR") {
            config.listen_addr = v
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(v.clone()))?;
        }

        if let Ok(v) = std::env::var("HEIMDALL_UPSTREAMS") {
            config.upstreams = v
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<SocketAddr>()
                        .map_err(|_| ConfigError::InvalidUpstreamServer(s.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if config.upstreams.is_empty() {
                return Err(ConfigError::InvalidUpstreamServer(v));
            }
        }

        config.cache_size = parse_env_usize("HEIMDALL_CACHE_SIZE", config.cache_size)?;
        config.cache_ttl_cap = parse_env_duration_secs("HEIMDALL_CACHE_TTL_CAP", config.cache_ttl_cap)?;
        config.max_concurrent = parse_env_usize("HEIMDALL_MAX_CONCURRENT", config.max_concurrent)?;
        config.upstream_timeout =
            parse_env_duration_secs("HEIMDALL_UPSTREAM_TIMEOUT", config.upstream_timeout)?;
        config.retry_attempts = parse_env_usize("HEIMDALL_RETRY_ATTEMPTS", config.retry_attempts)?;
        config.health_check_interval =
            parse_env_duration_secs("HEIMDALL_HEALTH_CHECK_INTERVAL", config.health_check_interval)?;
        config.log_retention_days =
            parse_env_u32("HEIMDALL_LOG_RETENTION_DAYS", config.log_retention_days)?;
        config.aggregation_interval =
            parse_env_duration_secs("HEIMDALL_AGGREGATION_INTERVAL", config.aggregation_interval)?;
        config.custom_mapping_ttl =
            parse_env_u32("HEIMDALL_CUSTOM_MAPPING_TTL", config.custom_mapping_ttl)?;
        config.unhealthy_threshold =
            parse_env_u32("HEIMDALL_UNHEALTHY_THRESHOLD", config.unhealthy_threshold)?;

        if let Ok(v) = std::env::var("HEIMDALL_MAPPING_SEED_FILE") {
            config.mapping_seed_file = Some(v);
        }

        if let Ok(v) = std::env::var("HEIMDALL_HTTP_BIND_ADDR") {
            config.http_bind_addr = if v.is_empty() {
                None
            } else {
                Some(
                    v.parse()
                        .map_err(|_| ConfigError::InvalidBindAddress(v.clone()))?,
                )
            };
        }

        Ok(config)
    }
}

fn parse_env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidInteger {
            field: key.to_string(),
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidInteger {
            field: key.to_string(),
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => {
            let secs: u64 = v.parse().map_err(|_| ConfigError::InvalidDuration {
                field: key.to_string(),
                value: v,
            })?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 53);
        assert_eq!(config.upstreams.len(), 2);
        assert_eq!(config.cache_size, 10_000);
        assert_eq!(config.max_concurrent, 100);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn rejects_invalid_upstream() {
        // SAFETY: test-only env var mutation, single-threaded test.
        unsafe { std::env::set_var("HEIMDALL_UPSTREAMS", "not-an-address") };
        let result = Config::from_env();
        unsafe { std::env::remove_var("HEIMDALL_UPSTREAMS") };
        assert!(result.is_err());
    }
}
