//! Connection and retry settings for a [`RestContext`](crate::RestContext).
//!
//! Settings are flat so they map one-to-one onto environment variables:
//! `STRATUS_MAX_RETRIES=3` sets [`ContextSettings::max_retries`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use stratus_config::{ConfigManager, ConfigValidator, FileFormat, Result, Validate};
use stratus_http::{ExecutorConfig, PoolConfig, TransportConfig};

/// Prefix of the environment variables read by [`ContextSettings::from_env`].
pub const ENV_PREFIX: &str = "STRATUS";

/// Settings that shape pools, retries and the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Provider endpoint, when not given to the builder directly.
    pub endpoint: Option<String>,
    /// Commands executing at once across every endpoint of the context.
    pub max_connections_per_context: usize,
    /// Live connections to one endpoint.
    pub max_connections_per_host: usize,
    /// Requests a connection serves before it is retired; `0` is unlimited.
    pub max_connection_reuse: u32,
    /// Consecutive transport failures before a pool gives up.
    pub max_session_failures: u32,
    /// Times a command is requeued after transport failures.
    pub max_resubmits: u32,
    /// TCP connect timeout.
    pub connection_timeout_ms: u64,
    /// Read timeout of one exchange.
    pub so_timeout_ms: u64,
    /// Wait for a free pooled connection.
    pub acquire_timeout_ms: u64,
    /// How often idle connections are checked.
    pub idle_sweep_interval_ms: u64,
    /// Retries after server errors.
    pub max_retries: u32,
    /// Redirects followed per command.
    pub max_redirects: u32,
    /// Base of the quadratic retry backoff.
    pub retry_delay_start_ms: u64,
    /// Cap on one retry delay.
    pub max_retry_delay_ms: u64,
    /// Accept certificates issued for another host name.
    pub relax_hostname: bool,
    /// Accept any server certificate.
    pub trust_all_certs: bool,
    pub user_agent: String,
    /// How long closing waits for the executor and its pools.
    pub shutdown_timeout_ms: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        let executor = ExecutorConfig::default();
        let transport = TransportConfig::default();
        Self {
            endpoint: None,
            max_connections_per_context: executor.max_concurrent_commands,
            max_connections_per_host: pool.max_connections,
            max_connection_reuse: pool.max_connection_reuse,
            max_session_failures: pool.max_session_failures,
            max_resubmits: pool.max_resubmits,
            connection_timeout_ms: millis(transport.connect_timeout),
            so_timeout_ms: millis(transport.so_timeout),
            acquire_timeout_ms: millis(pool.acquire_timeout),
            idle_sweep_interval_ms: millis(pool.idle_sweep_interval),
            max_retries: executor.max_retries,
            max_redirects: executor.max_redirects,
            retry_delay_start_ms: millis(executor.retry_delay_start),
            max_retry_delay_ms: millis(executor.max_retry_delay),
            relax_hostname: transport.relax_hostname,
            trust_all_certs: transport.trust_all_certs,
            user_agent: transport.user_agent,
            shutdown_timeout_ms: millis(executor.shutdown_timeout),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ContextSettings {
    /// Defaults overridden by `STRATUS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);
        manager.load_env()?;
        Self::from_manager(&manager)
    }

    /// Defaults overridden by a JSON, TOML or `.env` file, then by the
    /// environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);
        // .env files are layered as variables so the prefix applies to them too.
        if matches!(FileFormat::detect(path.as_ref()), Ok(FileFormat::Env)) {
            manager.load_dotenv(path)?;
        } else {
            manager.load_file(path)?;
        }
        manager.load_env()?;
        Self::from_manager(&manager)
    }

    /// Extract validated settings from values already loaded.
    pub fn from_manager(manager: &ConfigManager) -> Result<Self> {
        manager.load_validated()
    }

    /// Per-endpoint pool settings.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::builder()
            .max_connections(self.max_connections_per_host)
            .max_connection_reuse(self.max_connection_reuse)
            .max_session_failures(self.max_session_failures)
            .max_resubmits(self.max_resubmits)
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .idle_sweep_interval(Duration::from_millis(self.idle_sweep_interval_ms))
            .shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .build()
    }

    /// Executor service settings.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::builder()
            .max_concurrent_commands(self.max_connections_per_context)
            .max_retries(self.max_retries)
            .max_redirects(self.max_redirects)
            .retry_delay_start(Duration::from_millis(self.retry_delay_start_ms))
            .max_retry_delay(Duration::from_millis(self.max_retry_delay_ms))
            .shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .build()
    }

    /// Settings for the reqwest transport.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default()
            .with_connect_timeout(Duration::from_millis(self.connection_timeout_ms))
            .with_so_timeout(Duration::from_millis(self.so_timeout_ms))
            .with_user_agent(self.user_agent.clone())
            .with_trust_all_certs(self.trust_all_certs)
            .with_relax_hostname(self.relax_hostname)
    }
}

impl Validate for ContextSettings {
    fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.endpoint {
            ConfigValidator::is_url(endpoint, "endpoint")?;
        }
        ConfigValidator::at_least(
            self.max_connections_per_context,
            1,
            "max_connections_per_context",
        )?;
        ConfigValidator::at_least(self.max_connections_per_host, 1, "max_connections_per_host")?;
        ConfigValidator::at_least(self.connection_timeout_ms, 1, "connection_timeout_ms")?;
        ConfigValidator::at_least(self.so_timeout_ms, 1, "so_timeout_ms")?;
        ConfigValidator::at_least(self.acquire_timeout_ms, 1, "acquire_timeout_ms")?;
        ConfigValidator::at_least(self.idle_sweep_interval_ms, 1, "idle_sweep_interval_ms")?;
        ConfigValidator::ordered(
            self.retry_delay_start_ms,
            self.max_retry_delay_ms,
            "retry_delay_start_ms",
            "max_retry_delay_ms",
        )?;
        ConfigValidator::not_empty(&self.user_agent, "user_agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_config::ConfigError;

    #[test]
    fn test_defaults_match_component_defaults() {
        let settings = ContextSettings::default();
        assert_eq!(settings.acquire_timeout_ms, 5000);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.max_redirects, 5);
        assert_eq!(settings.retry_delay_start_ms, 50);
        assert!(settings.validate().is_ok());

        let pool = settings.pool_config();
        assert_eq!(pool.max_connections, settings.max_connections_per_host);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_style_values_override_defaults() {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);
        manager.load_vars([
            ("STRATUS_MAX_CONNECTIONS_PER_HOST", "3"),
            ("STRATUS_RELAX_HOSTNAME", "true"),
            ("STRATUS_USER_AGENT", "stratus-test/2.0"),
            ("STRATUS_ENDPOINT", "https://ec2.us-east-1.amazonaws.com/"),
        ]);

        let settings = ContextSettings::from_manager(&manager).unwrap();
        assert_eq!(settings.max_connections_per_host, 3);
        assert!(settings.relax_hostname);
        assert_eq!(settings.user_agent, "stratus-test/2.0");
        assert_eq!(
            settings.endpoint.as_deref(),
            Some("https://ec2.us-east-1.amazonaws.com/")
        );

        let transport = settings.transport_config();
        assert!(transport.accepts_invalid_certs());
        assert_eq!(transport.user_agent, "stratus-test/2.0");
    }

    #[test]
    fn test_executor_config_mapping() {
        let settings = ContextSettings {
            max_connections_per_context: 4,
            max_retries: 1,
            retry_delay_start_ms: 10,
            max_retry_delay_ms: 20,
            ..ContextSettings::default()
        };
        let config = settings.executor_config();
        assert_eq!(config.max_concurrent_commands, 4);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay_start, Duration::from_millis(10));
        assert_eq!(config.max_retry_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let settings = ContextSettings {
            max_connections_per_host: 0,
            ..ContextSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError { ref field, .. })
                if field == "max_connections_per_host"
        ));

        let settings = ContextSettings {
            retry_delay_start_ms: 20_000,
            max_retry_delay_ms: 10_000,
            ..ContextSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = ContextSettings {
            endpoint: Some("ftp://example.com".into()),
            ..ContextSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_wrongly_typed_value_is_reported() {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);
        manager.load_vars([("STRATUS_MAX_RETRIES", "lots")]);
        assert!(matches!(
            ContextSettings::from_manager(&manager),
            Err(ConfigError::DeserializationError { .. })
        ));
    }
}
