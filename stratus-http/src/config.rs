//! Pool, executor and transport configuration.

use std::time::Duration;

/// Connection pool configuration. One pool exists per endpoint origin.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live connections to one endpoint.
    pub max_connections: usize,
    /// Requests a connection may serve before it is retired. `0` means unlimited.
    pub max_connection_reuse: u32,
    /// Consecutive transport failures tolerated before the pool shuts down.
    pub max_session_failures: u32,
    /// Times a command may be requeued after transport failures.
    pub max_resubmits: u32,
    /// How long `get_connection` waits for a free connection.
    pub acquire_timeout: Duration,
    /// Interval between idle connection sweeps.
    pub idle_sweep_interval: Duration,
    /// How long `shutdown` waits for the pool to stop.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 12,
            max_connection_reuse: 75,
            max_session_failures: 2,
            max_resubmits: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_sweep_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the maximum live connections per endpoint.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set how many requests a connection may serve.
    pub fn max_connection_reuse(mut self, max: u32) -> Self {
        self.config.max_connection_reuse = max;
        self
    }

    /// Set the consecutive transport failure budget.
    pub fn max_session_failures(mut self, max: u32) -> Self {
        self.config.max_session_failures = max;
        self
    }

    /// Set how often a command may be requeued.
    pub fn max_resubmits(mut self, max: u32) -> Self {
        self.config.max_resubmits = max;
        self
    }

    /// Set the connection acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the idle sweep interval.
    pub fn idle_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.idle_sweep_interval = interval;
        self
    }

    /// Set the shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

/// Executor service configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Commands executing concurrently across all endpoints.
    pub max_concurrent_commands: usize,
    /// Retries after 5xx responses.
    pub max_retries: u32,
    /// Redirects followed per command.
    pub max_redirects: u32,
    /// Base delay of the quadratic retry backoff.
    pub retry_delay_start: Duration,
    /// Upper bound on a single retry delay.
    pub max_retry_delay: Duration,
    /// How long `shutdown` waits for the executor and its pools.
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_commands: 20,
            max_retries: 5,
            max_redirects: 5,
            retry_delay_start: Duration::from_millis(50),
            max_retry_delay: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    /// Set the number of commands that may run at once.
    pub fn max_concurrent_commands(mut self, max: usize) -> Self {
        self.config.max_concurrent_commands = max;
        self
    }

    /// Set the retry limit for server errors.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.config.max_retries = max;
        self
    }

    /// Set the redirect limit.
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Set the base retry delay.
    pub fn retry_delay_start(mut self, delay: Duration) -> Self {
        self.config.retry_delay_start = delay;
        self
    }

    /// Set the maximum retry delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.max_retry_delay = delay;
        self
    }

    /// Set the shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ExecutorConfig {
        self.config
    }
}

/// Settings applied to every connection the reqwest transport opens.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for a whole exchange once connected.
    pub so_timeout: Duration,
    /// User agent header.
    pub user_agent: String,
    /// Accept any server certificate.
    pub trust_all_certs: bool,
    /// Accept certificates whose name does not match the host.
    ///
    /// rustls cannot skip only the name check, so this disables certificate
    /// verification the same way `trust_all_certs` does.
    pub relax_hostname: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            so_timeout: Duration::from_secs(60),
            user_agent: format!("stratus/{}", env!("CARGO_PKG_VERSION")),
            trust_all_certs: false,
            relax_hostname: false,
        }
    }
}

impl TransportConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the exchange timeout.
    pub fn with_so_timeout(mut self, timeout: Duration) -> Self {
        self.so_timeout = timeout;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Accept any server certificate.
    pub fn with_trust_all_certs(mut self, trust: bool) -> Self {
        self.trust_all_certs = trust;
        self
    }

    /// Accept certificates for other host names.
    pub fn with_relax_hostname(mut self, relax: bool) -> Self {
        self.relax_hostname = relax;
        self
    }

    /// Whether certificate verification is disabled.
    pub fn accepts_invalid_certs(&self) -> bool {
        self.trust_all_certs || self.relax_hostname
    }
}
