//! Stratus Logging
//!
//! Process-wide `tracing` setup for Stratus clients, driven by `STRATUS_*`
//! environment variables.
//!
//! Library crates only emit events through the `tracing` macros; an
//! application calls [`init`] (or [`try_init`]) once to install a subscriber.
//!
//! # Usage
//!
//! ```rust
//! stratus_log::init();
//!
//! tracing::info!(endpoint = "https://api.example.com/", "Pool started");
//! tracing::debug!(target: "stratus::wire", ">> GET / HTTP/1.1");
//! ```
//!
//! # Environment Variables
//!
//! - `STRATUS_DEBUG=1` - Enable debug logging
//! - `STRATUS_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `STRATUS_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `STRATUS_LOG_COLOR=1|0` - Enable/disable colors
//! - `STRATUS_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `STRATUS_LOG_MODULE=1|0` - Include the event target
//! - `STRATUS_LOG_WIRE=1` - Log request/response headers and signatures
//!
//! `RUST_LOG`, when set, takes precedence over the level variables.

use once_cell::sync::{Lazy, OnceCell};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, reload};

/// Target used for request and response wire logging.
pub const WIRE_TARGET: &str = "stratus::wire";

/// Target used for string-to-sign logging.
pub const SIGNATURE_TARGET: &str = "stratus::signature";

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum severity that reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Get level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    /// The `EnvFilter` directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log shippers
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure to install the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A filter directive could not be parsed.
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// Another subscriber is already installed.
    #[error("cannot install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

// ============================================================================
// Global Configuration
// ============================================================================

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Reload handle of the installed filter; set once by [`try_init`].
static INSTALLED: OnceCell<FilterHandle> = OnceCell::new();

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include the event target
    pub module_path: bool,
    /// Whether wire and signature targets are raised to debug/trace
    pub wire: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
            module_path: true,
            wire: false,
        }
    }
}

fn flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = lookup("STRATUS_DEBUG").is_some_and(|v| flag(&v));

        let level = lookup("STRATUS_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("STRATUS_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        // Without an explicit setting, color follows the terminal.
        let color = match lookup("STRATUS_LOG_COLOR") {
            Some(v) => flag(&v),
            None => lookup("NO_COLOR").is_none() && lookup("TERM").is_some(),
        };

        let timestamps = lookup("STRATUS_LOG_TIMESTAMPS").is_none_or(|v| flag(&v));
        let module_path = lookup("STRATUS_LOG_MODULE").is_none_or(|v| flag(&v));
        let wire = lookup("STRATUS_LOG_WIRE").is_some_and(|v| flag(&v));

        Self {
            debug,
            level,
            format,
            color,
            timestamps,
            module_path,
            wire,
        }
    }

    /// Filter directives for this configuration, ignoring `RUST_LOG`.
    pub fn directives(&self) -> String {
        directives_for(self.level, self.wire)
    }

    fn env_filter(&self) -> Result<EnvFilter, LogError> {
        match env::var(EnvFilter::DEFAULT_ENV) {
            Ok(value) if !value.trim().is_empty() => Ok(EnvFilter::try_new(value)?),
            _ => Ok(EnvFilter::try_new(self.directives())?),
        }
    }
}

fn directives_for(level: Level, wire: bool) -> String {
    if wire {
        format!(
            "{},{}=debug,{}=trace",
            level.directive(),
            WIRE_TARGET,
            SIGNATURE_TARGET
        )
    } else {
        level.directive().to_string()
    }
}

// ============================================================================
// Subscriber
// ============================================================================

type Filtered = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn format_layer<S>(config: &LogConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.color)
        .with_target(config.module_path);

    match (config.format, config.timestamps) {
        (Format::Pretty, true) => base
            .pretty()
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .boxed(),
        (Format::Pretty, false) => base.pretty().without_time().boxed(),
        (Format::Compact, true) => base
            .compact()
            .with_timer(ChronoLocal::new("%H:%M:%S".to_string()))
            .boxed(),
        (Format::Compact, false) => base.compact().without_time().boxed(),
        #[cfg(feature = "json")]
        (Format::Json, true) => base.json().with_timer(ChronoUtc::rfc_3339()).boxed(),
        #[cfg(feature = "json")]
        (Format::Json, false) => base.json().without_time().boxed(),
        // Without the json feature, fall back to single-line output.
        #[cfg(not(feature = "json"))]
        (Format::Json, true) => base.compact().with_timer(ChronoUtc::rfc_3339()).boxed(),
        #[cfg(not(feature = "json"))]
        (Format::Json, false) => base.compact().without_time().boxed(),
    }
}

fn install(config: &LogConfig) -> Result<FilterHandle, LogError> {
    let (filter, handle) = reload::Layer::new(config.env_filter()?);
    tracing_subscriber::registry()
        .with(filter)
        .with(format_layer::<Filtered>(config))
        .try_init()?;

    DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
    LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
    Ok(handle)
}

// ============================================================================
// Public API
// ============================================================================

/// Install the global subscriber from [`config()`].
///
/// Repeated calls are no-ops. Fails if a subscriber from elsewhere is
/// already installed or `RUST_LOG` holds an invalid directive.
pub fn try_init() -> Result<(), LogError> {
    try_init_with(config())
}

/// Install the global subscriber from an explicit configuration.
///
/// Only the first successful call takes effect.
pub fn try_init_with(config: &LogConfig) -> Result<(), LogError> {
    INSTALLED.get_or_try_init(|| install(config)).map(|_| ())
}

/// Install the global subscriber, ignoring failures.
pub fn init() {
    if let Err(e) = try_init() {
        eprintln!("stratus-log: {}", e);
    }
}

/// Whether [`try_init`] has installed a subscriber.
pub fn is_initialized() -> bool {
    INSTALLED.get().is_some()
}

/// Check if debug logging is enabled.
#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Check if a log level is enabled.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Get current log level.
pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level at runtime.
///
/// Once a subscriber is installed its filter is replaced, which also drops
/// any directives that came from `RUST_LOG`.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    if let Some(handle) = INSTALLED.get() {
        let directives = directives_for(level, config().wire);
        if let Err(e) = handle.reload(EnvFilter::new(directives)) {
            tracing::warn!(error = %e, "Failed to reload log filter");
        }
    }
}

/// Enable or disable debug mode at runtime.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

/// Get the configuration read from the environment.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("invalid"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse("Compact"), Some(Format::Compact));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert!(!config.debug);
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.timestamps);
        assert!(!config.wire);
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[("STRATUS_DEBUG", "true")]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("STRATUS_DEBUG", "1"),
            ("STRATUS_LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.level, Level::Warn);
    }

    #[test]
    fn test_variables_are_read() {
        let config = LogConfig::from_lookup(lookup(&[
            ("STRATUS_LOG_FORMAT", "pretty"),
            ("STRATUS_LOG_COLOR", "0"),
            ("STRATUS_LOG_TIMESTAMPS", "false"),
            ("STRATUS_LOG_MODULE", "0"),
            ("TERM", "xterm"),
        ]));
        assert_eq!(config.format, Format::Pretty);
        assert!(!config.color);
        assert!(!config.timestamps);
        assert!(!config.module_path);
    }

    #[test]
    fn test_color_follows_terminal() {
        assert!(LogConfig::from_lookup(lookup(&[("TERM", "xterm")])).color);
        assert!(!LogConfig::from_lookup(lookup(&[("TERM", "xterm"), ("NO_COLOR", "1")])).color);
    }

    #[test]
    fn test_wire_directives() {
        let config = LogConfig::from_lookup(lookup(&[("STRATUS_LOG_WIRE", "1")]));
        assert_eq!(
            config.directives(),
            "info,stratus::wire=debug,stratus::signature=trace"
        );
        assert_eq!(LogConfig::default().directives(), "info");
    }

    #[test]
    fn test_init_and_set_level() {
        let config = LogConfig {
            format: Format::Compact,
            ..LogConfig::default()
        };
        try_init_with(&config).unwrap();
        assert!(is_initialized());
        try_init_with(&config).unwrap();
        try_init().unwrap();

        set_level(Level::Error);
        assert_eq!(current_level(), Level::Error);
        assert!(!is_level_enabled(Level::Warn));
        assert!(is_level_enabled(Level::Error));

        set_debug(true);
        assert!(is_debug_enabled());
        assert_eq!(current_level(), Level::Debug);
        set_debug(false);
        set_level(Level::Info);
    }
}
