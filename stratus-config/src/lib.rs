//! Layered configuration for Stratus clients.
//!
//! A [`ConfigManager`] collects flat key/value settings from files, `.env`
//! files and prefixed environment variables; later sources override earlier
//! ones. Typed settings are then extracted with serde and checked through
//! [`Validate`].
//!
//! ```
//! use stratus_config::{ConfigManager, ConfigValidator, Validate, Result};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Limits {
//!     max_retries: u32,
//! }
//!
//! impl Validate for Limits {
//!     fn validate(&self) -> Result<()> {
//!         ConfigValidator::in_range(self.max_retries, 0, 100, "max_retries")
//!     }
//! }
//!
//! let manager = ConfigManager::with_prefix("STRATUS");
//! manager.load_vars([("STRATUS_MAX_RETRIES", "3")]);
//! let limits: Limits = manager.extract().unwrap();
//! assert_eq!(limits.max_retries, 3);
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Shared store of configuration values.
#[derive(Clone, Default)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("env_prefix", &self.env_prefix)
            .field("keys", &self.keys())
            .finish()
    }
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::default(),
            env_prefix: Some(prefix.into()),
        }
    }

    fn env_loader(&self) -> EnvLoader {
        EnvLoader::new(self.env_prefix.clone())
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let vars = self.env_loader().load()?;
        self.insert_raw(vars);
        Ok(())
    }

    /// Load variables from explicit pairs, applying the prefix rules of
    /// [`load_env`](Self::load_env).
    pub fn load_vars<I, K, V>(&self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let vars = self.env_loader().load_from(vars);
        self.insert_raw(vars);
    }

    /// Load prefixed variables from a `.env` file without touching the
    /// process environment.
    pub fn load_dotenv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let load_error = |e: dotenvy::Error| ConfigError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let vars = dotenvy::from_path_iter(path)
            .map_err(load_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(load_error)?;
        self.load_vars(vars);
        Ok(())
    }

    /// Load configuration from file, detecting the format from its name
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let format = FileFormat::detect(path.as_ref())?;
        self.load_file_as(path, format)
    }

    /// Load configuration from file in an explicit format
    pub fn load_file_as(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).load_file(path)?;
        if let Value::Object(map) = data {
            self.config.write().extend(map);
        }
        Ok(())
    }

    fn insert_raw(&self, vars: HashMap<String, String>) {
        let mut config = self.config.write();
        for (key, value) in vars {
            config.insert(key, env::parse_value(&value));
        }
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        self.config.write().insert(key.to_string(), json_value);
        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .config
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    /// Get an integer value
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    /// Get a boolean value
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.config.read().contains_key(key)
    }

    /// Get all configuration keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.config.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Merge configuration from another manager; its values win
    pub fn merge(&self, other: &ConfigManager) {
        if Arc::ptr_eq(&self.config, &other.config) {
            return;
        }
        let other_config = other.config.read().clone();
        self.config.write().extend(other_config);
    }

    /// Deserialize every stored value into `T`
    ///
    /// Keys `T` does not know are ignored unless it denies unknown fields.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        let object = Value::Object(
            self.config
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        serde_json::from_value(object).map_err(|e| ConfigError::DeserializationError {
            key: "<root>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Load and validate configuration
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let validated: T = self.extract()?;
        validated.validate()?;
        Ok(validated)
    }
}
