//! Configuration file loaders.

use crate::env::parse_value;
use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format of `path`; a bare `.env` file counts as [`FileFormat::Env`].
    pub fn detect(path: &Path) -> Result<Self> {
        if path.file_name().and_then(|n| n.to_str()) == Some(".env") {
            return Ok(FileFormat::Env);
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;
        Self::from_extension(ext).ok_or_else(|| ConfigError::UnsupportedFormat(ext.to_string()))
    }

    fn name(&self) -> &'static str {
        match self {
            FileFormat::Json => "JSON",
            FileFormat::Toml => "TOML",
            FileFormat::Env => "env",
        }
    }
}

/// Parses a configuration document into a flat JSON object.
#[derive(Debug, Clone, Copy)]
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        FileFormat::detect(path.as_ref()).map(Self::new)
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        self.parse(&content)
    }

    /// Parse configuration from string
    ///
    /// The document must be a table at its root.
    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content).map_err(|e| self.error(e))?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content).map_err(|e| self.error(e))?;
                serde_json::to_value(table).map_err(|e| self.error(e))?
            }
            FileFormat::Env => parse_env(content),
        };

        if !value.is_object() {
            return Err(self.error("root is not a table"));
        }
        Ok(value)
    }

    fn error(&self, reason: impl ToString) -> ConfigError {
        ConfigError::ParseError {
            format: self.format.name(),
            reason: reason.to_string(),
        }
    }
}

fn parse_env(content: &str) -> Value {
    let mut map = serde_json::Map::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let parsed = if value.len() >= 2
                && (value.starts_with('"') && value.ends_with('"')
                    || value.starts_with('\'') && value.ends_with('\''))
            {
                Value::String(value[1..value.len() - 1].to_string())
            } else {
                parse_value(value)
            };
            map.insert(key.trim().to_lowercase(), parsed);
        }
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let result = loader
            .parse(r#"{"max_retries": 3, "user_agent": "stratus-test"}"#)
            .unwrap();
        assert_eq!(result["max_retries"], 3);
        assert_eq!(result["user_agent"], "stratus-test");
    }

    #[test]
    fn test_json_root_must_be_object() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(matches!(
            loader.parse("[1, 2]"),
            Err(ConfigError::ParseError { format: "JSON", .. })
        ));
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            relax_hostname = true
            so_timeout_ms = 60000
        "#;

        let result = loader.parse(toml).unwrap();
        assert_eq!(result["relax_hostname"], true);
        assert_eq!(result["so_timeout_ms"], 60000);
    }

    #[test]
    fn test_parse_env() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let env = r#"
            MAX_RETRIES=4
            # Comment
            export TRUST_ALL_CERTS=false
            USER_AGENT="stratus test 1.0"
            VERSION='2009'
        "#;

        let result = loader.parse(env).unwrap();
        assert_eq!(result["max_retries"], 4);
        assert_eq!(result["trust_all_certs"], false);
        assert_eq!(result["user_agent"], "stratus test 1.0");
        assert_eq!(result["version"], "2009");
    }

    #[test]
    fn test_malformed_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        assert!(loader.parse("max_retries = ").is_err());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("unknown"), None);
        assert_eq!(
            FileFormat::detect(Path::new("/etc/stratus/.env")).unwrap(),
            FileFormat::Env
        );
        assert!(FileFormat::detect(Path::new("settings.yaml")).is_err());
    }
}
