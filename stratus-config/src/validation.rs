//! Configuration validation.

use crate::{ConfigError, Result};
use std::fmt::Display;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Common validation rules returning [`ConfigError::ValidationError`].
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("{} is not between {} and {}", value, min, max),
            ));
        }
        Ok(())
    }

    /// Validate that a number is at least `min`
    pub fn at_least<T: PartialOrd + Display>(value: T, min: T, field: &str) -> Result<()> {
        if value < min {
            return Err(ConfigError::invalid(
                field,
                format!("{} is less than {}", value, min),
            ));
        }
        Ok(())
    }

    /// Validate that `lower` does not exceed `upper`
    pub fn ordered<T: PartialOrd + Display>(
        lower: T,
        upper: T,
        lower_field: &str,
        upper_field: &str,
    ) -> Result<()> {
        if lower > upper {
            return Err(ConfigError::invalid(
                lower_field,
                format!("{} exceeds {} ({})", lower, upper_field, upper),
            ));
        }
        Ok(())
    }

    /// Validate that a value is in a list of allowed values
    pub fn one_of<T: PartialEq + Display>(value: &T, allowed: &[T], field: &str) -> Result<()> {
        if !allowed.contains(value) {
            return Err(ConfigError::invalid(
                field,
                format!("{} is not an allowed value", value),
            ));
        }
        Ok(())
    }

    /// Validate URL format
    pub fn is_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::invalid(field, "must be an http or https URL"));
        }
        Ok(())
    }
}
