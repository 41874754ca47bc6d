use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that an optional string, when present, is not blank
    pub fn validate_optional_not_empty(value: Option<&str>, field_name: &str) -> ConfigResult<()> {
        match value {
            Some(v) => Self::validate_not_empty(v, field_name),
            None => Ok(()),
        }
    }

    /// Validate that a timeout is reasonable
    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Validate that `smaller` is strictly less than `larger`
    pub fn validate_less_than(
        smaller: u64,
        smaller_name: &str,
        larger: u64,
        larger_name: &str,
    ) -> ConfigResult<()> {
        if smaller >= larger {
            return Err(crate::ConfigError::Validation(format!(
                "{smaller_name} ({smaller}) must be less than {larger_name} ({larger})"
            )));
        }
        Ok(())
    }

    /// Validate that a store URL parses and uses a Redis scheme
    pub fn validate_redis_url(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        let parsed = url::Url::parse(value)?;
        match parsed.scheme() {
            "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
            other => Err(crate::ConfigError::Validation(format!(
                "{field_name} has unsupported scheme '{other}', expected redis:// or rediss://"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("x", "f").is_ok());
        assert!(ValidationUtils::validate_not_empty("  ", "f").is_err());
        assert!(ValidationUtils::validate_optional_not_empty(None, "f").is_ok());
        assert!(ValidationUtils::validate_optional_not_empty(Some(""), "f").is_err());
    }

    #[test]
    fn test_validate_timeout_seconds() {
        assert!(ValidationUtils::validate_timeout_seconds(30, "t").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(0, "t").is_err());
        assert!(ValidationUtils::validate_timeout_seconds(3601, "t").is_err());
    }

    #[test]
    fn test_validate_less_than() {
        assert!(ValidationUtils::validate_less_than(30, "refresh", 60, "ttl").is_ok());
        assert!(ValidationUtils::validate_less_than(60, "refresh", 60, "ttl").is_err());
    }

    #[test]
    fn test_validate_redis_url() {
        assert!(ValidationUtils::validate_redis_url("redis://127.0.0.1:6379/0", "u").is_ok());
        assert!(ValidationUtils::validate_redis_url("rediss://:pw@cache:6380", "u").is_ok());
        assert!(ValidationUtils::validate_redis_url("http://localhost", "u").is_err());
        assert!(ValidationUtils::validate_redis_url("not a url", "u").is_err());
    }
}
