use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// 协调存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// 进程内存储, 仅用于单进程 all 模式和测试
    Memory,
}

/// 协调存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub command_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379/0".to_string(),
            command_timeout_seconds: 10,
            max_retry_attempts: 3,
            retry_delay_seconds: 1,
        }
    }
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

impl ConfigValidator for StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.backend == StoreBackend::Redis {
            ValidationUtils::validate_redis_url(&self.url, "store.url")?;
        }
        ValidationUtils::validate_timeout_seconds(
            self.command_timeout_seconds,
            "store.command_timeout_seconds",
        )?;
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "store.max_retry_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_config_is_valid() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_url_rejected_for_redis_only() {
        let mut config = StoreConfig {
            url: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let config = StoreConfig {
            max_retry_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
