use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::settings::{LogConfig, MasterConfig, StoreConfig, WorkerConfig};
use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

const DEFAULT_CONFIG_PATHS: &[&str] = &["config/osm.toml", "osm.toml", "/etc/osm/osm.toml"];

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub master: MasterConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 指定路径时文件必须存在; 否则依次尝试默认路径, 都不存在则使用默认值.
    /// 环境变量 `OSM_<SECTION>__<FIELD>` 覆盖文件中的值, 例如 `OSM_STORE__URL`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {path}"));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("OSM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(toml_str).context("Failed to parse TOML configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.store.validate()?;
        self.worker.validate()?;
        self.master.validate()?;
        self.logging.validate()?;

        // 心跳超时必须长于 Worker 的心跳间隔, 否则健康的 Worker 也会被判定失联
        ValidationUtils::validate_less_than(
            self.worker.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
            self.master.heartbeat_timeout_seconds,
            "master.heartbeat_timeout_seconds",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{LogLevel, OutputFormat, StoreBackend};
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.store.url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.worker.heartbeat_interval_seconds, 30);
        assert_eq!(config.master.heartbeat_timeout_seconds, 90);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let mut config = AppConfig::default();
        config.worker.heartbeat_interval_seconds = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(config.store.url, parsed.store.url);
        assert_eq!(
            config.master.lock_ttl_seconds,
            parsed.master.lock_ttl_seconds
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_content = r#"
[store]
backend = "memory"

[worker]
worker_id = "scanner-01"
heartbeat_interval_seconds = 10

[logging]
level = "debug"
format = "json"
"#;
        let config = AppConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.worker.worker_id.as_deref(), Some("scanner-01"));
        assert_eq!(config.worker.heartbeat_interval_seconds, 10);
        assert_eq!(config.worker.task_poll_timeout_seconds, 5);
        assert_eq!(config.master.lock_ttl_seconds, 60);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, OutputFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[master]\nmaster_id = \"master-a\"\nlock_ttl_seconds = 20\nlock_refresh_interval_seconds = 5"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.master.master_id.as_deref(), Some("master-a"));
        assert_eq!(config.master.lock_ttl_seconds, 20);
        assert_eq!(config.master.lock_refresh_interval_seconds, 5);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[worker]\nworkflows_dir = \"from-file\"\nerror_backoff_ms = 500"
        )
        .unwrap();

        std::env::set_var("OSM_WORKER__WORKFLOWS_DIR", "/opt/osm/workflows");
        std::env::set_var("OSM_WORKER__ERROR_BACKOFF_MS", "250");
        let config = AppConfig::load(file.path().to_str());
        std::env::remove_var("OSM_WORKER__WORKFLOWS_DIR");
        std::env::remove_var("OSM_WORKER__ERROR_BACKOFF_MS");

        let config = config.unwrap();
        assert_eq!(config.worker.workflows_dir, "/opt/osm/workflows");
        assert_eq!(config.worker.error_backoff_ms, 250);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some("/nonexistent/osm.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let toml_content = r#"
[master]
lock_ttl_seconds = 10
lock_refresh_interval_seconds = 20
"#;
        assert!(AppConfig::from_toml(toml_content).is_err());
    }
}
