use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// Worker 节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 未设置时由主机名加随机后缀生成
    pub worker_id: Option<String>,
    pub hostname: Option<String>,
    pub alias: Option<String>,
    pub ip_address: Option<String>,
    pub public_ip: Option<String>,
    pub heartbeat_interval_seconds: u64,
    pub task_poll_timeout_seconds: u64,
    pub error_backoff_ms: u64,
    pub workflows_dir: String,
    pub workspace_dir: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            hostname: None,
            alias: None,
            ip_address: None,
            public_ip: None,
            heartbeat_interval_seconds: 30,
            task_poll_timeout_seconds: 5,
            error_backoff_ms: 1000,
            workflows_dir: "workflows".to_string(),
            workspace_dir: None,
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn task_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.task_poll_timeout_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_optional_not_empty(self.worker_id.as_deref(), "worker.worker_id")?;
        ValidationUtils::validate_optional_not_empty(self.hostname.as_deref(), "worker.hostname")?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.task_poll_timeout_seconds,
            "worker.task_poll_timeout_seconds",
        )?;
        ValidationUtils::validate_not_empty(&self.workflows_dir, "worker.workflows_dir")?;
        if !(1..=60_000).contains(&self.error_backoff_ms) {
            return Err(ConfigError::Validation(
                "worker.error_backoff_ms must be between 1 and 60000".to_string(),
            ));
        }
        Ok(())
    }
}

/// Master 节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub master_id: Option<String>,
    pub lock_ttl_seconds: u64,
    pub lock_refresh_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub worker_check_interval_seconds: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            master_id: None,
            lock_ttl_seconds: 60,
            lock_refresh_interval_seconds: 30,
            heartbeat_timeout_seconds: 90,
            worker_check_interval_seconds: 30,
        }
    }
}

impl MasterConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn lock_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.lock_refresh_interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    pub fn worker_check_interval(&self) -> Duration {
        Duration::from_secs(self.worker_check_interval_seconds)
    }
}

impl ConfigValidator for MasterConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_optional_not_empty(self.master_id.as_deref(), "master.master_id")?;
        ValidationUtils::validate_timeout_seconds(self.lock_ttl_seconds, "master.lock_ttl_seconds")?;
        ValidationUtils::validate_timeout_seconds(
            self.lock_refresh_interval_seconds,
            "master.lock_refresh_interval_seconds",
        )?;
        ValidationUtils::validate_less_than(
            self.lock_refresh_interval_seconds,
            "master.lock_refresh_interval_seconds",
            self.lock_ttl_seconds,
            "master.lock_ttl_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_timeout_seconds,
            "master.heartbeat_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.worker_check_interval_seconds,
            "master.worker_check_interval_seconds",
        )?;
        Ok(())
    }
}
