use std::time::Duration;

use uuid::Uuid;

/// Master服务配置
#[derive(Debug, Clone)]
pub struct MasterServiceConfig {
    pub master_id: String,
    pub lock_ttl: Duration,
    /// 必须小于 `lock_ttl`
    pub lock_refresh_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub worker_check_interval: Duration,
    /// 退出时是否关闭存储连接，多个服务共享同一存储时由组合根负责关闭
    pub close_store_on_shutdown: bool,
}

impl Default for MasterServiceConfig {
    fn default() -> Self {
        Self {
            master_id: generate_master_id(),
            lock_ttl: Duration::from_secs(60),
            lock_refresh_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            worker_check_interval: Duration::from_secs(30),
            close_store_on_shutdown: true,
        }
    }
}

impl MasterServiceConfig {
    pub fn with_master_id(mut self, master_id: impl Into<String>) -> Self {
        self.master_id = master_id.into();
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration, refresh_interval: Duration) -> Self {
        self.lock_ttl = ttl;
        self.lock_refresh_interval = refresh_interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_worker_check_interval(mut self, interval: Duration) -> Self {
        self.worker_check_interval = interval;
        self
    }

    pub fn with_close_store_on_shutdown(mut self, close: bool) -> Self {
        self.close_store_on_shutdown = close;
        self
    }
}

/// 生成 `master-<uuid>` 形式的实例ID
pub fn generate_master_id() -> String {
    format!("master-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MasterServiceConfig::default();
        assert!(config.master_id.starts_with("master-"));
        assert_eq!(config.lock_ttl, Duration::from_secs(60));
        assert!(config.lock_refresh_interval < config.lock_ttl);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(config.worker_check_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_master_ids_are_unique() {
        assert_ne!(generate_master_id(), generate_master_id());
    }
}
