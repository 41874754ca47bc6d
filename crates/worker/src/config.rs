use std::path::PathBuf;
use std::time::Duration;

use osm_core::generate_worker_id;

/// Configuration for WorkerService
#[derive(Debug, Clone)]
pub struct WorkerServiceConfig {
    pub worker_id: String,
    pub hostname: String,
    pub alias: Option<String>,
    pub ip_address: Option<String>,
    pub public_ip: Option<String>,
    pub heartbeat_interval: Duration,
    pub task_poll_timeout: Duration,
    pub error_backoff: Duration,
    /// 每个任务在该目录下拥有以任务ID命名的工作目录
    pub workspace_dir: Option<PathBuf>,
    /// 退出时是否关闭存储连接，多个服务共享同一存储时由组合根负责关闭
    pub close_store_on_shutdown: bool,
}

impl Default for WorkerServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WorkerServiceConfig {
    pub fn builder() -> WorkerServiceConfigBuilder {
        WorkerServiceConfigBuilder::new()
    }
}

/// Builder for WorkerServiceConfig
pub struct WorkerServiceConfigBuilder {
    worker_id: Option<String>,
    config: WorkerServiceConfig,
}

impl Default for WorkerServiceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerServiceConfigBuilder {
    pub fn new() -> Self {
        Self {
            worker_id: None,
            config: WorkerServiceConfig {
                worker_id: String::new(),
                hostname: local_hostname(),
                alias: None,
                ip_address: None,
                public_ip: None,
                heartbeat_interval: Duration::from_secs(30),
                task_poll_timeout: Duration::from_secs(5),
                error_backoff: Duration::from_secs(1),
                workspace_dir: None,
                close_store_on_shutdown: true,
            },
        }
    }

    /// 未设置时由主机名生成
    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    pub fn alias(mut self, alias: Option<String>) -> Self {
        self.config.alias = alias;
        self
    }

    pub fn ip_address(mut self, ip_address: Option<String>) -> Self {
        self.config.ip_address = ip_address;
        self
    }

    pub fn public_ip(mut self, public_ip: Option<String>) -> Self {
        self.config.public_ip = public_ip;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn task_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_poll_timeout = timeout;
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.config.error_backoff = backoff;
        self
    }

    pub fn workspace_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.workspace_dir = dir;
        self
    }

    pub fn close_store_on_shutdown(mut self, close: bool) -> Self {
        self.config.close_store_on_shutdown = close;
        self
    }

    pub fn build(self) -> WorkerServiceConfig {
        let mut config = self.config;
        config.worker_id = self
            .worker_id
            .unwrap_or_else(|| generate_worker_id(&config.hostname));
        config
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
