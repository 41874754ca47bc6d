use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use osm_config::AppConfig;
use osm_core::CoordinationStore;
use osm_infrastructure::create_store;
use osm_master::{Master, MasterServiceConfig};
use osm_worker::{FileWorkflowLoader, ShellExecutor, WorkerService, WorkerServiceConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Master
    Master,
    /// 仅运行Worker
    Worker,
    /// 同一进程内运行Master和Worker
    All,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "master" => Ok(AppMode::Master),
            "worker" => Ok(AppMode::Worker),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMode::Master => f.write_str("master"),
            AppMode::Worker => f.write_str("worker"),
            AppMode::All => f.write_str("all"),
        }
    }
}

/// 主应用程序
///
/// 持有唯一的存储客户端并按模式组装Master/Worker。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn CoordinationStore>,
}

impl Application {
    /// 按配置连接存储并创建应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {}", mode);
        let store = create_store(&config.store)
            .await
            .context("连接存储失败")?;
        Ok(Self::with_store(config, mode, store))
    }

    pub fn with_store(config: AppConfig, mode: AppMode, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            config,
            mode,
            store,
        }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        Arc::clone(&self.store)
    }

    /// 运行到 `shutdown` 被取消；Master失去领导权时返回错误
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("启动应用程序，模式: {}", self.mode);

        match self.mode {
            AppMode::Master => self.run_master(shutdown).await,
            AppMode::Worker => self.run_worker(shutdown).await,
            AppMode::All => self.run_all_components(shutdown).await,
        }
    }

    async fn run_master(&self, shutdown: CancellationToken) -> Result<()> {
        let master = Master::new(self.master_config(true), self.store());
        master.run(shutdown).await.context("Master运行失败")?;
        info!("Master服务已停止");
        Ok(())
    }

    async fn run_worker(&self, shutdown: CancellationToken) -> Result<()> {
        let worker = self.build_worker(true)?;
        worker.run(shutdown).await.context("Worker运行失败")?;
        info!("Worker服务已停止");
        Ok(())
    }

    /// Master和Worker共享同一存储，任一方退出都会停止另一方，最后统一关闭存储
    async fn run_all_components(&self, shutdown: CancellationToken) -> Result<()> {
        info!("启动所有组件");

        let master = Master::new(self.master_config(false), self.store());
        let worker = self.build_worker(false)?;
        let local = shutdown.child_token();

        let master_fut = async {
            let result = master.run(local.clone()).await;
            if let Err(e) = &result {
                error!("Master运行失败: {}", e);
            }
            local.cancel();
            result
        };
        let worker_fut = async {
            let result = worker.run(local.clone()).await;
            if let Err(e) = &result {
                error!("Worker运行失败: {}", e);
            }
            local.cancel();
            result
        };
        let (master_result, worker_result) = tokio::join!(master_fut, worker_fut);

        if let Err(e) = self.store.close().await {
            warn!("关闭存储连接失败: {}", e);
        }
        info!("所有组件已停止");

        master_result.context("Master运行失败")?;
        worker_result.context("Worker运行失败")?;
        Ok(())
    }

    pub fn master_config(&self, close_store_on_shutdown: bool) -> MasterServiceConfig {
        let settings = &self.config.master;
        let mut config = MasterServiceConfig::default()
            .with_lock_ttl(settings.lock_ttl(), settings.lock_refresh_interval())
            .with_heartbeat_timeout(settings.heartbeat_timeout())
            .with_worker_check_interval(settings.worker_check_interval())
            .with_close_store_on_shutdown(close_store_on_shutdown);
        if let Some(id) = &settings.master_id {
            config = config.with_master_id(id.clone());
        }
        config
    }

    pub fn worker_config(&self, close_store_on_shutdown: bool) -> WorkerServiceConfig {
        let settings = &self.config.worker;
        let mut builder = WorkerServiceConfig::builder()
            .alias(settings.alias.clone())
            .ip_address(settings.ip_address.clone())
            .public_ip(settings.public_ip.clone())
            .heartbeat_interval(settings.heartbeat_interval())
            .task_poll_timeout(settings.task_poll_timeout())
            .error_backoff(settings.error_backoff())
            .workspace_dir(settings.workspace_dir.as_ref().map(PathBuf::from))
            .close_store_on_shutdown(close_store_on_shutdown);
        if let Some(hostname) = &settings.hostname {
            builder = builder.hostname(hostname.clone());
        }
        if let Some(id) = &settings.worker_id {
            builder = builder.worker_id(id.clone());
        }
        builder.build()
    }

    fn build_worker(&self, close_store_on_shutdown: bool) -> Result<WorkerService> {
        let config = self.worker_config(close_store_on_shutdown);
        info!(
            "创建Worker服务: {} (workflows: {})",
            config.worker_id, self.config.worker.workflows_dir
        );
        WorkerService::builder(config, self.store())
            .with_loader(Arc::new(FileWorkflowLoader::new(
                &self.config.worker.workflows_dir,
            )))
            .with_executor(Arc::new(ShellExecutor::new()))
            .build()
            .context("创建Worker服务失败")
    }
}
