use std::sync::Arc;

use osm_core::{CoordinationStore, Task, TaskResult, WorkerInfo, WorkflowExecutor, WorkflowLoader};
use osm_errors::{DistributedError, DistributedResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::components::{HeartbeatManager, TaskExecutionManager, WorkerLifecycle, WorkerStats};
use crate::config::WorkerServiceConfig;

/// Worker服务
///
/// 加入Worker池后在前台循环弹出任务，一次只执行一个；
/// 心跳在后台任务中独立发送。取消令牌只在两次弹出之间检查，
/// 已弹出的任务总会执行完并写回结果。
pub struct WorkerService {
    config: WorkerServiceConfig,
    store: Arc<dyn CoordinationStore>,
    lifecycle: Arc<WorkerLifecycle>,
    heartbeat_manager: Arc<HeartbeatManager>,
    task_execution_manager: Arc<TaskExecutionManager>,
}

impl WorkerService {
    pub fn new(
        config: WorkerServiceConfig,
        store: Arc<dyn CoordinationStore>,
        loader: Arc<dyn WorkflowLoader>,
        executor: Arc<dyn WorkflowExecutor>,
    ) -> Self {
        let info = WorkerInfo::new(config.worker_id.clone(), config.hostname.clone())
            .with_ip_address(config.ip_address.clone())
            .with_public_ip(config.public_ip.clone())
            .with_alias(config.alias.clone());

        let lifecycle = Arc::new(WorkerLifecycle::new(info, Arc::clone(&store)));
        let heartbeat_manager = Arc::new(HeartbeatManager::new(
            config.worker_id.clone(),
            Arc::clone(&store),
            config.heartbeat_interval,
        ));
        let task_execution_manager = Arc::new(TaskExecutionManager::new(
            config.worker_id.clone(),
            loader,
            executor,
            config.workspace_dir.clone(),
        ));

        Self {
            config,
            store,
            lifecycle,
            heartbeat_manager,
            task_execution_manager,
        }
    }

    pub fn builder(config: WorkerServiceConfig, store: Arc<dyn CoordinationStore>) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(config, store)
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// 加入Worker池，失败即为致命的启动错误
    pub async fn join(&self) -> DistributedResult<()> {
        self.lifecycle.join().await
    }

    /// 加入并运行直到令牌取消，退出前注销自身
    pub async fn run(&self, cancel: CancellationToken) -> DistributedResult<()> {
        self.join().await?;

        let heartbeat_token = cancel.child_token();
        let heartbeat_handle = self
            .heartbeat_manager
            .start_heartbeat_task(heartbeat_token.clone());

        info!("Worker service {} started successfully", self.config.worker_id);
        self.poll_loop(&cancel).await;

        info!("停止worker服务: {}", self.config.worker_id);
        heartbeat_token.cancel();
        if let Err(e) = heartbeat_handle.await {
            warn!("心跳任务退出异常: {}", e);
        }

        self.shutdown().await
    }

    async fn poll_loop(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            match self.store.pop_task(self.config.task_poll_timeout).await {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                }
                Ok(None) => {
                    debug!("轮询超时, 没有待执行任务");
                }
                Err(e) => {
                    warn!("弹出任务失败: {}, {:?} 后重试", e, self.config.error_backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    /// 执行一个已弹出的任务并写回结果
    ///
    /// 存储写入失败只记录日志，执行本身不会因此中断。
    pub async fn process_task(&self, mut task: Task) -> TaskResult {
        task.mark_running(&self.config.worker_id);
        if let Err(e) = self.store.set_task_running(&task).await {
            error!("写入运行中任务 {} 失败: {}", task.id, e);
        }
        self.lifecycle.mark_busy(&task.id).await;

        let result = self.task_execution_manager.execute(&task).await;

        if let Err(e) = self.store.set_task_result(&result).await {
            error!("写入任务结果 {} 失败: {}", task.id, e);
        }
        if let Err(e) = self.store.remove_task_running(&task.id).await {
            error!("删除运行中任务 {} 失败: {}", task.id, e);
        }
        self.lifecycle.finish_task(result.is_success()).await;

        result
    }

    pub async fn stats(&self) -> WorkerStats {
        self.lifecycle.stats().await
    }

    pub async fn info(&self) -> WorkerInfo {
        self.lifecycle.info().await
    }

    async fn shutdown(&self) -> DistributedResult<()> {
        let leave_result = self.lifecycle.leave().await;
        if let Err(e) = &leave_result {
            warn!("从Worker池注销失败: {}", e);
        }
        if self.config.close_store_on_shutdown {
            self.store.close().await?;
        }
        info!("Worker服务 {} 已停止", self.config.worker_id);
        leave_result
    }
}

/// Builder for WorkerService
pub struct WorkerServiceBuilder {
    config: WorkerServiceConfig,
    store: Arc<dyn CoordinationStore>,
    loader: Option<Arc<dyn WorkflowLoader>>,
    executor: Option<Arc<dyn WorkflowExecutor>>,
}

impl WorkerServiceBuilder {
    pub fn new(config: WorkerServiceConfig, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            config,
            store,
            loader: None,
            executor: None,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn WorkflowExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> DistributedResult<WorkerService> {
        let loader = self
            .loader
            .ok_or_else(|| DistributedError::Internal("Workflow loader is required".to_string()))?;
        let executor = self.executor.ok_or_else(|| {
            DistributedError::Internal("Workflow executor is required".to_string())
        })?;

        Ok(WorkerService::new(self.config, self.store, loader, executor))
    }
}
