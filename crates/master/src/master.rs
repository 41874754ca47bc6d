use std::sync::Arc;

use futures::future::join_all;
use osm_core::{CoordinationStore, Task, WorkerInfo};
use osm_errors::{DistributedError, DistributedResult};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MasterServiceConfig;
use crate::leader_election::LeaderElection;
use crate::task_service::{QueueStats, TaskService, TaskStatusView};
use crate::worker_failure_detector::{WorkerFailureDetector, WorkerFailureDetectorConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Starting,
    Leader,
    ShuttingDown,
    Stopped,
}

/// Master节点
///
/// 启动时获取Master锁，之后在后台运行锁刷新和Worker健康检查两个循环。
/// 失去锁时 `run` 返回 `LeadershipLost`，由上层决定是否退出进程。
pub struct Master {
    config: MasterServiceConfig,
    store: Arc<dyn CoordinationStore>,
    leader: Arc<LeaderElection>,
    detector: Arc<WorkerFailureDetector>,
    task_service: TaskService,
    state: RwLock<MasterState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    loops: CancellationToken,
    lost: CancellationToken,
}

impl Master {
    pub fn new(config: MasterServiceConfig, store: Arc<dyn CoordinationStore>) -> Self {
        let leader = Arc::new(LeaderElection::new(
            config.master_id.clone(),
            Arc::clone(&store),
            config.lock_ttl,
            config.lock_refresh_interval,
        ));
        let detector = Arc::new(WorkerFailureDetector::new(
            Arc::clone(&store),
            Arc::clone(&leader),
            Some(WorkerFailureDetectorConfig {
                heartbeat_timeout: config.heartbeat_timeout,
                detection_interval: config.worker_check_interval,
            }),
        ));
        let task_service = TaskService::new(Arc::clone(&store), config.heartbeat_timeout);

        Self {
            config,
            store,
            leader,
            detector,
            task_service,
            state: RwLock::new(MasterState::Starting),
            handles: Mutex::new(Vec::new()),
            loops: CancellationToken::new(),
            lost: CancellationToken::new(),
        }
    }

    pub fn master_id(&self) -> &str {
        &self.config.master_id
    }

    pub async fn state(&self) -> MasterState {
        *self.state.read().await
    }

    pub async fn is_leader(&self) -> bool {
        self.leader.is_leader().await
    }

    pub fn detector(&self) -> &Arc<WorkerFailureDetector> {
        &self.detector
    }

    /// 获取Master锁并启动后台循环
    ///
    /// 锁已被持有时返回 `MasterAlreadyRunning`，不会启动任何循环。
    pub async fn start(&self) -> DistributedResult<()> {
        info!("启动Master: {}", self.config.master_id);
        self.store.ping().await?;
        self.leader.acquire().await?;

        let mut handles = self.handles.lock().await;
        handles.push(
            self.leader
                .start_refresh_task(self.loops.child_token(), self.lost.clone()),
        );
        handles.push(self.detector.start_detection_task(self.loops.child_token()));
        *self.state.write().await = MasterState::Leader;
        info!("Master {} 已成为leader", self.config.master_id);
        Ok(())
    }

    /// 启动并阻塞到取消或失去领导权，返回前总会执行 `shutdown`
    pub async fn run(&self, cancel: CancellationToken) -> DistributedResult<()> {
        self.start().await?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Master收到停止信号");
                Ok(())
            }
            _ = self.lost.cancelled() => {
                error!("Master {} 失去领导权", self.config.master_id);
                Err(DistributedError::LeadershipLost)
            }
        };

        if let Err(e) = self.shutdown().await {
            warn!("Master关闭时出错: {}", e);
        }
        outcome
    }

    /// 停止后台循环，释放仍持有的锁
    pub async fn shutdown(&self) -> DistributedResult<()> {
        {
            let mut state = self.state.write().await;
            if *state == MasterState::Stopped {
                return Ok(());
            }
            *state = MasterState::ShuttingDown;
        }
        info!("停止Master: {}", self.config.master_id);

        self.loops.cancel();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("后台任务异常退出: {}", e);
            }
        }

        let release = self.leader.release().await.map(|_| ());
        if let Err(e) = &release {
            warn!("释放Master锁失败: {}", e);
        }

        if self.config.close_store_on_shutdown {
            if let Err(e) = self.store.close().await {
                warn!("关闭存储连接失败: {}", e);
            }
        }

        *self.state.write().await = MasterState::Stopped;
        info!("Master {} 已停止", self.config.master_id);
        release
    }

    pub async fn submit_task(&self, task: Task) -> DistributedResult<Task> {
        self.task_service.submit_task(task).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> DistributedResult<TaskStatusView> {
        self.task_service.get_task_status(task_id).await
    }

    pub async fn list_workers(&self) -> DistributedResult<Vec<WorkerInfo>> {
        self.task_service.list_workers().await
    }

    pub async fn get_worker(&self, worker_id: &str) -> DistributedResult<WorkerInfo> {
        self.task_service.get_worker(worker_id).await
    }

    pub async fn list_tasks(&self) -> DistributedResult<Vec<Task>> {
        self.task_service.list_tasks().await
    }

    pub async fn queue_stats(&self) -> DistributedResult<QueueStats> {
        self.task_service.queue_stats().await
    }
}
