use std::sync::Arc;

use chrono::Utc;
use osm_core::{CoordinationStore, WorkerInfo, WorkerStatus};
use osm_errors::DistributedResult;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Worker本地计数快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub tasks_complete: u64,
    pub tasks_failed: u64,
}

/// 维护本Worker在注册表中的记录
pub struct WorkerLifecycle {
    info: RwLock<WorkerInfo>,
    store: Arc<dyn CoordinationStore>,
}

impl WorkerLifecycle {
    pub fn new(info: WorkerInfo, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            info: RwLock::new(info),
            store,
        }
    }

    pub async fn worker_id(&self) -> String {
        self.info.read().await.id.clone()
    }

    /// 加入Worker池：检查连通性、以 idle 状态注册并写入首次心跳
    pub async fn join(&self) -> DistributedResult<()> {
        self.store.ping().await?;

        let snapshot = {
            let mut info = self.info.write().await;
            let now = Utc::now();
            info.status = WorkerStatus::Idle;
            info.current_task_id = None;
            info.joined_at = now;
            info.last_heartbeat = now;
            info.clone()
        };

        self.store.register_worker(&snapshot).await?;
        self.store.update_worker_heartbeat(&snapshot.id).await?;
        info!("Worker {} 已加入 (hostname={})", snapshot.id, snapshot.hostname);
        Ok(())
    }

    /// 标记为 busy 并写回注册表，写入失败只记录日志
    pub async fn mark_busy(&self, task_id: &str) {
        let snapshot = {
            let mut info = self.info.write().await;
            info.mark_busy(task_id);
            info.clone()
        };
        self.publish(&snapshot).await;
    }

    /// 记录任务结果、回到 idle 并写回注册表
    pub async fn finish_task(&self, success: bool) {
        let snapshot = {
            let mut info = self.info.write().await;
            info.record_outcome(success);
            info.mark_idle();
            info.clone()
        };
        self.publish(&snapshot).await;
    }

    /// 从注册表删除自身记录及心跳
    pub async fn leave(&self) -> DistributedResult<()> {
        let worker_id = {
            let mut info = self.info.write().await;
            info.status = WorkerStatus::Offline;
            info.id.clone()
        };
        self.store.remove_worker(&worker_id).await?;
        info!("Worker {} 已注销", worker_id);
        Ok(())
    }

    pub async fn stats(&self) -> WorkerStats {
        let info = self.info.read().await;
        WorkerStats {
            worker_id: info.id.clone(),
            status: info.status,
            current_task_id: info.current_task_id.clone(),
            tasks_complete: info.tasks_complete,
            tasks_failed: info.tasks_failed,
        }
    }

    pub async fn info(&self) -> WorkerInfo {
        self.info.read().await.clone()
    }

    async fn publish(&self, snapshot: &WorkerInfo) {
        if let Err(e) = self.store.register_worker(snapshot).await {
            warn!("更新Worker {} 注册信息失败: {}", snapshot.id, e);
        }
    }
}
