use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use osm_core::{
    is_heartbeat_stale, CoordinationStore, Task, TaskResult, TaskStatus, WorkerInfo,
    WorkerStatus,
};
use osm_errors::{DistributedError, DistributedResult};
use tracing::{info, warn};
use uuid::Uuid;

/// 任务查询结果：仍在运行时返回任务本身，结束后返回结果记录
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatusView {
    Running(Task),
    Finished(TaskResult),
}

impl TaskStatusView {
    pub fn task_id(&self) -> &str {
        match self {
            TaskStatusView::Running(task) => &task.id,
            TaskStatusView::Finished(result) => &result.task_id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskStatusView::Running(task) => task.status,
            TaskStatusView::Finished(result) => result.status.into(),
        }
    }
}

/// 队列概况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub running: usize,
    pub workers: usize,
}

/// 供外层API使用的提交与查询接口
pub struct TaskService {
    store: Arc<dyn CoordinationStore>,
    heartbeat_timeout: Duration,
}

impl TaskService {
    pub fn new(store: Arc<dyn CoordinationStore>, heartbeat_timeout: Duration) -> Self {
        Self {
            store,
            heartbeat_timeout,
        }
    }

    /// 提交任务到待执行队列
    ///
    /// 缺失的ID和创建时间会被补齐，状态强制为 pending 且不归属任何Worker。
    pub async fn submit_task(&self, mut task: Task) -> DistributedResult<Task> {
        if task.workflow_name.trim().is_empty() {
            return Err(DistributedError::invalid_params("workflow_name 不能为空"));
        }
        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        } else if !Task::is_valid_id(&task.id) {
            return Err(DistributedError::invalid_params(format!(
                "非法的任务ID: {}",
                task.id
            )));
        }
        if task.created_at.timestamp() <= 0 {
            task.created_at = Utc::now();
        }
        task.status = TaskStatus::Pending;
        task.worker_id.clear();
        task.started_at = None;
        task.completed_at = None;
        task.error = None;

        self.store.push_task(&task).await?;
        counter!("osm_master_tasks_submitted_total").increment(1);
        info!(
            "任务已提交: task_id={}, workflow={}, target={}",
            task.id, task.workflow_name, task.target
        );
        Ok(task)
    }

    /// 先查运行中任务，再查结果；都不存在时返回 `TaskNotFound`
    pub async fn get_task_status(&self, task_id: &str) -> DistributedResult<TaskStatusView> {
        if let Some(task) = self.store.get_running_task(task_id).await? {
            return Ok(TaskStatusView::Running(task));
        }
        if let Some(result) = self.store.get_task_result(task_id).await? {
            return Ok(TaskStatusView::Finished(result));
        }
        Err(DistributedError::task_not_found(task_id))
    }

    /// 列出全部Worker，用实时心跳覆盖记录中的时间，心跳超时的标记为 offline
    pub async fn list_workers(&self) -> DistributedResult<Vec<WorkerInfo>> {
        let workers = self.store.get_all_workers().await?;
        let mut enriched = Vec::with_capacity(workers.len());
        for worker in workers {
            enriched.push(self.enrich_worker(worker).await);
        }
        Ok(enriched)
    }

    pub async fn get_worker(&self, worker_id: &str) -> DistributedResult<WorkerInfo> {
        match self.store.get_worker(worker_id).await? {
            Some(worker) => Ok(self.enrich_worker(worker).await),
            None => Err(DistributedError::worker_not_found(worker_id)),
        }
    }

    /// 当前只返回运行中的任务
    pub async fn list_tasks(&self) -> DistributedResult<Vec<Task>> {
        self.store.get_all_running_tasks().await
    }

    pub async fn queue_stats(&self) -> DistributedResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.pending_count().await?,
            running: self.store.get_all_running_tasks().await?.len(),
            workers: self.store.get_all_workers().await?.len(),
        })
    }

    async fn enrich_worker(&self, mut worker: WorkerInfo) -> WorkerInfo {
        let heartbeat = match self.store.get_worker_heartbeat(&worker.id).await {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                warn!("读取Worker {} 心跳失败: {}", worker.id, e);
                return worker;
            }
        };
        if let Some(ts) = heartbeat {
            worker.last_heartbeat = ts;
        }
        let timeout = chrono::Duration::milliseconds(self.heartbeat_timeout.as_millis() as i64);
        if is_heartbeat_stale(heartbeat, Utc::now(), timeout) {
            worker.status = WorkerStatus::Offline;
        }
        worker
    }
}
