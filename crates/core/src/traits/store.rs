use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Task, TaskResult, WorkerInfo};
use crate::DistributedResult;

/// 协调存储抽象接口
///
/// Master与Worker之间唯一的通信介质。每个方法对应一次存储往返；
/// 传输错误原样返回给调用方，键不存在用 `Ok(None)` 表示而不是错误。
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 检查存储连通性
    async fn ping(&self) -> DistributedResult<()>;

    /// 将任务推入待执行队列
    async fn push_task(&self, task: &Task) -> DistributedResult<()>;

    /// 阻塞弹出一个任务，超时返回 `Ok(None)`
    async fn pop_task(&self, timeout: Duration) -> DistributedResult<Option<Task>>;

    /// 待执行队列长度
    async fn pending_count(&self) -> DistributedResult<u64>;

    /// 写入运行中任务
    async fn set_task_running(&self, task: &Task) -> DistributedResult<()>;

    /// 删除运行中任务
    async fn remove_task_running(&self, task_id: &str) -> DistributedResult<()>;

    /// 获取运行中任务
    async fn get_running_task(&self, task_id: &str) -> DistributedResult<Option<Task>>;

    /// 获取全部运行中任务，无法解析的记录会被跳过
    async fn get_all_running_tasks(&self) -> DistributedResult<Vec<Task>>;

    /// 写入任务结果（覆盖写）
    async fn set_task_result(&self, result: &TaskResult) -> DistributedResult<()>;

    /// 获取任务结果
    async fn get_task_result(&self, task_id: &str) -> DistributedResult<Option<TaskResult>>;

    /// 注册或更新Worker记录
    async fn register_worker(&self, worker: &WorkerInfo) -> DistributedResult<()>;

    /// 删除Worker记录及其心跳
    async fn remove_worker(&self, worker_id: &str) -> DistributedResult<()>;

    /// 获取单个Worker记录
    async fn get_worker(&self, worker_id: &str) -> DistributedResult<Option<WorkerInfo>>;

    /// 获取全部Worker记录，无法解析的记录会被跳过
    async fn get_all_workers(&self) -> DistributedResult<Vec<WorkerInfo>>;

    /// 写入当前时间作为Worker心跳
    async fn update_worker_heartbeat(&self, worker_id: &str) -> DistributedResult<()>;

    /// 读取Worker心跳
    async fn get_worker_heartbeat(
        &self,
        worker_id: &str,
    ) -> DistributedResult<Option<DateTime<Utc>>>;

    /// 原子地"不存在则设置并带过期时间"，返回是否获得锁
    async fn acquire_master_lock(&self, holder_id: &str, ttl: Duration) -> DistributedResult<bool>;

    /// 仅当锁仍由 `holder_id` 持有时刷新过期时间
    async fn refresh_master_lock(&self, holder_id: &str, ttl: Duration) -> DistributedResult<bool>;

    /// 仅当锁仍由 `holder_id` 持有时删除锁
    async fn release_master_lock(&self, holder_id: &str) -> DistributedResult<bool>;

    /// 释放存储连接
    async fn close(&self) -> DistributedResult<()>;
}
