//! 基于 Redis 的协调存储实现
//!
//! 键布局:
//!
//! ```text
//! osm:tasks:pending       list    LPUSH 入队, BRPOP 出队
//! osm:tasks:running       hash    task_id   -> Task JSON
//! osm:tasks:completed     hash    task_id   -> TaskResult JSON
//! osm:workers             hash    worker_id -> WorkerInfo JSON
//! osm:workers:heartbeat   hash    worker_id -> unix 秒
//! osm:master:lock         string  leader ID, 带 TTL
//! ```

pub mod connection_manager;
pub mod metrics_collector;
pub mod scripts;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osm_config::StoreConfig;
use osm_core::keys::{
    COMPLETED_TASKS_KEY, MASTER_LOCK_KEY, PENDING_QUEUE_KEY, RUNNING_TASKS_KEY,
    WORKERS_KEY, WORKER_HEARTBEAT_KEY,
};
use osm_core::models::decode_entries;
use osm_core::{CoordinationStore, Task, TaskResult, WorkerInfo};
use osm_errors::DistributedResult;
use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub use connection_manager::RedisConnectionManager;
pub use metrics_collector::{StoreMetrics, StoreMetricsSnapshot};

pub struct RedisStore {
    connections: RedisConnectionManager,
    metrics: Arc<StoreMetrics>,
    refresh_script: Script,
    release_script: Script,
}

impl RedisStore {
    /// 连接 Redis 并验证连通性，失败即返回错误
    pub async fn connect(config: &StoreConfig) -> DistributedResult<Self> {
        let metrics = Arc::new(StoreMetrics::default());
        let connections = RedisConnectionManager::new(config.clone(), Arc::clone(&metrics)).await?;
        info!("Redis协调存储已连接");

        Ok(Self {
            connections,
            metrics,
            refresh_script: scripts::refresh_lock_script(),
            release_script: scripts::release_lock_script(),
        })
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// 写入指定时间的心跳，用于运维修复和故障演练
    pub async fn set_worker_heartbeat_at(
        &self,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> DistributedResult<()> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute("set_worker_heartbeat", async move {
                redis::cmd("HSET")
                    .arg(WORKER_HEARTBEAT_KEY)
                    .arg(worker_id)
                    .arg(at.timestamp())
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await
    }

    async fn hash_get(&self, operation: &'static str, key: &'static str, field: &str) -> DistributedResult<Option<String>> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute(operation, async move {
                redis::cmd("HGET")
                    .arg(key)
                    .arg(field)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            })
            .await
    }

    async fn hash_get_all(&self, operation: &'static str, key: &'static str) -> DistributedResult<HashMap<String, String>> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute(operation, async move {
                redis::cmd("HGETALL")
                    .arg(key)
                    .query_async::<HashMap<String, String>>(&mut conn)
                    .await
            })
            .await
    }

    async fn hash_set(&self, operation: &'static str, key: &'static str, field: &str, value: String) -> DistributedResult<()> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute(operation, async move {
                redis::cmd("HSET")
                    .arg(key)
                    .arg(field)
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await
    }

    async fn hash_del(&self, operation: &'static str, key: &'static str, field: &str) -> DistributedResult<()> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute(operation, async move {
                redis::cmd("HDEL")
                    .arg(key)
                    .arg(field)
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await
    }
}

/// TTL 以整秒传给存储，不足整秒的部分向上取整，最少一秒
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> DistributedResult<()> {
        self.connections.ping().await
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn push_task(&self, task: &Task) -> DistributedResult<()> {
        let payload = task.to_json()?;
        let mut conn = self.connections.connection()?;
        self.connections
            .execute("push_task", async move {
                redis::cmd("LPUSH")
                    .arg(PENDING_QUEUE_KEY)
                    .arg(payload)
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await?;
        self.metrics.record_task_pushed();
        debug!("任务已入队");
        Ok(())
    }

    async fn pop_task(&self, timeout: Duration) -> DistributedResult<Option<Task>> {
        let mut conn = self.connections.blocking_connection().await?;

        let popped: Option<String> = if timeout.is_zero() {
            // BRPOP 0 表示永久阻塞，零超时改用非阻塞 RPOP
            self.connections
                .execute("pop_task", async {
                    redis::cmd("RPOP")
                        .arg(PENDING_QUEUE_KEY)
                        .query_async::<Option<String>>(&mut *conn)
                        .await
                })
                .await?
        } else {
            let limit = timeout + self.connections.command_timeout();
            self.connections
                .execute_with_timeout("pop_task", limit, async {
                    redis::cmd("BRPOP")
                        .arg(PENDING_QUEUE_KEY)
                        .arg(timeout.as_secs_f64())
                        .query_async::<Option<(String, String)>>(&mut *conn)
                        .await
                })
                .await?
                .map(|(_, payload)| payload)
        };

        match popped {
            Some(payload) => match Task::from_json(&payload) {
                Ok(task) => {
                    self.metrics.record_task_popped();
                    debug!(task_id = %task.id, "任务已出队");
                    Ok(Some(task))
                }
                Err(e) => {
                    warn!("丢弃无法解析的待执行任务: {}", e);
                    Ok(None)
                }
            },
            None => {
                self.metrics.record_pop_timeout();
                Ok(None)
            }
        }
    }

    async fn pending_count(&self) -> DistributedResult<u64> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute("pending_count", async move {
                redis::cmd("LLEN")
                    .arg(PENDING_QUEUE_KEY)
                    .query_async::<u64>(&mut conn)
                    .await
            })
            .await
    }

    async fn set_task_running(&self, task: &Task) -> DistributedResult<()> {
        let payload = task.to_json()?;
        self.hash_set("set_task_running", RUNNING_TASKS_KEY, &task.id, payload)
            .await
    }

    async fn remove_task_running(&self, task_id: &str) -> DistributedResult<()> {
        self.hash_del("remove_task_running", RUNNING_TASKS_KEY, task_id)
            .await
    }

    async fn get_running_task(&self, task_id: &str) -> DistributedResult<Option<Task>> {
        self.hash_get("get_running_task", RUNNING_TASKS_KEY, task_id)
            .await?
            .map(|raw| Task::from_json(&raw))
            .transpose()
    }

    async fn get_all_running_tasks(&self) -> DistributedResult<Vec<Task>> {
        let entries = self
            .hash_get_all("get_all_running_tasks", RUNNING_TASKS_KEY)
            .await?;
        Ok(decode_entries("task", entries))
    }

    async fn set_task_result(&self, result: &TaskResult) -> DistributedResult<()> {
        let payload = result.to_json()?;
        self.hash_set("set_task_result", COMPLETED_TASKS_KEY, &result.task_id, payload)
            .await?;
        self.metrics.record_result_written();
        Ok(())
    }

    async fn get_task_result(&self, task_id: &str) -> DistributedResult<Option<TaskResult>> {
        self.hash_get("get_task_result", COMPLETED_TASKS_KEY, task_id)
            .await?
            .map(|raw| TaskResult::from_json(&raw))
            .transpose()
    }

    async fn register_worker(&self, worker: &WorkerInfo) -> DistributedResult<()> {
        let payload = worker.to_json()?;
        self.hash_set("register_worker", WORKERS_KEY, &worker.id, payload)
            .await
    }

    async fn remove_worker(&self, worker_id: &str) -> DistributedResult<()> {
        let mut conn = self.connections.connection()?;
        self.connections
            .execute("remove_worker", async move {
                redis::pipe()
                    .atomic()
                    .hdel(WORKERS_KEY, worker_id)
                    .ignore()
                    .hdel(WORKER_HEARTBEAT_KEY, worker_id)
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await
    }

    async fn get_worker(&self, worker_id: &str) -> DistributedResult<Option<WorkerInfo>> {
        self.hash_get("get_worker", WORKERS_KEY, worker_id)
            .await?
            .map(|raw| WorkerInfo::from_json(&raw))
            .transpose()
    }

    async fn get_all_workers(&self) -> DistributedResult<Vec<WorkerInfo>> {
        let entries = self.hash_get_all("get_all_workers", WORKERS_KEY).await?;
        Ok(decode_entries("worker", entries))
    }

    async fn update_worker_heartbeat(&self, worker_id: &str) -> DistributedResult<()> {
        self.hash_set(
            "update_worker_heartbeat",
            WORKER_HEARTBEAT_KEY,
            worker_id,
            Utc::now().timestamp().to_string(),
        )
        .await?;
        self.metrics.record_heartbeat();
        Ok(())
    }

    async fn get_worker_heartbeat(
        &self,
        worker_id: &str,
    ) -> DistributedResult<Option<DateTime<Utc>>> {
        let raw = self
            .hash_get("get_worker_heartbeat", WORKER_HEARTBEAT_KEY, worker_id)
            .await?;
        Ok(raw.and_then(|value| parse_heartbeat(worker_id, &value)))
    }

    async fn acquire_master_lock(&self, holder_id: &str, ttl: Duration) -> DistributedResult<bool> {
        let mut conn = self.connections.connection()?;
        let reply: Option<String> = self
            .connections
            .execute("acquire_master_lock", async move {
                redis::cmd("SET")
                    .arg(MASTER_LOCK_KEY)
                    .arg(holder_id)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_seconds(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        self.metrics.record_lock_operation("acquire", reply.is_some());
        Ok(reply.is_some())
    }

    async fn refresh_master_lock(&self, holder_id: &str, ttl: Duration) -> DistributedResult<bool> {
        let mut conn = self.connections.connection()?;
        let mut invocation = self.refresh_script.key(MASTER_LOCK_KEY);
        invocation.arg(holder_id).arg(ttl_seconds(ttl));
        let refreshed: i64 = self
            .connections
            .execute("refresh_master_lock", async move {
                invocation.invoke_async(&mut conn).await
            })
            .await?;
        self.metrics.record_lock_operation("refresh", refreshed == 1);
        Ok(refreshed == 1)
    }

    async fn release_master_lock(&self, holder_id: &str) -> DistributedResult<bool> {
        let mut conn = self.connections.connection()?;
        let mut invocation = self.release_script.key(MASTER_LOCK_KEY);
        invocation.arg(holder_id);
        let released: i64 = self
            .connections
            .execute("release_master_lock", async move {
                invocation.invoke_async(&mut conn).await
            })
            .await?;
        self.metrics.record_lock_operation("release", released == 1);
        Ok(released == 1)
    }

    async fn close(&self) -> DistributedResult<()> {
        self.connections.close();
        Ok(())
    }
}

fn parse_heartbeat(worker_id: &str, raw: &str) -> Option<DateTime<Utc>> {
    match raw.trim().parse::<i64>() {
        Ok(secs) => DateTime::from_timestamp(secs, 0),
        Err(e) => {
            warn!("Worker {} 的心跳值无法解析 '{}': {}", worker_id, raw, e);
            None
        }
    }
}
