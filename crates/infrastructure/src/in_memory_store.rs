use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osm_core::models::decode_entries;
use osm_core::{CoordinationStore, Task, TaskResult, WorkerInfo};
use osm_errors::{DistributedError, DistributedResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::redis_store::StoreMetrics;

/// 进程内协调存储
///
/// 语义与 Redis 实现保持一致：记录以 JSON 字符串保存，队列头部入队尾部出队，
/// Master锁带过期时间。用于单进程 `all` 模式和测试。
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    task_available: Notify,
    metrics: Arc<StoreMetrics>,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct StoreState {
    pending: VecDeque<String>,
    running: HashMap<String, String>,
    completed: HashMap<String, String>,
    workers: HashMap<String, String>,
    heartbeats: HashMap<String, i64>,
    master_lock: Option<LockEntry>,
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    expires_at: Instant,
}

impl StoreState {
    /// 返回仍然有效的锁，过期的锁会被清除
    fn live_lock(&mut self) -> Option<&LockEntry> {
        if let Some(lock) = &self.master_lock {
            if lock.expires_at <= Instant::now() {
                self.master_lock = None;
            }
        }
        self.master_lock.as_ref()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Creating in-memory coordination store");
        Self::default()
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// 写入指定时间的心跳，测试中用于模拟失联的Worker
    pub async fn set_worker_heartbeat_at(
        &self,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> DistributedResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.heartbeats.insert(worker_id.to_string(), at.timestamp());
        self.metrics.record_heartbeat();
        Ok(())
    }

    /// 当前锁持有者
    pub async fn master_lock_holder(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.live_lock().map(|lock| lock.holder.clone())
    }

    fn ensure_open(&self) -> DistributedResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DistributedError::Store("store connection is closed".to_string()));
        }
        Ok(())
    }

    async fn try_pop(&self) -> DistributedResult<Option<Task>> {
        let mut state = self.state.lock().await;
        let Some(payload) = state.pending.pop_back() else {
            return Ok(None);
        };
        if !state.pending.is_empty() {
            // 唤醒下一个等待者
            self.task_available.notify_one();
        }
        drop(state);

        match Task::from_json(&payload) {
            Ok(task) => {
                self.metrics.record_task_popped();
                Ok(Some(task))
            }
            Err(e) => {
                warn!("丢弃无法解析的待执行任务: {}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn ping(&self) -> DistributedResult<()> {
        self.ensure_open()
    }

    async fn push_task(&self, task: &Task) -> DistributedResult<()> {
        self.ensure_open()?;
        let payload = task.to_json()?;
        self.state.lock().await.pending.push_front(payload);
        self.task_available.notify_one();
        self.metrics.record_task_pushed();
        debug!(task_id = %task.id, "任务已入队");
        Ok(())
    }

    async fn pop_task(&self, timeout: Duration) -> DistributedResult<Option<Task>> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(task) = self.try_pop().await? {
                return Ok(Some(task));
            }
            let notified = self.task_available.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // 超时前最后检查一次，避免错过通知
                let last = self.try_pop().await?;
                if last.is_none() {
                    self.metrics.record_pop_timeout();
                }
                return Ok(last);
            }
            self.ensure_open()?;
        }
    }

    async fn pending_count(&self) -> DistributedResult<u64> {
        self.ensure_open()?;
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn set_task_running(&self, task: &Task) -> DistributedResult<()> {
        self.ensure_open()?;
        let payload = task.to_json()?;
        self.state
            .lock()
            .await
            .running
            .insert(task.id.clone(), payload);
        Ok(())
    }

    async fn remove_task_running(&self, task_id: &str) -> DistributedResult<()> {
        self.ensure_open()?;
        self.state.lock().await.running.remove(task_id);
        Ok(())
    }

    async fn get_running_task(&self, task_id: &str) -> DistributedResult<Option<Task>> {
        self.ensure_open()?;
        let raw = self.state.lock().await.running.get(task_id).cloned();
        raw.map(|raw| Task::from_json(&raw)).transpose()
    }

    async fn get_all_running_tasks(&self) -> DistributedResult<Vec<Task>> {
        self.ensure_open()?;
        let entries = self.state.lock().await.running.clone();
        Ok(decode_entries("task", entries))
    }

    async fn set_task_result(&self, result: &TaskResult) -> DistributedResult<()> {
        self.ensure_open()?;
        let payload = result.to_json()?;
        self.state
            .lock()
            .await
            .completed
            .insert(result.task_id.clone(), payload);
        self.metrics.record_result_written();
        Ok(())
    }

    async fn get_task_result(&self, task_id: &str) -> DistributedResult<Option<TaskResult>> {
        self.ensure_open()?;
        let raw = self.state.lock().await.completed.get(task_id).cloned();
        raw.map(|raw| TaskResult::from_json(&raw)).transpose()
    }

    async fn register_worker(&self, worker: &WorkerInfo) -> DistributedResult<()> {
        self.ensure_open()?;
        let payload = worker.to_json()?;
        self.state
            .lock()
            .await
            .workers
            .insert(worker.id.clone(), payload);
        Ok(())
    }

    async fn remove_worker(&self, worker_id: &str) -> DistributedResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.workers.remove(worker_id);
        state.heartbeats.remove(worker_id);
        Ok(())
    }

    async fn get_worker(&self, worker_id: &str) -> DistributedResult<Option<WorkerInfo>> {
        self.ensure_open()?;
        let raw = self.state.lock().await.workers.get(worker_id).cloned();
        raw.map(|raw| WorkerInfo::from_json(&raw)).transpose()
    }

    async fn get_all_workers(&self) -> DistributedResult<Vec<WorkerInfo>> {
        self.ensure_open()?;
        let entries = self.state.lock().await.workers.clone();
        Ok(decode_entries("worker", entries))
    }

    async fn update_worker_heartbeat(&self, worker_id: &str) -> DistributedResult<()> {
        self.set_worker_heartbeat_at(worker_id, Utc::now()).await
    }

    async fn get_worker_heartbeat(
        &self,
        worker_id: &str,
    ) -> DistributedResult<Option<DateTime<Utc>>> {
        self.ensure_open()?;
        let secs = self.state.lock().await.heartbeats.get(worker_id).copied();
        Ok(secs.and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    async fn acquire_master_lock(&self, holder_id: &str, ttl: Duration) -> DistributedResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let acquired = state.live_lock().is_none();
        if acquired {
            state.master_lock = Some(LockEntry {
                holder: holder_id.to_string(),
                expires_at: Instant::now() + ttl,
            });
        }
        self.metrics.record_lock_operation("acquire", acquired);
        Ok(acquired)
    }

    async fn refresh_master_lock(&self, holder_id: &str, ttl: Duration) -> DistributedResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let refreshed = state
            .live_lock()
            .is_some_and(|lock| lock.holder == holder_id);
        if refreshed {
            state.master_lock = Some(LockEntry {
                holder: holder_id.to_string(),
                expires_at: Instant::now() + ttl,
            });
        }
        self.metrics.record_lock_operation("refresh", refreshed);
        Ok(refreshed)
    }

    async fn release_master_lock(&self, holder_id: &str) -> DistributedResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let released = state
            .live_lock()
            .is_some_and(|lock| lock.holder == holder_id);
        if released {
            state.master_lock = None;
        }
        self.metrics.record_lock_operation("release", released);
        Ok(released)
    }

    async fn close(&self) -> DistributedResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.task_available.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osm_core::{WorkerStatus, WorkflowKind};

    fn task(name: &str) -> Task {
        Task::new(name, WorkflowKind::Module, "example.com")
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let store = InMemoryStore::new();
        let first = task("first");
        let second = task("second");
        store.push_task(&first).await.unwrap();
        store.push_task(&second).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 2);

        let popped = store.pop_task(Duration::from_millis(10)).await.unwrap();
        assert_eq!(popped.unwrap().id, first.id);
        let popped = store.pop_task(Duration::from_millis(10)).await.unwrap();
        assert_eq!(popped.unwrap().id, second.id);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_timeout_returns_none() {
        let store = InMemoryStore::new();
        let started = std::time::Instant::now();
        let popped = store.pop_task(Duration::from_millis(50)).await.unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.metrics().get_stats().pop_timeouts, 1);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let store = Arc::new(InMemoryStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.pop_task(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let pushed = task("late");
        store.push_task(&pushed).await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.unwrap().id, pushed.id);
    }

    #[tokio::test]
    async fn test_concurrent_pops_receive_distinct_tasks() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..10 {
            store.push_task(&task(&format!("t{i}"))).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(t) = store.pop_task(Duration::from_millis(20)).await.unwrap() {
                    ids.push(t.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 10);
    }

    #[tokio::test]
    async fn test_running_and_result_hashes() {
        let store = InMemoryStore::new();
        let mut t = task("scan-x");
        t.mark_running("w1");
        store.set_task_running(&t).await.unwrap();

        assert_eq!(store.get_running_task(&t.id).await.unwrap(), Some(t.clone()));
        assert_eq!(store.get_all_running_tasks().await.unwrap().len(), 1);

        let result = TaskResult::failed(&t.id, "boom");
        store.set_task_result(&result).await.unwrap();
        store.remove_task_running(&t.id).await.unwrap();

        assert!(store.get_running_task(&t.id).await.unwrap().is_none());
        assert_eq!(store.get_task_result(&t.id).await.unwrap(), Some(result));
        assert!(store.get_task_result("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_running_entry_is_skipped() {
        let store = InMemoryStore::new();
        let t = task("ok");
        store.set_task_running(&t).await.unwrap();
        store
            .state
            .lock()
            .await
            .running
            .insert("bad".to_string(), "{oops".to_string());

        let tasks = store.get_all_running_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, t.id);
    }

    #[tokio::test]
    async fn test_malformed_pending_entry_yields_none() {
        let store = InMemoryStore::new();
        store
            .state
            .lock()
            .await
            .pending
            .push_front("garbage".to_string());

        let popped = store.pop_task(Duration::from_millis(10)).await.unwrap();
        assert!(popped.is_none());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_worker_registry_and_heartbeat() {
        let store = InMemoryStore::new();
        let worker = WorkerInfo::new("w1", "host");
        store.register_worker(&worker).await.unwrap();
        store.update_worker_heartbeat("w1").await.unwrap();

        let loaded = store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkerStatus::Idle);
        assert!(store.get_worker_heartbeat("w1").await.unwrap().is_some());
        assert!(store.get_worker_heartbeat("w2").await.unwrap().is_none());

        store.remove_worker("w1").await.unwrap();
        assert!(store.get_worker("w1").await.unwrap().is_none());
        assert!(store.get_worker_heartbeat("w1").await.unwrap().is_none());
        assert!(store.get_all_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_master_lock_exclusive() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.acquire_master_lock("m1", ttl).await.unwrap());
        assert!(!store.acquire_master_lock("m2", ttl).await.unwrap());

        assert!(store.refresh_master_lock("m1", ttl).await.unwrap());
        assert!(!store.refresh_master_lock("m2", ttl).await.unwrap());

        assert!(!store.release_master_lock("m2").await.unwrap());
        assert_eq!(store.master_lock_holder().await.as_deref(), Some("m1"));
        assert!(store.release_master_lock("m1").await.unwrap());
        assert!(store.acquire_master_lock("m2", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_lock_expires() {
        let store = InMemoryStore::new();
        assert!(store
            .acquire_master_lock("m1", Duration::from_secs(2))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(!store
            .refresh_master_lock("m1", Duration::from_secs(2))
            .await
            .unwrap());
        assert!(store
            .acquire_master_lock("m2", Duration::from_secs(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();
        assert!(store.ping().await.is_err());
        assert!(store.push_task(&task("x")).await.is_err());
    }
}
