use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use osm_core::{is_heartbeat_stale, CoordinationStore, WorkerInfo};
use osm_errors::DistributedResult;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::leader_election::LeaderElection;

/// Worker失效检测配置
#[derive(Debug, Clone)]
pub struct WorkerFailureDetectorConfig {
    /// 心跳超时时间
    pub heartbeat_timeout: Duration,
    /// 检测间隔
    pub detection_interval: Duration,
}

impl Default for WorkerFailureDetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(90),
            detection_interval: Duration::from_secs(30),
        }
    }
}

/// 一轮检测的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub workers_failed: usize,
    pub workers_evicted: Vec<String>,
    pub tasks_reassigned: usize,
}

/// Worker失效检测服务接口
#[async_trait]
pub trait WorkerFailureDetectorService: Send + Sync {
    /// 检测心跳超时的Worker
    async fn detect_failed_workers(&self) -> DistributedResult<Vec<WorkerInfo>>;

    /// 将失效Worker的运行中任务放回待执行队列，再从注册表删除该Worker
    async fn handle_failed_worker(&self, worker: &WorkerInfo) -> DistributedResult<usize>;

    /// 执行一轮完整检测
    async fn run_detection_cycle(&self) -> DistributedResult<DetectionReport>;
}

/// Worker失效检测服务实现
pub struct WorkerFailureDetector {
    store: Arc<dyn CoordinationStore>,
    leader: Arc<LeaderElection>,
    config: WorkerFailureDetectorConfig,
}

impl WorkerFailureDetector {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        leader: Arc<LeaderElection>,
        config: Option<WorkerFailureDetectorConfig>,
    ) -> Self {
        Self {
            store,
            leader,
            config: config.unwrap_or_default(),
        }
    }

    fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.config.heartbeat_timeout.as_millis() as i64)
    }

    /// 检查Worker是否失效
    fn is_worker_failed(&self, heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        is_heartbeat_stale(heartbeat, now, self.heartbeat_timeout())
    }

    /// 启动检测任务，直到令牌取消
    pub fn start_detection_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let detector = Arc::clone(self);

        tokio::spawn(async move {
            info!("启动Worker失效检测循环");
            let mut ticker = interval_at(
                Instant::now() + detector.config.detection_interval,
                detector.config.detection_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = detector.run_detection_cycle().await {
                            error!("Worker失效检测时出错: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("收到停止信号，退出Worker失效检测循环");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl WorkerFailureDetectorService for WorkerFailureDetector {
    async fn detect_failed_workers(&self) -> DistributedResult<Vec<WorkerInfo>> {
        debug!("开始检测失效的Worker");

        let now = Utc::now();
        let all_workers = self.store.get_all_workers().await?;
        let mut failed_workers = Vec::new();

        for worker in all_workers {
            let heartbeat = match self.store.get_worker_heartbeat(&worker.id).await {
                Ok(heartbeat) => heartbeat,
                Err(e) => {
                    // 读不到心跳不等于Worker失效，留到下一轮
                    warn!("读取Worker {} 心跳失败: {}", worker.id, e);
                    continue;
                }
            };

            if self.is_worker_failed(heartbeat, now) {
                warn!(
                    "检测到失效Worker: {} (上次心跳: {})",
                    worker.id,
                    heartbeat.map_or_else(
                        || "无".to_string(),
                        |ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
                    )
                );
                failed_workers.push(worker);
            }
        }

        Ok(failed_workers)
    }

    async fn handle_failed_worker(&self, worker: &WorkerInfo) -> DistributedResult<usize> {
        info!("处理失效Worker: {}", worker.id);

        let running = self.store.get_all_running_tasks().await?;
        let mut reassigned = 0;

        for mut task in running.into_iter().filter(|t| t.worker_id == worker.id) {
            task.reset_to_pending();
            // 先入队再删除，中途失败最多导致重复执行
            self.store.push_task(&task).await?;
            self.store.remove_task_running(&task.id).await?;
            reassigned += 1;
            counter!("osm_master_tasks_reassigned_total").increment(1);
            info!("任务 {} 已从失效Worker {} 重新入队", task.id, worker.id);
        }

        self.store.remove_worker(&worker.id).await?;
        counter!("osm_master_workers_evicted_total").increment(1);

        if reassigned > 0 {
            info!(
                "成功重新分配失效Worker {} 上的 {} 个任务",
                worker.id, reassigned
            );
        } else {
            debug!("失效Worker {} 上没有需要重新分配的任务", worker.id);
        }
        Ok(reassigned)
    }

    async fn run_detection_cycle(&self) -> DistributedResult<DetectionReport> {
        if !self.leader.is_leader().await {
            debug!("当前实例不是leader, 跳过本轮Worker检测");
            return Ok(DetectionReport::default());
        }

        let failed_workers = self.detect_failed_workers().await?;
        let mut report = DetectionReport {
            workers_failed: failed_workers.len(),
            ..Default::default()
        };

        if !failed_workers.is_empty() {
            info!("检测到 {} 个失效的Worker", failed_workers.len());
        }

        for worker in failed_workers {
            match self.handle_failed_worker(&worker).await {
                Ok(count) => {
                    report.tasks_reassigned += count;
                    report.workers_evicted.push(worker.id);
                }
                Err(e) => {
                    // Worker保留在注册表中，下一轮会再次处理
                    error!("处理失效Worker {} 时出错: {}", worker.id, e);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use osm_core::{Task, TaskStatus, WorkflowKind};
    use osm_infrastructure::InMemoryStore;

    async fn setup() -> (Arc<InMemoryStore>, WorkerFailureDetector) {
        let store = Arc::new(InMemoryStore::new());
        let leader = Arc::new(LeaderElection::new(
            "m1".to_string(),
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        leader.acquire().await.unwrap();
        let detector = WorkerFailureDetector::new(store.clone(), leader, None);
        (store, detector)
    }

    async fn register(store: &InMemoryStore, id: &str, heartbeat_age: Option<i64>) {
        store
            .register_worker(&WorkerInfo::new(id, "host"))
            .await
            .unwrap();
        if let Some(age) = heartbeat_age {
            store
                .set_worker_heartbeat_at(id, Utc::now() - ChronoDuration::seconds(age))
                .await
                .unwrap();
        }
    }

    async fn running_task(store: &InMemoryStore, owner: &str) -> Task {
        let mut task = Task::new("scan-x", WorkflowKind::Module, "example.com");
        task.mark_running(owner);
        store.set_task_running(&task).await.unwrap();
        task
    }

    #[test]
    fn test_is_worker_failed() {
        let store = Arc::new(InMemoryStore::new());
        let leader = Arc::new(LeaderElection::new(
            "m1".to_string(),
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let detector = WorkerFailureDetector::new(store, leader, None);
        let now = Utc::now();

        assert!(!detector.is_worker_failed(Some(now - ChronoDuration::seconds(30)), now));
        assert!(detector.is_worker_failed(Some(now - ChronoDuration::seconds(120)), now));
        assert!(detector.is_worker_failed(None, now));
        assert!(detector.is_worker_failed(DateTime::from_timestamp(0, 0), now));
    }

    #[tokio::test]
    async fn test_detect_failed_workers() {
        let (store, detector) = setup().await;
        register(&store, "alive", Some(10)).await;
        register(&store, "stale", Some(300)).await;
        register(&store, "silent", None).await;

        let mut failed: Vec<String> = detector
            .detect_failed_workers()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["silent".to_string(), "stale".to_string()]);
    }

    #[tokio::test]
    async fn test_dead_worker_tasks_are_reassigned_and_worker_evicted() {
        let (store, detector) = setup().await;
        register(&store, "dead", Some(300)).await;
        register(&store, "alive", Some(5)).await;
        let first = running_task(&store, "dead").await;
        let second = running_task(&store, "dead").await;
        let other = running_task(&store, "alive").await;

        let report = detector.run_detection_cycle().await.unwrap();
        assert_eq!(report.tasks_reassigned, 2);
        assert_eq!(report.workers_evicted, vec!["dead".to_string()]);

        let running = store.get_all_running_tasks().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, other.id);

        assert_eq!(store.pending_count().await.unwrap(), 2);
        let mut requeued = Vec::new();
        while let Some(task) = store.pop_task(Duration::from_millis(10)).await.unwrap() {
            assert_eq!(task.status, TaskStatus::Pending);
            assert!(task.worker_id.is_empty());
            assert!(task.started_at.is_none());
            requeued.push(task.id);
        }
        requeued.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(requeued, expected);

        assert!(store.get_worker("dead").await.unwrap().is_none());
        assert!(store.get_worker_heartbeat("dead").await.unwrap().is_none());
        assert!(store.get_worker("alive").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cycle_skipped_when_not_leader() {
        let store = Arc::new(InMemoryStore::new());
        let leader = Arc::new(LeaderElection::new(
            "m1".to_string(),
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let detector = WorkerFailureDetector::new(store.clone(), leader, None);
        register(&store, "dead", Some(300)).await;

        let report = detector.run_detection_cycle().await.unwrap();
        assert_eq!(report, DetectionReport::default());
        assert!(store.get_worker("dead").await.unwrap().is_some());
    }
}
