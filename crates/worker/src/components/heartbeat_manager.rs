use std::sync::Arc;
use std::time::Duration;

use osm_core::CoordinationStore;
use osm_errors::DistributedResult;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 周期性写入Worker心跳
pub struct HeartbeatManager {
    worker_id: String,
    store: Arc<dyn CoordinationStore>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        worker_id: String,
        store: Arc<dyn CoordinationStore>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            store,
            heartbeat_interval,
        }
    }

    pub async fn send_heartbeat(&self) -> DistributedResult<()> {
        self.store.update_worker_heartbeat(&self.worker_id).await
    }

    /// 启动心跳任务，失败只记录日志，直到令牌取消
    pub fn start_heartbeat_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            // 加入时已写过一次心跳，第一次 tick 推迟一个周期
            let mut ticker = interval_at(
                Instant::now() + manager.heartbeat_interval,
                manager.heartbeat_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.send_heartbeat().await {
                            Ok(()) => debug!("Worker {} 心跳已发送", manager.worker_id),
                            Err(e) => warn!("Worker {} 发送心跳失败: {}", manager.worker_id, e),
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
