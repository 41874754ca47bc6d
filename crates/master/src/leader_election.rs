use std::sync::Arc;
use std::time::Duration;

use osm_core::CoordinationStore;
use osm_errors::{DistributedError, DistributedResult};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 基于存储中带过期时间的锁实现的领导者选举
///
/// 获取失败不会重试；刷新失败即视为失去领导权。
pub struct LeaderElection {
    master_id: String,
    store: Arc<dyn CoordinationStore>,
    lock_ttl: Duration,
    refresh_interval: Duration,
    is_leader: RwLock<bool>,
}

impl LeaderElection {
    pub fn new(
        master_id: String,
        store: Arc<dyn CoordinationStore>,
        lock_ttl: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            master_id,
            store,
            lock_ttl,
            refresh_interval,
            is_leader: RwLock::new(false),
        }
    }

    pub fn master_id(&self) -> &str {
        &self.master_id
    }

    pub async fn is_leader(&self) -> bool {
        *self.is_leader.read().await
    }

    /// 获取Master锁，已被其他实例持有时返回 `MasterAlreadyRunning`
    pub async fn acquire(&self) -> DistributedResult<()> {
        let acquired = self
            .store
            .acquire_master_lock(&self.master_id, self.lock_ttl)
            .await?;
        if !acquired {
            warn!("Master锁已被其他实例持有, {} 无法成为leader", self.master_id);
            return Err(DistributedError::MasterAlreadyRunning);
        }

        *self.is_leader.write().await = true;
        info!("{} 获得Master锁 (ttl={:?})", self.master_id, self.lock_ttl);
        Ok(())
    }

    /// 刷新一次锁，返回是否仍然是leader
    pub async fn refresh(&self) -> bool {
        let still_leader = match self
            .store
            .refresh_master_lock(&self.master_id, self.lock_ttl)
            .await
        {
            Ok(true) => {
                debug!("{} 刷新Master锁成功", self.master_id);
                true
            }
            Ok(false) => {
                error!("{} 的Master锁已被其他实例接管", self.master_id);
                false
            }
            Err(e) => {
                error!("{} 刷新Master锁失败: {}", self.master_id, e);
                false
            }
        };

        if !still_leader {
            *self.is_leader.write().await = false;
        }
        still_leader
    }

    /// 启动锁刷新任务，失去领导权时取消 `lost` 令牌并退出
    pub fn start_refresh_task(
        self: &Arc<Self>,
        cancel: CancellationToken,
        lost: CancellationToken,
    ) -> JoinHandle<()> {
        let election = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval_at(
                Instant::now() + election.refresh_interval,
                election.refresh_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !election.refresh().await {
                            lost.cancel();
                            break;
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!("Lock refresh task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// 仅当锁仍由本实例持有时释放
    pub async fn release(&self) -> DistributedResult<bool> {
        *self.is_leader.write().await = false;
        let released = self.store.release_master_lock(&self.master_id).await?;
        if released {
            info!("{} 已释放Master锁", self.master_id);
        } else {
            info!("{} 未持有Master锁, 跳过释放", self.master_id);
        }
        Ok(released)
    }
}
