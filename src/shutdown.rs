use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 进程级根令牌，各服务持有子令牌；触发一次后所有子令牌都会被取消。
#[derive(Clone, Default)]
pub struct ShutdownManager {
    root: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅关闭信号，已关闭时返回的令牌立即处于取消状态
    pub fn subscribe(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if self.root.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown(&self) {
        self.root.cancelled().await;
    }
}
