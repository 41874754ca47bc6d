use osm_config::StoreConfig;
use osm_errors::{DistributedError, DistributedResult};
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use super::metrics_collector::StoreMetrics;

/// Redis连接管理
///
/// 持有两条自动重连的连接：共享连接承载普通请求-响应命令，
/// 独占连接只用于 BRPOP，避免阻塞弹出拖慢同一进程里的心跳等短命令。
pub struct RedisConnectionManager {
    config: StoreConfig,
    metrics: Arc<StoreMetrics>,
    shared: ConnectionManager,
    blocking: Mutex<ConnectionManager>,
    closed: AtomicBool,
}

impl RedisConnectionManager {
    pub async fn new(config: StoreConfig, metrics: Arc<StoreMetrics>) -> DistributedResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            DistributedError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;

        let shared = Self::connect_with_retry(&client, &config, &metrics).await?;
        let blocking = Self::connect_with_retry(&client, &config, &metrics).await?;

        let manager = Self {
            config,
            metrics,
            shared,
            blocking: Mutex::new(blocking),
            closed: AtomicBool::new(false),
        };
        manager.ping().await?;
        manager.metrics.set_active_connections(2);
        debug!("Successfully connected to Redis at {}", manager.redacted_url());

        Ok(manager)
    }

    async fn connect_with_retry(
        client: &Client,
        config: &StoreConfig,
        metrics: &StoreMetrics,
    ) -> DistributedResult<ConnectionManager> {
        let mut last_error = String::from("Unknown");

        for attempt in 0..config.max_retry_attempts {
            match timeout(config.command_timeout(), client.get_connection_manager()).await {
                Ok(Ok(conn)) => {
                    if attempt > 0 {
                        debug!(
                            "Successfully reconnected to Redis after {} attempts",
                            attempt + 1
                        );
                    }
                    return Ok(conn);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("connect timed out after {:?}", config.command_timeout())
                }
            }

            metrics.record_connection_error();
            if attempt + 1 < config.max_retry_attempts {
                warn!(
                    "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {}s...",
                    attempt + 1,
                    config.max_retry_attempts,
                    last_error,
                    config.retry_delay_seconds
                );
                sleep(config.retry_delay()).await;
            }
        }

        let error_msg = format!(
            "Failed to connect to Redis after {} attempts. Last error: {}",
            config.max_retry_attempts, last_error
        );
        error!("{}", error_msg);
        Err(DistributedError::Store(error_msg))
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn command_timeout(&self) -> Duration {
        self.config.command_timeout()
    }

    /// 普通命令使用的共享连接
    pub fn connection(&self) -> DistributedResult<ConnectionManager> {
        self.ensure_open()?;
        Ok(self.shared.clone())
    }

    /// 阻塞命令使用的独占连接，同一时刻只允许一个 BRPOP 在途
    pub async fn blocking_connection(&self) -> DistributedResult<MutexGuard<'_, ConnectionManager>> {
        self.ensure_open()?;
        Ok(self.blocking.lock().await)
    }

    /// 以命令超时执行一次存储往返
    pub async fn execute<T, F>(&self, operation: &'static str, fut: F) -> DistributedResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        self.execute_with_timeout(operation, self.command_timeout(), fut)
            .await
    }

    /// 以指定上限执行一次存储往返
    pub async fn execute_with_timeout<T, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        fut: F,
    ) -> DistributedResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let started = Instant::now();
        let outcome = timeout(limit, fut).await;
        self.metrics
            .record_operation_duration(operation, started.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.metrics.record_command_error(operation);
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.metrics.record_connection_error();
                }
                warn!("Redis命令 {} 失败: {}", operation, e);
                Err(DistributedError::from(e))
            }
            Err(_) => {
                self.metrics.record_command_error(operation);
                warn!("Redis命令 {} 超时 ({:?})", operation, limit);
                Err(DistributedError::Timeout(format!(
                    "{operation} exceeded {limit:?}"
                )))
            }
        }
    }

    pub async fn ping(&self) -> DistributedResult<()> {
        let mut conn = self.connection()?;
        let response: String = self
            .execute("ping", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        if response == "PONG" {
            debug!("Redis connection test successful");
            Ok(())
        } else {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(DistributedError::Store(error_msg))
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }

    /// 标记连接关闭，之后的操作直接返回错误
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.metrics.set_active_connections(0);
            debug!("Redis connections closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> DistributedResult<()> {
        if self.is_closed() {
            return Err(DistributedError::Store("store connection is closed".to_string()));
        }
        Ok(())
    }

    /// 去掉密码后的连接地址，用于日志
    fn redacted_url(&self) -> String {
        match url::Url::parse(&self.config.url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("****"));
                }
                parsed.to_string()
            }
            Err(_) => "<invalid url>".to_string(),
        }
    }
}
