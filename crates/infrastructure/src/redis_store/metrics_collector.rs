use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// 协调存储性能指标
///
/// 计数器全部为原子操作，同时上报到 `metrics` 全局记录器。
#[derive(Debug, Clone)]
pub struct StoreMetrics {
    pub tasks_pushed: Arc<AtomicU64>,
    pub tasks_popped: Arc<AtomicU64>,
    pub pop_timeouts: Arc<AtomicU64>,
    pub results_written: Arc<AtomicU64>,
    pub heartbeats_written: Arc<AtomicU64>,
    pub lock_operations: Arc<AtomicU64>,
    pub command_errors: Arc<AtomicU64>,
    pub connection_errors: Arc<AtomicU64>,
    pub active_connections: Arc<AtomicU32>,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self {
            tasks_pushed: Arc::new(AtomicU64::new(0)),
            tasks_popped: Arc::new(AtomicU64::new(0)),
            pop_timeouts: Arc::new(AtomicU64::new(0)),
            results_written: Arc::new(AtomicU64::new(0)),
            heartbeats_written: Arc::new(AtomicU64::new(0)),
            lock_operations: Arc::new(AtomicU64::new(0)),
            command_errors: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl StoreMetrics {
    pub fn record_task_pushed(&self) {
        self.tasks_pushed.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_tasks_pushed_total").increment(1);
    }

    pub fn record_task_popped(&self) {
        self.tasks_popped.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_tasks_popped_total").increment(1);
    }

    pub fn record_pop_timeout(&self) {
        self.pop_timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_pop_timeouts_total").increment(1);
    }

    pub fn record_result_written(&self) {
        self.results_written.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_results_written_total").increment(1);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_written.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_heartbeats_total").increment(1);
    }

    /// 记录一次Master锁操作及其结果
    pub fn record_lock_operation(&self, operation: &'static str, success: bool) {
        self.lock_operations.fetch_add(1, Ordering::Relaxed);
        let outcome = if success { "ok" } else { "rejected" };
        counter!("osm_store_lock_operations_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
    }

    pub fn record_command_error(&self, operation: &'static str) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_command_errors_total", "operation" => operation).increment(1);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        counter!("osm_store_connection_errors_total").increment(1);
    }

    pub fn set_active_connections(&self, count: u32) {
        self.active_connections.store(count, Ordering::Relaxed);
        gauge!("osm_store_active_connections").set(count as f64);
    }

    /// 记录操作耗时
    pub fn record_operation_duration(&self, operation: &'static str, duration_ms: f64) {
        histogram!("osm_store_operation_duration_ms", "operation" => operation).record(duration_ms);
    }

    pub fn get_stats(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            tasks_pushed: self.tasks_pushed.load(Ordering::Relaxed),
            tasks_popped: self.tasks_popped.load(Ordering::Relaxed),
            pop_timeouts: self.pop_timeouts.load(Ordering::Relaxed),
            results_written: self.results_written.load(Ordering::Relaxed),
            heartbeats_written: self.heartbeats_written.load(Ordering::Relaxed),
            lock_operations: self.lock_operations.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetricsSnapshot {
    pub tasks_pushed: u64,
    pub tasks_popped: u64,
    pub pop_timeouts: u64,
    pub results_written: u64,
    pub heartbeats_written: u64,
    pub lock_operations: u64,
    pub command_errors: u64,
    pub connection_errors: u64,
    pub active_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = StoreMetrics::default();
        metrics.record_task_pushed();
        metrics.record_task_pushed();
        metrics.record_task_popped();
        metrics.record_pop_timeout();
        metrics.record_command_error("push_task");
        metrics.record_heartbeat();
        metrics.record_lock_operation("acquire", false);
        metrics.set_active_connections(2);

        let stats = metrics.get_stats();
        assert_eq!(stats.tasks_pushed, 2);
        assert_eq!(stats.tasks_popped, 1);
        assert_eq!(stats.pop_timeouts, 1);
        assert_eq!(stats.command_errors, 1);
        assert_eq!(stats.heartbeats_written, 1);
        assert_eq!(stats.lock_operations, 1);
        assert_eq!(stats.active_connections, 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StoreMetrics::default();
        let clone = metrics.clone();
        clone.record_result_written();
        assert_eq!(metrics.get_stats().results_written, 1);
    }
}
