//! 存储中的键命名空间，全部以 `osm:` 为前缀

pub const KEY_PREFIX: &str = "osm";

/// 待执行任务队列 (list)
pub const PENDING_QUEUE_KEY: &str = "osm:tasks:pending";
/// 运行中任务 (hash: task_id -> Task JSON)
pub const RUNNING_TASKS_KEY: &str = "osm:tasks:running";
/// 已完成任务结果 (hash: task_id -> TaskResult JSON)
pub const COMPLETED_TASKS_KEY: &str = "osm:tasks:completed";
/// Worker注册表 (hash: worker_id -> WorkerInfo JSON)
pub const WORKERS_KEY: &str = "osm:workers";
/// Worker心跳 (hash: worker_id -> unix秒)
pub const WORKER_HEARTBEAT_KEY: &str = "osm:workers:heartbeat";
/// Master锁 (string, 带TTL, 值为leader ID)
pub const MASTER_LOCK_KEY: &str = "osm:master:lock";
