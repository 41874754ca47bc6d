use chrono::{DateTime, Duration, Utc};
use osm_errors::DistributedResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Worker节点信息
///
/// 心跳时间单独存放在 `osm:workers:heartbeat` 中，周期性心跳不需要重写整条记录；
/// 这里的 `last_heartbeat` 只在状态变化时随记录一起写入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub tasks_complete: u64,
    #[serde(default)]
    pub tasks_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Worker状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成 `hostname-shortuuid` 形式的Worker ID
pub fn generate_worker_id(hostname: &str) -> String {
    let short = Uuid::new_v4().simple().to_string();
    format!("{}-{}", hostname, &short[..8])
}

impl WorkerInfo {
    /// 创建新的Worker信息，初始为空闲状态
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            hostname: hostname.into(),
            status: WorkerStatus::Idle,
            current_task_id: None,
            joined_at: now,
            last_heartbeat: now,
            tasks_complete: 0,
            tasks_failed: 0,
            ip_address: None,
            public_ip: None,
            alias: None,
        }
    }

    pub fn with_ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn with_public_ip(mut self, public_ip: Option<String>) -> Self {
        self.public_ip = public_ip;
        self
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    pub fn mark_busy(&mut self, task_id: &str) {
        self.status = WorkerStatus::Busy;
        self.current_task_id = Some(task_id.to_string());
    }

    pub fn mark_idle(&mut self) {
        self.status = WorkerStatus::Idle;
        self.current_task_id = None;
    }

    /// 记录一次任务执行结果
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.tasks_complete += 1;
        } else {
            self.tasks_failed += 1;
        }
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        is_heartbeat_stale(Some(self.last_heartbeat), now, timeout)
    }

    pub fn to_json(&self) -> DistributedResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> DistributedResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 心跳缺失、为零或早于 `now - timeout` 都视为超时
pub fn is_heartbeat_stale(
    heartbeat: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    match heartbeat {
        None => true,
        Some(ts) if ts.timestamp() <= 0 => true,
        Some(ts) => now - ts > timeout,
    }
}
