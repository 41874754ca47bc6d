use std::collections::HashMap;

use chrono::{DateTime, Utc};
use osm_errors::DistributedResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 可分发的任务单元
///
/// 一个任务对应一次工作流执行（对某个目标运行一个 module 或 flow）。
///
/// # 状态约束
///
/// - `Running` 时 `worker_id` 非空且 `started_at` 已设置
/// - `Completed` / `Failed` 时 `completed_at` 已设置
///
/// # 生命周期
///
/// ```text
/// Pending ──(Worker弹出)──> Running ──> Completed / Failed
///    ^                         │
///    └──(Master判定Worker失效)──┘
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workflow_name: String,
    pub workflow_kind: WorkflowKind,
    pub target: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    pub status: TaskStatus,
    /// 仅在 Running 状态下非空
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工作流类型：单个 module 或由多个 module 组成的 flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Module,
    Flow,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Module => "module",
            WorkflowKind::Flow => "flow",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "module" => Ok(WorkflowKind::Module),
            "flow" => Ok(WorkflowKind::Flow),
            other => Err(format!("未知的工作流类型: {other}")),
        }
    }
}

impl Task {
    /// 创建新的待执行任务
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_kind: WorkflowKind,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_name: workflow_name.into(),
            workflow_kind,
            target: target.into(),
            params: HashMap::new(),
            status: TaskStatus::Pending,
            worker_id: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn with_params(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// 标记任务由指定Worker开始执行
    pub fn mark_running(&mut self, worker_id: &str) {
        self.status = TaskStatus::Running;
        self.worker_id = worker_id.to_string();
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// 所属Worker失效后交还任务所有权，工作内容本身不变
    pub fn reset_to_pending(&mut self) {
        self.status = TaskStatus::Pending;
        self.worker_id.clear();
        self.started_at = None;
    }

    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.status == TaskStatus::Running && self.worker_id == worker_id
    }

    /// 任务ID会作为工作目录名使用，不能包含路径分隔符或 `..`
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id != "."
            && !id.contains("..")
            && !id.contains(['/', '\\', '\0'])
    }

    pub fn to_json(&self) -> DistributedResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> DistributedResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 任务结果的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Completed,
    Failed,
}

impl From<TaskResultStatus> for TaskStatus {
    fn from(status: TaskResultStatus) -> Self {
        match status {
            TaskResultStatus::Completed => TaskStatus::Completed,
            TaskResultStatus::Failed => TaskStatus::Failed,
        }
    }
}

/// 已结束任务的终态记录，按任务ID存储，重复写入视为覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskResultStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub exports: HashMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(
        task_id: impl Into<String>,
        output: impl Into<String>,
        exports: HashMap<String, String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResultStatus::Completed,
            output: output.into(),
            error: None,
            exports,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResultStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
            exports: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_exports(mut self, exports: HashMap<String, String>) -> Self {
        self.exports = exports;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskResultStatus::Completed
    }

    pub fn to_json(&self) -> DistributedResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> DistributedResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
