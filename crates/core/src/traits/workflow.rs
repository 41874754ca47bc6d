//! 工作流协作方接口
//!
//! 工作流定义格式和真正的步骤执行器不属于协调子系统，这里只定义边界：
//! [`WorkflowLoader`] 按名称解析定义，[`WorkflowExecutor`] 阻塞执行并返回结果。

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::WorkflowKind;
use crate::DistributedResult;

/// 工作流中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub command: String,
    /// 将该步骤标准输出导出为指定名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// 由多个module按顺序组成的flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub modules: Vec<ModuleDefinition>,
}

/// 加载时确定的工作流，执行时按变体分派
#[derive(Debug, Clone, PartialEq)]
pub enum Workflow {
    Module(ModuleDefinition),
    Flow(FlowDefinition),
}

impl Workflow {
    pub fn name(&self) -> &str {
        match self {
            Workflow::Module(module) => &module.name,
            Workflow::Flow(flow) => &flow.name,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        match self {
            Workflow::Module(_) => WorkflowKind::Module,
            Workflow::Flow(_) => WorkflowKind::Flow,
        }
    }
}

/// 工作流运行的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowRunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowResult {
    pub status: WorkflowRunStatus,
    pub output: String,
    pub error: Option<String>,
    pub exports: HashMap<String, String>,
}

impl WorkflowResult {
    pub fn completed(output: impl Into<String>, exports: HashMap<String, String>) -> Self {
        Self {
            status: WorkflowRunStatus::Completed,
            output: output.into(),
            error: None,
            exports,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: WorkflowRunStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
            exports: HashMap::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowRunStatus::Failed
    }
}

/// 单次执行的上下文
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub task_id: String,
    pub worker_id: String,
    pub target: String,
    pub workspace: Option<PathBuf>,
}

/// 按名称解析工作流定义
#[async_trait]
pub trait WorkflowLoader: Send + Sync {
    async fn load(&self, name: &str, kind: WorkflowKind) -> DistributedResult<Workflow>;
}

/// 工作流执行器，调用会阻塞到工作流结束
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute_flow(
        &self,
        flow: &FlowDefinition,
        params: &HashMap<String, serde_json::Value>,
        config: &ExecutionConfig,
    ) -> DistributedResult<WorkflowResult>;

    async fn execute_module(
        &self,
        module: &ModuleDefinition,
        params: &HashMap<String, serde_json::Value>,
        config: &ExecutionConfig,
    ) -> DistributedResult<WorkflowResult>;
}
