use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use osm_core::{
    ExecutionConfig, Task, TaskResult, Workflow, WorkflowExecutor, WorkflowLoader,
    WorkflowResult,
};
use osm_errors::DistributedResult;
use tracing::{error, info, warn};

/// 解析工作流并交给执行器，执行结果统一折叠为 [`TaskResult`]
pub struct TaskExecutionManager {
    worker_id: String,
    loader: Arc<dyn WorkflowLoader>,
    executor: Arc<dyn WorkflowExecutor>,
    workspace_dir: Option<PathBuf>,
}

impl TaskExecutionManager {
    pub fn new(
        worker_id: String,
        loader: Arc<dyn WorkflowLoader>,
        executor: Arc<dyn WorkflowExecutor>,
        workspace_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            worker_id,
            loader,
            executor,
            workspace_dir,
        }
    }

    /// 执行任务，任何错误都转换为 failed 结果
    pub async fn execute(&self, task: &Task) -> TaskResult {
        let started = Instant::now();
        if !Task::is_valid_id(&task.id) {
            warn!("拒绝执行任务, 非法的任务ID: {:?}", task.id);
            return TaskResult::failed(&task.id, format!("invalid task id: {:?}", task.id));
        }
        info!(
            "Processing task: task_id={}, workflow={}, kind={}, target={}",
            task.id, task.workflow_name, task.workflow_kind, task.target
        );

        let result = match self.run_workflow(task).await {
            Ok(outcome) if !outcome.is_failed() => {
                TaskResult::completed(&task.id, outcome.output, outcome.exports)
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "workflow reported failure".to_string());
                warn!("任务 {} 工作流执行失败: {}", task.id, message);
                TaskResult::failed(&task.id, message)
                    .with_output(outcome.output)
                    .with_exports(outcome.exports)
            }
            Err(e) => {
                error!("任务 {} 执行出错: {}", task.id, e);
                TaskResult::failed(&task.id, e.to_string())
            }
        };

        info!(
            "Task {} finished with status {:?} in {:?}",
            task.id,
            result.status,
            started.elapsed()
        );
        result
    }

    async fn run_workflow(&self, task: &Task) -> DistributedResult<WorkflowResult> {
        let workflow = self
            .loader
            .load(&task.workflow_name, task.workflow_kind)
            .await?;
        let config = ExecutionConfig {
            task_id: task.id.clone(),
            worker_id: self.worker_id.clone(),
            target: task.target.clone(),
            workspace: self.workspace_dir.as_ref().map(|dir| dir.join(&task.id)),
        };

        match &workflow {
            Workflow::Flow(flow) => self.executor.execute_flow(flow, &task.params, &config).await,
            Workflow::Module(module) => {
                self.executor
                    .execute_module(module, &task.params, &config)
                    .await
            }
        }
    }
}
