use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use osm_core::{
    ExecutionConfig, FlowDefinition, ModuleDefinition, WorkflowExecutor, WorkflowResult,
    WorkflowRunStatus, WorkflowStep,
};
use osm_errors::{DistributedError, DistributedResult};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Shell工作流执行器
///
/// 每个步骤通过 `sh -c` 运行，命令中的 `{{name}}` 占位符依次由
/// `target`/`task_id`/`worker_id`、module 默认参数、任务参数和之前步骤的导出值替换，
/// 替换值作为单引号字符串插入，不会被 shell 解释。
/// 第一个非零退出码终止整个工作流并返回失败状态。
pub struct ShellExecutor {
    shell: String,
    step_timeout: Option<Duration>,
}

struct StepOutput {
    success: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// 跨步骤累积的执行状态
struct RunState {
    vars: HashMap<String, String>,
    exports: HashMap<String, String>,
    output: Vec<String>,
}

impl RunState {
    fn into_result(self, failure: Option<String>) -> WorkflowResult {
        WorkflowResult {
            status: if failure.is_some() {
                WorkflowRunStatus::Failed
            } else {
                WorkflowRunStatus::Completed
            },
            output: self.output.join("\n"),
            error: failure,
            exports: self.exports,
        }
    }
}

impl ShellExecutor {
    /// 创建新的Shell执行器
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            step_timeout: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// 单个步骤的最长运行时间，超时的进程会被终止
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    fn initial_state(
        defaults: &HashMap<String, String>,
        params: &HashMap<String, serde_json::Value>,
        config: &ExecutionConfig,
    ) -> RunState {
        let mut vars = defaults.clone();
        for (key, value) in params {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(key.clone(), rendered);
        }
        vars.insert("target".to_string(), config.target.clone());
        vars.insert("task_id".to_string(), config.task_id.clone());
        vars.insert("worker_id".to_string(), config.worker_id.clone());

        RunState {
            vars,
            exports: HashMap::new(),
            output: Vec::new(),
        }
    }

    /// 运行 module 的全部步骤，返回失败原因
    async fn run_module(
        &self,
        module: &ModuleDefinition,
        state: &mut RunState,
        workspace: Option<&Path>,
    ) -> DistributedResult<Option<String>> {
        for (key, value) in &module.params {
            state
                .vars
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        for step in &module.steps {
            let command = render(&step.command, &state.vars);
            debug!("module {} 执行步骤 {}: {}", module.name, step.name, command);

            let outcome = self.run_step(step, &command, workspace).await?;
            let stdout = outcome.stdout.trim().to_string();
            if !stdout.is_empty() {
                state.output.push(stdout.clone());
            }

            if !outcome.success {
                let code = outcome
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                warn!(
                    "module {} 步骤 {} 失败, 退出码 {}",
                    module.name, step.name, code
                );
                return Ok(Some(format!(
                    "{}/{} exited with {}: {}",
                    module.name,
                    step.name,
                    code,
                    outcome.stderr.trim()
                )));
            }

            if let Some(name) = &step.export {
                state.vars.insert(name.clone(), stdout.clone());
                state.exports.insert(name.clone(), stdout);
            }
        }
        Ok(None)
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        command: &str,
        workspace: Option<&Path>,
    ) -> DistributedResult<StepOutput> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = workspace {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            DistributedError::TaskExecution(format!("无法启动步骤 {}: {e}", step.name))
        })?;

        let output = match self.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Ok(StepOutput {
                        success: false,
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("step timed out after {limit:?}"),
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| DistributedError::TaskExecution(format!("等待步骤 {} 失败: {e}", step.name)))?;

        Ok(StepOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn prepare_workspace(config: &ExecutionConfig) -> DistributedResult<()> {
        if let Some(dir) = &config.workspace {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                DistributedError::TaskExecution(format!(
                    "无法创建工作目录 {}: {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// 从左到右替换 `{{name}}` 和 `{{ name }}` 占位符
///
/// 每个值都按 shell 单引号规则转义后再插入，插入的文本不会再次展开。
/// 未知占位符保持原样。
fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        rendered.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            rendered.push_str(&rest[open..]);
            return rendered;
        };

        let name = after_open[..close].trim();
        match vars.get(name) {
            Some(value) => rendered.push_str(&shell_quote(value)),
            None => rendered.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    rendered.push_str(rest);
    rendered
}

/// 单引号包裹，内部的 `'` 转为 `'\''`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[async_trait]
impl WorkflowExecutor for ShellExecutor {
    async fn execute_flow(
        &self,
        flow: &FlowDefinition,
        params: &HashMap<String, serde_json::Value>,
        config: &ExecutionConfig,
    ) -> DistributedResult<WorkflowResult> {
        Self::prepare_workspace(config).await?;
        let started = Instant::now();
        let mut state = Self::initial_state(&flow.params, params, config);

        for module in &flow.modules {
            if let Some(failure) = self
                .run_module(module, &mut state, config.workspace.as_deref())
                .await?
            {
                return Ok(state.into_result(Some(failure)));
            }
        }

        info!(
            "flow {} 在 {:?} 内完成 ({} 个module)",
            flow.name,
            started.elapsed(),
            flow.modules.len()
        );
        Ok(state.into_result(None))
    }

    async fn execute_module(
        &self,
        module: &ModuleDefinition,
        params: &HashMap<String, serde_json::Value>,
        config: &ExecutionConfig,
    ) -> DistributedResult<WorkflowResult> {
        Self::prepare_workspace(config).await?;
        let started = Instant::now();
        let mut state = Self::initial_state(&HashMap::new(), params, config);

        let failure = self
            .run_module(module, &mut state, config.workspace.as_deref())
            .await?;
        if failure.is_none() {
            info!("module {} 在 {:?} 内完成", module.name, started.elapsed());
        }
        Ok(state.into_result(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str, command: &str, export: Option<&str>) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            command: command.to_string(),
            export: export.map(str::to_string),
        }
    }

    fn module(name: &str, steps: Vec<WorkflowStep>) -> ModuleDefinition {
        ModuleDefinition {
            name: name.to_string(),
            description: None,
            params: HashMap::new(),
            steps,
        }
    }

    fn exec_config() -> ExecutionConfig {
        ExecutionConfig {
            task_id: "t-1".to_string(),
            worker_id: "w-1".to_string(),
            target: "example.com".to_string(),
            workspace: None,
        }
    }

    #[test]
    fn test_render_placeholders() {
        let vars = HashMap::from([
            ("target".to_string(), "example.com".to_string()),
            ("port".to_string(), "443".to_string()),
        ]);
        assert_eq!(
            render("scan {{target}}:{{ port }} {{unknown}}", &vars),
            "scan 'example.com':'443' {{unknown}}"
        );
    }

    #[test]
    fn test_render_does_not_expand_substituted_values() {
        let vars = HashMap::from([
            ("target".to_string(), "{{task_id}}".to_string()),
            ("task_id".to_string(), "T1".to_string()),
        ]);
        for _ in 0..50 {
            assert_eq!(render("scan {{target}}", &vars), "scan '{{task_id}}'");
        }
    }

    #[test]
    fn test_render_quotes_embedded_single_quotes() {
        let vars = HashMap::from([("name".to_string(), "it's".to_string())]);
        assert_eq!(render("echo {{name}}", &vars), r"echo 'it'\''s'");
        assert_eq!(render("echo {{name", &vars), "echo {{name");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_target_with_shell_metacharacters_is_passed_literally() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pwned");
        let target = format!("example.com; touch {}", marker.display());
        let config = ExecutionConfig {
            target: target.clone(),
            ..exec_config()
        };
        let executor = ShellExecutor::new();
        let m = module("echo", vec![step("echo-target", "echo {{target}}", Some("host"))]);

        let result = executor
            .execute_module(&m, &HashMap::new(), &config)
            .await
            .unwrap();
        assert_eq!(result.status, WorkflowRunStatus::Completed);
        assert_eq!(result.exports.get("host"), Some(&target));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_module_exports_step_stdout() {
        let executor = ShellExecutor::new();
        let m = module(
            "count",
            vec![
                step("echo-target", "echo {{target}}", Some("host")),
                step("count", "echo 3", Some("count")),
            ],
        );

        let result = executor
            .execute_module(&m, &HashMap::new(), &exec_config())
            .await
            .unwrap();
        assert_eq!(result.status, WorkflowRunStatus::Completed);
        assert_eq!(result.exports.get("host").map(String::as_str), Some("example.com"));
        assert_eq!(result.exports.get("count").map(String::as_str), Some("3"));
        assert!(result.output.contains("example.com"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_task_params_and_previous_exports_are_substituted() {
        let executor = ShellExecutor::new();
        let m = module(
            "chain",
            vec![
                step("first", "echo {{depth}}", Some("depth_out")),
                step("second", "echo got-{{depth_out}}", Some("final")),
            ],
        );
        let params = HashMap::from([("depth".to_string(), json!(2))]);

        let result = executor
            .execute_module(&m, &params, &exec_config())
            .await
            .unwrap();
        assert_eq!(result.exports.get("final").map(String::as_str), Some("got-2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_stops_and_fails() {
        let executor = ShellExecutor::new();
        let m = module(
            "broken",
            vec![
                step("fail", "echo oops >&2; exit 7", None),
                step("never", "echo never", Some("never")),
            ],
        );

        let result = executor
            .execute_module(&m, &HashMap::new(), &exec_config())
            .await
            .unwrap();
        assert!(result.is_failed());
        let error = result.error.unwrap();
        assert!(error.contains("exited with 7"));
        assert!(error.contains("oops"));
        assert!(!result.exports.contains_key("never"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_flow_runs_modules_in_order() {
        let executor = ShellExecutor::new();
        let flow = FlowDefinition {
            name: "recon".to_string(),
            description: None,
            params: HashMap::from([("word".to_string(), "hi".to_string())]),
            modules: vec![
                module("a", vec![step("a1", "echo {{word}}", Some("a_out"))]),
                module("b", vec![step("b1", "echo {{a_out}}-b", Some("b_out"))]),
            ],
        };

        let result = executor
            .execute_flow(&flow, &HashMap::new(), &exec_config())
            .await
            .unwrap();
        assert_eq!(result.status, WorkflowRunStatus::Completed);
        assert_eq!(result.exports.get("b_out").map(String::as_str), Some("hi-b"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_step_timeout_fails_workflow() {
        let executor = ShellExecutor::new().with_step_timeout(Duration::from_millis(100));
        let m = module("slow", vec![step("sleep", "sleep 5", None)]);

        let result = executor
            .execute_module(&m, &HashMap::new(), &exec_config())
            .await
            .unwrap();
        assert!(result.is_failed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_workspace_is_created_and_used() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("t-1");
        let config = ExecutionConfig {
            workspace: Some(workspace.clone()),
            ..exec_config()
        };
        let executor = ShellExecutor::new();
        let m = module("touch", vec![step("touch", "touch marker", None)]);

        let result = executor
            .execute_module(&m, &HashMap::new(), &config)
            .await
            .unwrap();
        assert_eq!(result.status, WorkflowRunStatus::Completed);
        assert!(workspace.join("marker").exists());
    }
}
