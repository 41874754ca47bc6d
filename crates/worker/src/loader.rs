use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use osm_core::{
    FlowDefinition, ModuleDefinition, Workflow, WorkflowKind, WorkflowLoader, WorkflowStep,
};
use osm_errors::{DistributedError, DistributedResult};
use serde::Deserialize;
use tracing::debug;

/// 工作流定义文件
///
/// ```text
/// kind = "module"
/// description = "resolve and count subdomains"
///
/// [params]
/// wordlist = "small"
///
/// [[steps]]
/// name = "count"
/// command = "echo 3"
/// export = "count"
/// ```
///
/// flow 文件用 `modules = ["a", "b"]` 按顺序引用同目录下的 module 文件。
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    kind: WorkflowKind,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
    #[serde(default)]
    modules: Vec<String>,
}

/// 从 `<root>/<name>.toml` 加载工作流定义
#[derive(Debug, Clone)]
pub struct FileWorkflowLoader {
    root: PathBuf,
}

impl FileWorkflowLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> DistributedResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(DistributedError::invalid_params(format!(
                "非法的工作流名称: {name}"
            )));
        }
        Ok(self.root.join(format!("{name}.toml")))
    }

    async fn read_file(&self, name: &str) -> DistributedResult<WorkflowFile> {
        let path = self.path_for(name)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DistributedError::workflow_not_found(name));
            }
            Err(e) => {
                return Err(DistributedError::Internal(format!(
                    "读取工作流文件 {} 失败: {e}",
                    path.display()
                )));
            }
        };
        debug!("加载工作流文件: {}", path.display());
        toml::from_str(&content)
            .map_err(|e| DistributedError::Serialization(format!("工作流 {name} 格式错误: {e}")))
    }

    async fn load_module(&self, name: &str) -> DistributedResult<ModuleDefinition> {
        let file = self.read_file(name).await?;
        into_module(name, file)
    }
}

fn into_module(name: &str, file: WorkflowFile) -> DistributedResult<ModuleDefinition> {
    if file.kind != WorkflowKind::Module {
        return Err(DistributedError::invalid_params(format!(
            "工作流 {name} 是 {}, 需要 module",
            file.kind
        )));
    }
    if file.steps.is_empty() {
        return Err(DistributedError::invalid_params(format!(
            "module {name} 没有定义任何步骤"
        )));
    }
    Ok(ModuleDefinition {
        name: name.to_string(),
        description: file.description,
        params: file.params,
        steps: file.steps,
    })
}

#[async_trait]
impl WorkflowLoader for FileWorkflowLoader {
    async fn load(&self, name: &str, kind: WorkflowKind) -> DistributedResult<Workflow> {
        match kind {
            WorkflowKind::Module => Ok(Workflow::Module(self.load_module(name).await?)),
            WorkflowKind::Flow => {
                let file = self.read_file(name).await?;
                if file.kind != WorkflowKind::Flow {
                    return Err(DistributedError::invalid_params(format!(
                        "工作流 {name} 是 {}, 需要 flow",
                        file.kind
                    )));
                }
                if file.modules.is_empty() {
                    return Err(DistributedError::invalid_params(format!(
                        "flow {name} 没有引用任何 module"
                    )));
                }

                let mut modules = Vec::with_capacity(file.modules.len());
                for module_name in &file.modules {
                    modules.push(self.load_module(module_name).await?);
                }

                Ok(Workflow::Flow(FlowDefinition {
                    name: name.to_string(),
                    description: file.description,
                    params: file.params,
                    modules,
                }))
            }
        }
    }
}
