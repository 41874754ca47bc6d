pub mod keys;
pub mod models;
pub mod traits;

pub use models::{
    generate_worker_id, is_heartbeat_stale, Task, TaskResult, TaskResultStatus, TaskStatus,
    WorkerInfo, WorkerStatus, WorkflowKind,
};
pub use traits::{
    CoordinationStore, ExecutionConfig, FlowDefinition, ModuleDefinition, Workflow,
    WorkflowExecutor, WorkflowLoader, WorkflowResult, WorkflowRunStatus, WorkflowStep,
};

pub use osm_errors::{DistributedError, DistributedResult};
