pub mod heartbeat_manager;
pub mod task_execution;
pub mod worker_lifecycle;

pub use heartbeat_manager::HeartbeatManager;
pub use task_execution::TaskExecutionManager;
pub use worker_lifecycle::{WorkerLifecycle, WorkerStats};
