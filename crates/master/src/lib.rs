pub mod config;
pub mod leader_election;
pub mod master;
pub mod task_service;
pub mod worker_failure_detector;

pub use config::{generate_master_id, MasterServiceConfig};
pub use leader_election::LeaderElection;
pub use master::{Master, MasterState};
pub use task_service::{QueueStats, TaskService, TaskStatusView};
pub use worker_failure_detector::{
    DetectionReport, WorkerFailureDetector, WorkerFailureDetectorConfig,
    WorkerFailureDetectorService,
};
