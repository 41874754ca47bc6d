pub mod components;
pub mod config;
pub mod executors;
pub mod loader;
pub mod service;

pub use components::WorkerStats;
pub use config::{WorkerServiceConfig, WorkerServiceConfigBuilder};
pub use executors::ShellExecutor;
pub use loader::FileWorkflowLoader;
pub use service::{WorkerService, WorkerServiceBuilder};
