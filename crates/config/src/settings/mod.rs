pub mod app_config;
pub mod logging;
pub mod master_worker;
pub mod store;

pub use app_config::AppConfig;
pub use logging::{LogConfig, LogLevel, OutputFormat};
pub use master_worker::{MasterConfig, WorkerConfig};
pub use store::{StoreBackend, StoreConfig};
