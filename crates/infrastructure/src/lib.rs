pub mod in_memory_store;
pub mod redis_store;
pub mod store_factory;

pub use in_memory_store::InMemoryStore;
pub use redis_store::{RedisStore, StoreMetrics, StoreMetricsSnapshot};
pub use store_factory::{create_store, StoreFactory};
