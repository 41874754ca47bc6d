use osm_config::{StoreBackend, StoreConfig};
use osm_core::CoordinationStore;
use osm_errors::DistributedResult;
use std::sync::Arc;
use tracing::info;

use crate::in_memory_store::InMemoryStore;
use crate::redis_store::RedisStore;

/// 协调存储工厂
pub struct StoreFactory;

impl StoreFactory {
    /// 根据配置创建存储实例，Redis 后端会在返回前完成连通性检查
    pub async fn create(config: &StoreConfig) -> DistributedResult<Arc<dyn CoordinationStore>> {
        match config.backend {
            StoreBackend::Redis => {
                info!("创建Redis协调存储");
                Ok(Arc::new(RedisStore::connect(config).await?))
            }
            StoreBackend::Memory => {
                info!("创建内存协调存储");
                Ok(Arc::new(InMemoryStore::new()))
            }
        }
    }

    pub fn get_supported_types() -> Vec<&'static str> {
        vec!["redis", "memory"]
    }
}

/// 根据配置创建协调存储
pub async fn create_store(config: &StoreConfig) -> DistributedResult<Arc<dyn CoordinationStore>> {
    StoreFactory::create(config).await
}
