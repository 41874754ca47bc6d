use anyhow::Result;
use osm_distributed::app::AppMode;
use osm_distributed::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "osm-master",
        "osm 分布式任务协调系统 - Master服务",
        "启动Master节点，持有Master锁并负责Worker健康检查和任务重新分配",
        AppMode::Master,
        "Master",
    )
    .await
}
