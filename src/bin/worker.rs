use anyhow::Result;
use osm_distributed::app::AppMode;
use osm_distributed::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "osm-worker",
        "osm 分布式任务协调系统 - Worker服务",
        "启动Worker节点，从待执行队列领取任务并上报结果",
        AppMode::Worker,
        "Worker",
    )
    .await
}
