use anyhow::Result;
use clap::{Arg, Command};
use osm_distributed::app::AppMode;
use osm_distributed::common::{common_args, start_application, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("osm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("osm 分布式任务协调系统")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["master", "worker", "all"])
                .default_value("all"),
        )
        .args(common_args())
        .get_matches();

    let mode: AppMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;

    start_application(StartupConfig::from_matches(&matches), mode, "osm").await
}
