use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use osm_config::{AppConfig, OutputFormat};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 通用的应用启动配置，命令行参数优先于配置文件
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub worker_id: Option<String>,
    pub workflows_dir: Option<String>,
}

impl StartupConfig {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let get = |id: &str| matches.get_one::<String>(id).cloned();
        Self {
            config_path: get("config"),
            log_level: get("log-level"),
            log_format: get("log-format"),
            worker_id: get("worker-id"),
            workflows_dir: get("workflows-dir"),
        }
    }
}

/// 所有可执行文件共享的参数
pub fn common_args() -> Vec<Arg> {
    vec![
        Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .help("配置文件路径 (默认依次查找 config/osm.toml, osm.toml, /etc/osm/osm.toml)"),
        Arg::new("log-level")
            .short('l')
            .long("log-level")
            .value_name("LEVEL")
            .help("日志级别")
            .value_parser(["trace", "debug", "info", "warn", "error"]),
        Arg::new("log-format")
            .long("log-format")
            .value_name("FORMAT")
            .help("日志格式")
            .value_parser(["json", "pretty"]),
        Arg::new("worker-id")
            .short('w')
            .long("worker-id")
            .value_name("ID")
            .help("Worker ID，默认为 <hostname>-<8位随机串>"),
        Arg::new("workflows-dir")
            .long("workflows-dir")
            .value_name("DIR")
            .help("工作流定义目录"),
    ]
}

/// 初始化日志系统，`RUST_LOG` 优先于配置
pub fn init_logging(log_level: &str, log_format: OutputFormat, filter: Option<&str>) -> Result<()> {
    let directives = match filter {
        Some(extra) => format!("{log_level},{extra}"),
        None => log_level.to_string(),
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        OutputFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        OutputFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

/// 加载应用配置并应用命令行覆盖
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = &startup_config.log_level {
        config.logging.level = level
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(format) = &startup_config.log_format {
        config.logging.format = format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(worker_id) = &startup_config.worker_id {
        config.worker.worker_id = Some(worker_id.clone());
    }
    if let Some(dir) = &startup_config.workflows_dir {
        config.worker.workflows_dir = dir.clone();
    }

    Ok(config)
}

/// 启动应用程序的通用函数
pub async fn start_application(
    startup_config: StartupConfig,
    app_mode: AppMode,
    service_name: &str,
) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(
        config.logging.level.as_str(),
        config.logging.format,
        config.logging.filter.as_deref(),
    )?;

    info!("启动 {} 服务", service_name);
    info!("运行模式: {}", app_mode);
    if let Some(path) = &startup_config.config_path {
        info!("配置文件: {}", path);
    }

    let app = Arc::new(Application::new(config, app_mode).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let token = shutdown_manager.subscribe();
        tokio::spawn(async move { app.run(token).await })
    };

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            signal?;
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown();

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut app_handle).await {
                Ok(Ok(Ok(()))) => info!("{} 服务已优雅关闭", service_name),
                Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {:#}", e),
                Ok(Err(e)) => error!("应用任务异常退出: {}", e),
                Err(_) => warn!("{} 服务关闭超时，强制退出", service_name),
            }
        }
        result = &mut app_handle => {
            shutdown_manager.shutdown();
            match result {
                Ok(Ok(())) => info!("{} 服务已停止", service_name),
                Ok(Err(e)) => {
                    error!("应用运行失败: {:#}", e);
                    return Err(e);
                }
                Err(e) => return Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            }
        }
    }

    info!("{} 服务已退出", service_name);
    Ok(())
}

/// `osm-master` / `osm-worker` 的入口
pub async fn run_cli(
    name: &'static str,
    about: &'static str,
    long_about: &'static str,
    app_mode: AppMode,
    service_name: &str,
) -> Result<()> {
    let matches = Command::new(name)
        .version(env!("CARGO_PKG_VERSION"))
        .about(about)
        .long_about(long_about)
        .args(common_args())
        .get_matches();

    start_application(StartupConfig::from_matches(&matches), app_mode, service_name).await
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("收到Ctrl+C信号");
        },
        result = terminate => {
            result?;
            info!("收到SIGTERM信号");
        },
    }
    Ok(())
}
