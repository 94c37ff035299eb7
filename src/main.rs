use skyfetch::{
    config::AppConfig,
    downloader::JobManager,
    logging,
    server::{self, AppState},
    state::{scan_resumable, JsonStateStore},
};
use std::sync::Arc;
use tracing::{info, warn};

/// 配置文件路径
const CONFIG_PATH: &str = "config/app.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置并初始化日志（_log_guard 必须保持存活）
    let config = AppConfig::load_or_default(CONFIG_PATH).await;
    let _log_guard = logging::init_logging(&config.log);

    info!("SkyFetch v{} 启动中...", env!("CARGO_PKG_VERSION"));

    // 组合根：存储和编排器各构造一次，注入使用方
    let store = Arc::new(JsonStateStore::new(config.state.state_dir.clone()));
    let job_manager = Arc::new(JobManager::new(&config, store.clone())?);

    // 启动时报告磁盘上可续传的任务，续传由调用方显式发起
    let stale = chrono::Duration::seconds(config.state.heartbeat_stale_secs as i64);
    match scan_resumable(store.as_ref(), stale).await {
        Ok(resumable) if !resumable.is_empty() => {
            for summary in &resumable {
                info!(
                    "可续传任务: {} (来源 {}, {:.1}%, 状态 {})",
                    summary.job_id, summary.source_id, summary.percent, summary.status
                );
            }
        }
        Ok(_) => {}
        Err(e) => warn!("恢复扫描失败: {}", e),
    }

    let state = AppState {
        job_manager,
        config: Arc::new(config.clone()),
    };
    let app = server::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("编排接口监听: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    // 监听关闭信号，支持优雅关闭
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始关闭...");
        }
    }

    info!("应用已退出");
    Ok(())
}
