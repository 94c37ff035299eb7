// Web服务模块
//
// 编排接口：调用方服务通过这组 HTTP 端点驱动下载引擎。
// 这里只有薄薄的一层请求/响应转换，引擎本身不依赖它。

pub mod handlers;

use crate::config::AppConfig;
use crate::downloader::JobManager;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 任务编排器
    pub job_manager: Arc<JobManager>,
    /// 应用配置
    pub config: Arc<AppConfig>,
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let api_routes = Router::new()
        .route("/jobs", post(handlers::start_job))
        .route("/jobs/resumable", get(handlers::list_resumable_jobs))
        .route("/jobs/:id/progress", get(handlers::get_progress))
        .route("/jobs/:id/pause", post(handlers::pause_job))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/jobs/:id/resume", post(handlers::resume_job))
        .route("/jobs/:id", delete(handlers::delete_job));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes)
        .layer(middleware)
        .with_state(state)
}
