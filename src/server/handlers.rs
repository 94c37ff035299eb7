// API处理器模块

use crate::downloader::{JobStatus, ProgressSnapshot, StartRequest};
use crate::error::DownloadError;
use crate::server::AppState;
use crate::state::JobSummary;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// 统一响应包装
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 状态码 (0: 成功, 其他: 错误码)
    pub code: i32,
    /// 消息
    pub message: String,
    /// 数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "Success".to_string(),
            data: Some(data),
        }
    }
}

/// 引擎错误到 HTTP 状态码的映射
fn error_status(e: &DownloadError) -> StatusCode {
    match e {
        DownloadError::JobNotFound(_) => StatusCode::NOT_FOUND,
        DownloadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// GET /health
pub async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

/// 创建任务响应
#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: String,
}

/// POST /api/v1/jobs
/// 创建并启动下载任务
pub async fn start_job(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<ApiResponse<StartJobResponse>>, StatusCode> {
    match state.job_manager.start(req).await {
        Ok(job_id) => {
            info!("创建下载任务成功: {}", job_id);
            Ok(Json(ApiResponse::success(StartJobResponse { job_id })))
        }
        Err(e) => {
            error!("创建下载任务失败: {}", e);
            Err(error_status(&e))
        }
    }
}

/// GET /api/v1/jobs/:id/progress
/// 读取任务进度快照
pub async fn get_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<ProgressSnapshot>>, StatusCode> {
    match state.job_manager.poll(&job_id).await {
        Ok(snapshot) => Ok(Json(ApiResponse::success(snapshot))),
        Err(e) => Err(error_status(&e)),
    }
}

/// POST /api/v1/jobs/:id/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, StatusCode> {
    match state.job_manager.pause(&job_id).await {
        Ok(()) => Ok(Json(ApiResponse::success(()))),
        Err(e) => {
            error!("暂停任务 {} 失败: {}", job_id, e);
            Err(error_status(&e))
        }
    }
}

/// 取消任务响应
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub status: JobStatus,
}

/// POST /api/v1/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<CancelJobResponse>>, StatusCode> {
    match state.job_manager.cancel(&job_id).await {
        Ok(status) => Ok(Json(ApiResponse::success(CancelJobResponse { status }))),
        Err(e) => {
            error!("取消任务 {} 失败: {}", job_id, e);
            Err(error_status(&e))
        }
    }
}

/// 续传任务响应
#[derive(Debug, Serialize)]
pub struct ResumeJobResponse {
    pub job_id: String,
    pub is_resume: bool,
}

/// POST /api/v1/jobs/:id/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<ResumeJobResponse>>, StatusCode> {
    match state.job_manager.resume(&job_id).await {
        Ok(job_id) => Ok(Json(ApiResponse::success(ResumeJobResponse {
            job_id,
            is_resume: true,
        }))),
        Err(e) => {
            error!("续传任务 {} 失败: {}", job_id, e);
            Err(error_status(&e))
        }
    }
}

/// GET /api/v1/jobs/resumable
/// 列出可续传任务
pub async fn list_resumable_jobs(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<JobSummary>>>, StatusCode> {
    match state.job_manager.list_resumable().await {
        Ok(jobs) => Ok(Json(ApiResponse::success(jobs))),
        Err(e) => {
            error!("扫描可续传任务失败: {}", e);
            Err(error_status(&e))
        }
    }
}

/// 清理任务的查询参数
#[derive(Debug, Deserialize)]
pub struct DeleteJobQuery {
    /// 是否连同已下载的本地文件一起删除
    #[serde(default)]
    pub delete_files: bool,
}

/// DELETE /api/v1/jobs/:id
/// 显式清理任务记录
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<DeleteJobQuery>,
) -> Result<Json<ApiResponse<()>>, StatusCode> {
    match state.job_manager.delete(&job_id, query.delete_files).await {
        Ok(()) => Ok(Json(ApiResponse::success(()))),
        Err(e) => {
            error!("清理任务 {} 失败: {}", job_id, e);
            Err(error_status(&e))
        }
    }
}
