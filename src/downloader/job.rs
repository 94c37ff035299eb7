//! 任务与文件状态模型
//!
//! 任务状态是文件状态聚合的纯函数：全部文件完成 ⇒ 任务完成；
//! 任何文件不可恢复地失败 ⇒ 任务失败；显式取消请求短路为已取消。
//! 文件的 `downloaded_bytes` 恒等于已完成分片长度之和，不可独立设置。

use crate::downloader::chunk::{Chunk, ChunkStatus};
use crate::source::{FileLocator, SourceKind, SourcePreference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 已创建，等待调度
    Pending,
    /// 下载中
    Running,
    /// 已暂停（可续传）
    Paused,
    /// 已完成（终态）
    Completed,
    /// 失败（可续传）
    Failed,
    /// 已取消（终态）
    Cancelled,
}

impl JobStatus {
    /// 是否为终态（不再接受续传）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// 是否允许显式清理
    pub fn is_cleanable(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 文件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 单个文件的下载状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDownloadState {
    /// 本地保存文件名
    pub file_name: String,
    /// 归档门户的下载地址
    pub portal_url: String,
    /// 对象存储公共镜像中的键
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    /// 实际选定的源类型（解析后填充）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<SourceKind>,
    /// 文件总字节数（解析时一次性确定，之后不可变）
    pub total_bytes: u64,
    /// 已下载字节数（恒等于已完成分片长度之和）
    pub downloaded_bytes: u64,
    /// 文件状态
    pub status: FileStatus,
    /// 失败原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 分片列表
    pub chunks: Vec<Chunk>,
}

impl FileDownloadState {
    pub fn new(locator: FileLocator) -> Self {
        Self {
            file_name: locator.file_name,
            portal_url: locator.portal_url,
            object_key: locator.object_key,
            source_kind: None,
            total_bytes: 0,
            downloaded_bytes: 0,
            status: FileStatus::Pending,
            error: None,
            chunks: Vec::new(),
        }
    }

    /// 还原定位符（续传时重新解析源）
    pub fn locator(&self) -> FileLocator {
        FileLocator {
            file_name: self.file_name.clone(),
            portal_url: self.portal_url.clone(),
            object_key: self.object_key.clone(),
        }
    }

    /// 下一个待调度的分片索引
    pub fn next_pending_chunk(&self) -> Option<usize> {
        self.chunks
            .iter()
            .position(|c| c.status == ChunkStatus::Pending)
    }

    /// 是否所有分片都已完成
    pub fn all_chunks_done(&self) -> bool {
        self.chunks.iter().all(|c| c.status == ChunkStatus::Done)
    }

    /// 重新计算已下载字节数（唯一的写入口，保证不变量）
    pub fn recompute_downloaded(&mut self) {
        self.downloaded_bytes = self
            .chunks
            .iter()
            .filter(|c| c.is_done())
            .map(|c| c.len())
            .sum();
    }

    pub fn mark_chunk_in_progress(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::InProgress;
        }
    }

    /// 标记分片完成，累加本轮实际尝试次数
    pub fn mark_chunk_done(&mut self, index: usize, attempts: u32) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Done;
            chunk.attempts += attempts;
        }
        self.recompute_downloaded();
    }

    pub fn mark_chunk_failed(&mut self, index: usize, attempts: u32) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Failed;
            chunk.attempts += attempts;
        }
    }

    /// 取消时把在途分片还原为待调度，字节不回滚
    pub fn revert_chunk_pending(&mut self, index: usize, attempts: u32) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            if chunk.status == ChunkStatus::InProgress {
                chunk.status = ChunkStatus::Pending;
            }
            chunk.attempts += attempts;
        }
    }
}

/// 下载任务
///
/// 一次用户发起的导入请求，覆盖一个或多个文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    /// 任务 ID
    pub job_id: String,
    /// 逻辑分组标识（通常是一次观测的标识符）
    pub source_id: String,
    /// 源选择偏好（续传时沿用）
    pub preference: SourcePreference,
    /// 任务状态
    pub status: JobStatus,
    /// 失败原因（仅任务级失败时填充，人类可读）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// 最近一次持久化更新时间，兼作存活心跳
    pub updated_at: DateTime<Utc>,
    /// 文件列表
    pub files: Vec<FileDownloadState>,
}

impl DownloadJob {
    pub fn new(
        source_id: String,
        locators: Vec<FileLocator>,
        preference: SourcePreference,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            source_id,
            preference,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            files: locators.into_iter().map(FileDownloadState::new).collect(),
        }
    }

    /// 任务总字节数
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_bytes).sum()
    }

    /// 任务已下载字节数
    pub fn downloaded_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.downloaded_bytes).sum()
    }

    /// 进度百分比，钳制在 [0, 100]
    pub fn percent(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            // 大小未解析前报 0；全空文件的任务完成时直接报 100
            return if self.status == JobStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        let percent = self.downloaded_bytes() as f64 / total as f64 * 100.0;
        percent.clamp(0.0, 100.0)
    }

    /// 更新心跳时间
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
    }

    pub fn mark_paused(&mut self) {
        self.status = JobStatus::Paused;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// 调度收尾后按文件聚合推导任务终态
    ///
    /// 优先级：任何失败文件 ⇒ Failed；全部完成 ⇒ Completed；
    /// 否则还有未完成文件（暂停退出）⇒ Paused
    pub fn finalize_from_files(&mut self) {
        let failed: Vec<&FileDownloadState> = self
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .collect();

        if !failed.is_empty() {
            let detail = failed
                .iter()
                .map(|f| {
                    format!(
                        "{}: {}",
                        f.file_name,
                        f.error.as_deref().unwrap_or("未知错误")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            self.mark_failed(format!("{} 个文件下载失败 ({})", failed.len(), detail));
        } else if self
            .files
            .iter()
            .all(|f| f.status == FileStatus::Completed)
        {
            self.mark_completed();
        } else {
            self.mark_paused();
        }
    }

    /// 续传前重置：所有非 Done 分片回到 Pending，
    /// 未完成文件回到 Pending，清除错误信息
    ///
    /// 尝试计数保留——崩溃后无法确认的只有在途状态，不包括历史尝试
    pub fn prepare_resume(&mut self) {
        for file in &mut self.files {
            if file.status == FileStatus::Completed {
                continue;
            }
            for chunk in &mut file.chunks {
                if chunk.status != ChunkStatus::Done {
                    chunk.status = ChunkStatus::Pending;
                }
            }
            file.status = FileStatus::Pending;
            file.error = None;
            file.recompute_downloaded();
        }
        self.status = JobStatus::Pending;
        self.error = None;
        self.completed_at = None;
    }
}
