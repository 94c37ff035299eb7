//! 并发额度控制
//!
//! 两个相互独立的上限：任务内同时活跃的文件数、单个文件内同时在途的分片数。
//! 以信号量的 acquire/release 形式包在每次抓取外面，额度满时挂起调用方。
//! 上限的意义是约束对归档方的总并发请求量，避免自招限流，
//! 同时仍然跨文件重叠网络延迟。

use crate::error::DownloadError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// 任务级并发额度
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    /// 文件额度（任务内同时下载的文件数）
    file_slots: Arc<Semaphore>,
    /// 单文件内在途分片数上限
    max_chunks_per_file: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent_files: usize, max_chunks_per_file: usize) -> Self {
        Self {
            file_slots: Arc::new(Semaphore::new(max_concurrent_files.max(1))),
            max_chunks_per_file: max_chunks_per_file.max(1),
        }
    }

    /// 获取一个文件额度；等待期间任务被取消时返回 `Cancelled` 而不是永久挂起
    pub async fn acquire_file(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, DownloadError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            permit = self.file_slots.clone().acquire_owned() => {
                permit.map_err(|_| DownloadError::Cancelled)
            }
        }
    }

    /// 为单个文件创建分片额度信号量
    pub fn chunk_slots(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.max_chunks_per_file))
    }

    /// 获取一个分片额度，同样对取消敏感
    pub async fn acquire_chunk(
        slots: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, DownloadError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            permit = slots.clone().acquire_owned() => {
                permit.map_err(|_| DownloadError::Cancelled)
            }
        }
    }
}
