//! 分片模型与分片规划
//!
//! 分片是文件内一段连续的字节范围，也是下载/重试/续传的最小粒度。
//! 一个文件的分片列表精确划分 `[0, total_bytes)`：无空洞、无重叠、按索引有序。

use crate::error::DownloadError;
use serde::{Deserialize, Serialize};

/// 默认分片大小: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 分片状态
///
/// 只沿 `Pending → InProgress → {Done | Failed}` 迁移；
/// 进程重启后持久化的 InProgress 不可信，加载时归一化回 Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// 等待调度
    Pending,
    /// 正在下载（仅归属它的工作者可以迁移它）
    InProgress,
    /// 全部字节已校验落盘
    Done,
    /// 重试预算耗尽
    Failed,
}

/// 分片信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// 分片索引
    pub index: usize,
    /// 起始字节（含）
    pub start_byte: u64,
    /// 结束字节（不含，半开区间）
    pub end_byte: u64,
    /// 分片状态
    pub status: ChunkStatus,
    /// 累计尝试次数
    pub attempts: u32,
}

impl Chunk {
    pub fn new(index: usize, start_byte: u64, end_byte: u64) -> Self {
        Self {
            index,
            start_byte,
            end_byte,
            status: ChunkStatus::Pending,
            attempts: 0,
        }
    }

    /// 分片长度（字节）
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    pub fn is_done(&self) -> bool {
        self.status == ChunkStatus::Done
    }
}

/// 计算分片划分
///
/// 产生 `ceil(total_bytes / chunk_size)` 个分片，最后一个截断为余数。
/// `total_bytes` 必须在规划前确定——源报告不出大小时上游已经报错，
/// 这里绝不猜测。`total_bytes == 0` 返回空列表（文件即刻完成）
pub fn plan_chunks(total_bytes: u64, chunk_size: u64) -> Result<Vec<Chunk>, DownloadError> {
    if chunk_size == 0 {
        return Err(DownloadError::InvalidRequest(
            "分片大小必须大于 0".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(total_bytes.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    let mut index = 0usize;

    while offset < total_bytes {
        let end = std::cmp::min(offset + chunk_size, total_bytes);
        chunks.push(Chunk::new(index, offset, end));
        offset = end;
        index += 1;
    }

    Ok(chunks)
}
