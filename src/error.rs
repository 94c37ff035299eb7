//! 下载引擎错误分类
//!
//! 按传播语义划分：瞬时网络错误只在分片层内部重试，源不可用立即终止任务，
//! 状态损坏的任务只能从头重新开始。取消是干净的停止信号，不算真正的错误。

use thiserror::Error;

/// 下载引擎统一错误类型
#[derive(Debug, Error)]
pub enum DownloadError {
    /// 瞬时网络错误（超时、连接重置、异常状态码等），分片层带退避重试
    #[error("瞬时网络错误: {0}")]
    TransientNetwork(String),

    /// HTTP 与对象存储两条路径都无法解析出有效的大小/定位符
    #[error("下载源不可用: {0}")]
    SourceUnavailable(String),

    /// 短读：收到的字节数与请求的范围长度不符
    /// 短读按瞬时错误重试，绝不当作部分成功接受
    #[error("范围读取字节数不符: 期望 {expected} 字节, 实际 {received} 字节")]
    ShortRead { expected: u64, received: u64 },

    /// 持久化状态无法读取或解析，任务无法续传，只能重新开始
    #[error("任务状态损坏: {0}")]
    StateCorruption(String),

    /// 协作式取消信号
    #[error("下载已取消")]
    Cancelled,

    /// 本地磁盘 IO 错误
    #[error("磁盘 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 指定的任务不存在
    #[error("任务不存在: {0}")]
    JobNotFound(String),

    /// 请求参数或任务状态不满足操作前提
    #[error("无效请求: {0}")]
    InvalidRequest(String),
}

impl DownloadError {
    /// 是否可以在分片层重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::ShortRead { .. })
    }

    /// 是否为取消信号
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest 一侧的失败（超时、连接、读流中断）统一归类为瞬时错误，
        // 是否值得重试由分片层的重试预算决定
        Self::TransientNetwork(e.to_string())
    }
}

impl From<object_store::Error> for DownloadError {
    fn from(e: object_store::Error) -> Self {
        match e {
            // 对象不存在说明该路径解析不出有效定位符，不重试
            object_store::Error::NotFound { .. } => Self::SourceUnavailable(e.to_string()),
            other => Self::TransientNetwork(other.to_string()),
        }
    }
}
