// SkyFetch 核心库
// 天文归档观测数据的可续传分片下载引擎

// 配置管理模块
pub mod config;

// 下载引擎模块
pub mod downloader;

// 错误类型模块
pub mod error;

// 日志模块
pub mod logging;

// Web服务模块（编排接口）
pub mod server;

// 下载源模块
pub mod source;

// 任务状态持久化模块
pub mod state;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{
    DownloadJob, FileDownloadState, FileStatus, JobManager, JobStatus, ProgressSnapshot,
    StartRequest,
};
pub use error::DownloadError;
pub use server::AppState;
pub use source::{FileLocator, SourceKind, SourcePreference};
pub use state::{JobSummary, JsonStateStore, StateStore};
