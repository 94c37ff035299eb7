// 配置管理模块

use crate::source::SourcePreference;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 下载源配置
    #[serde(default)]
    pub source: SourceConfig,
    /// 任务状态持久化配置
    #[serde(default)]
    pub state: StateConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8710
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 默认下载目录
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// 分片大小 (MB)
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 任务内同时下载的文件数上限
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// 单个文件内同时在途的分片数上限
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,
    /// 单个分片的最大尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 单次范围请求的超时时间（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_chunk_size_mb() -> u64 {
    5
}

fn default_max_concurrent_files() -> usize {
    3
}

fn default_max_chunks_per_file() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            chunk_size_mb: default_chunk_size_mb(),
            max_concurrent_files: default_max_concurrent_files(),
            max_chunks_per_file: default_max_chunks_per_file(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DownloadConfig {
    /// 分片大小（字节）
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb * 1024 * 1024
    }
}

/// 下载源配置
///
/// 同一份观测数据可能有两条获取路径：归档门户的 HTTP Range 接口，
/// 以及镜像到公共对象存储桶的匿名访问
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    /// 源选择偏好（auto 优先对象存储，失败时回退门户）
    #[serde(default)]
    pub preference: SourcePreference,
    /// 对象存储公共镜像配置
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
}

/// 对象存储公共镜像配置
///
/// 归档方把观测数据镜像到一个匿名可读的公共桶，
/// 访问走 ranged GetObject，无需签名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// 桶名
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// 区域
    #[serde(default = "default_region")]
    pub region: String,
    /// 自定义端点（兼容 S3 协议的非 AWS 部署时使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_bucket() -> String {
    "stpubdata".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
        }
    }
}

/// 任务状态持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// 任务状态记录目录
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Running 任务心跳过期阈值（秒），超过视为进程孤儿，可续传
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state/jobs")
}

fn default_heartbeat_stale_secs() -> u64 {
    60
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            download: DownloadConfig::default(),
            source: SourceConfig::default(),
            state: StateConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path))?;
        Ok(config)
    }

    /// 加载配置，文件不存在或解析失败时回退默认值
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load(path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("加载配置失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }

    /// 保存配置到 TOML 文件
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
        }
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {}", path))?;
        Ok(())
    }
}
