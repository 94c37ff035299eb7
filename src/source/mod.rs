//! 下载源模块
//!
//! 同一份观测数据可能有两条获取路径：归档门户的 HTTP Range 接口，
//! 以及镜像到公共对象存储桶的匿名 ranged GetObject。
//! 解析时机选定具体变体，之后两者对外提供完全相同的字节范围读取契约。

pub mod resolver;

pub use resolver::SourceResolver;

use crate::error::DownloadError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectStore};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// 源选择偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    /// 优先对象存储公共镜像（延迟低、无单请求限流），失败时回退门户
    #[default]
    Auto,
    /// 强制走归档门户的 HTTP Range 接口
    ForceHttp,
    /// 强制走对象存储
    ForceObjectStore,
}

/// 文件定位符
///
/// 由上游的归档检索组件提供，下载引擎只消费不解释
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLocator {
    /// 本地保存文件名
    pub file_name: String,
    /// 归档门户的下载地址
    pub portal_url: String,
    /// 对象存储公共镜像中的键（存在镜像时由检索组件给出）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

/// 已解析的源类型标记（持久化与进度展示用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Http,
    ObjectStore,
}

/// 已解析的下载源
///
/// 解析时机按偏好选定变体（标签化枚举，不做运行时类型判断），
/// 两个变体提供相同的探测/范围读取接口
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    /// 归档门户 HTTP Range
    Http {
        client: Client,
        url: String,
        /// 单次范围请求的超时
        timeout: Duration,
    },
    /// 对象存储匿名 ranged GetObject
    ObjectStore {
        store: Arc<AmazonS3>,
        key: ObjectPath,
    },
}

impl ResolvedSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Http { .. } => SourceKind::Http,
            Self::ObjectStore { .. } => SourceKind::ObjectStore,
        }
    }

    /// 探测文件总大小
    ///
    /// HTTP 路径先 HEAD，被拒绝时退化为 `Range: bytes=0-0` 探测，
    /// 从 Content-Range 中取总大小；对象存储路径直接取对象元数据。
    /// 两条路都拿不到大小时返回 `SourceUnavailable`——分片规划绝不猜测大小
    pub async fn probe_size(&self) -> Result<u64, DownloadError> {
        match self {
            Self::Http {
                client,
                url,
                timeout,
            } => {
                // 1. HEAD 探测
                // 注意不要用 Response::content_length()——HEAD 响应没有响应体，
                // 它给的是体长度 0，这里要的是头里声明的大小
                let head = client.head(url).timeout(*timeout).send().await;
                if let Ok(resp) = head {
                    if resp.status().is_success() {
                        let len = resp
                            .headers()
                            .get(reqwest::header::CONTENT_LENGTH)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok());
                        if let Some(len) = len {
                            if len > 0 {
                                return Ok(len);
                            }
                        }
                    }
                }

                // 2. 部分服务器不允许 HEAD，用零长度范围请求再试一次
                let resp = client
                    .get(url)
                    .header(reqwest::header::RANGE, "bytes=0-0")
                    .timeout(*timeout)
                    .send()
                    .await
                    .map_err(|e| DownloadError::SourceUnavailable(e.to_string()))?;

                if resp.status().as_u16() == 206 {
                    if let Some(total) = parse_content_range_total(
                        resp.headers()
                            .get(reqwest::header::CONTENT_RANGE)
                            .and_then(|v| v.to_str().ok()),
                    ) {
                        return Ok(total);
                    }
                }

                Err(DownloadError::SourceUnavailable(format!(
                    "门户未报告文件大小: {}",
                    url
                )))
            }
            Self::ObjectStore { store, key } => {
                let meta = store.head(key).await?;
                Ok(meta.size)
            }
        }
    }

    /// 发起一次范围读取，返回字节流
    ///
    /// 范围为半开区间 `[start, end)`。HTTP 路径请求
    /// `Range: bytes=start-(end-1)` 并要求 206 Partial Content；
    /// 对象存储路径发等价的 ranged GetObject
    pub async fn fetch_range(
        &self,
        range: Range<u64>,
    ) -> Result<BoxStream<'static, Result<Bytes, DownloadError>>, DownloadError> {
        match self {
            Self::Http {
                client,
                url,
                timeout,
            } => {
                let resp = client
                    .get(url)
                    .header(
                        reqwest::header::RANGE,
                        format!("bytes={}-{}", range.start, range.end - 1),
                    )
                    .timeout(*timeout)
                    .send()
                    .await?;

                let status = resp.status();
                if status.as_u16() != 206 && !status.is_success() {
                    return Err(DownloadError::TransientNetwork(format!(
                        "范围请求状态码异常: {}",
                        status
                    )));
                }

                Ok(resp
                    .bytes_stream()
                    .map(|r| r.map_err(DownloadError::from))
                    .boxed())
            }
            Self::ObjectStore { store, key } => {
                let opts = GetOptions {
                    range: Some(GetRange::Bounded(range)),
                    ..Default::default()
                };
                let result = store.get_opts(key, opts).await?;
                Ok(result
                    .into_stream()
                    .map(|r| r.map_err(DownloadError::from))
                    .boxed())
            }
        }
    }
}

/// 从 `Content-Range: bytes 0-0/12345` 中解析总大小
fn parse_content_range_total(header: Option<&str>) -> Option<u64> {
    let value = header?;
    let total = value.rsplit('/').next()?;
    total.trim().parse::<u64>().ok().filter(|&t| t > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_serde() {
        assert_eq!(
            serde_json::to_string(&SourcePreference::Auto).unwrap(),
            "\"auto\""
        );
        assert_eq!(
            serde_json::to_string(&SourcePreference::ForceObjectStore).unwrap(),
            "\"force_object_store\""
        );
        let p: SourcePreference = serde_json::from_str("\"force_http\"").unwrap();
        assert_eq!(p, SourcePreference::ForceHttp);
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(
            parse_content_range_total(Some("bytes 0-0/12345")),
            Some(12345)
        );
        assert_eq!(
            parse_content_range_total(Some("bytes 0-0/23068672")),
            Some(23068672)
        );
        // 总大小未知时服务器会写 */
        assert_eq!(parse_content_range_total(Some("bytes 0-0/*")), None);
        assert_eq!(parse_content_range_total(None), None);
        assert_eq!(parse_content_range_total(Some("garbage")), None);
    }

    #[test]
    fn test_locator_serde_skips_missing_key() {
        let locator = FileLocator {
            file_name: "obs_001_drz.fits".to_string(),
            portal_url: "https://archive.example.org/download?id=obs_001".to_string(),
            object_key: None,
        };
        let json = serde_json::to_string(&locator).unwrap();
        assert!(!json.contains("object_key"));

        let parsed: FileLocator = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.file_name, "obs_001_drz.fits");
        assert!(parsed.object_key.is_none());
    }
}
