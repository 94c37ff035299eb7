//! 源解析器
//!
//! 按偏好决定每个文件走 HTTP Range 还是对象存储 ranged GetObject，
//! 并在解析时一次性确定文件总大小。

use crate::config::ObjectStoreConfig;
use crate::error::DownloadError;
use crate::source::{FileLocator, ResolvedSource, SourcePreference};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 源解析器
///
/// Auto 策略：定位符带对象键且公共桶能返回对象元数据时选对象存储
/// （延迟低、无单请求限流），否则回退归档门户；两条路都解析不出
/// 有效大小时整个文件判为 `SourceUnavailable`
#[derive(Debug, Clone)]
pub struct SourceResolver {
    client: Client,
    object_cfg: ObjectStoreConfig,
    /// 单次范围请求超时，传给 HTTP 变体
    request_timeout: Duration,
}

impl SourceResolver {
    pub fn new(client: Client, object_cfg: ObjectStoreConfig, request_timeout: Duration) -> Self {
        Self {
            client,
            object_cfg,
            request_timeout,
        }
    }

    /// 解析一个文件的下载源和总大小
    pub async fn resolve(
        &self,
        locator: &FileLocator,
        preference: SourcePreference,
    ) -> Result<(ResolvedSource, u64), DownloadError> {
        match preference {
            SourcePreference::ForceHttp => self.resolve_http(locator).await,
            SourcePreference::ForceObjectStore => self.resolve_object_store(locator).await,
            SourcePreference::Auto => {
                // 优先对象存储，失败回退门户
                if locator.object_key.is_some() {
                    match self.resolve_object_store(locator).await {
                        Ok(resolved) => return Ok(resolved),
                        Err(e) => {
                            warn!(
                                "文件 {} 对象存储路径不可用，回退门户: {}",
                                locator.file_name, e
                            );
                        }
                    }
                }
                self.resolve_http(locator).await
            }
        }
    }

    async fn resolve_http(
        &self,
        locator: &FileLocator,
    ) -> Result<(ResolvedSource, u64), DownloadError> {
        let source = ResolvedSource::Http {
            client: self.client.clone(),
            url: locator.portal_url.clone(),
            timeout: self.request_timeout,
        };
        let total = source.probe_size().await?;
        debug!(
            "文件 {} 解析为 HTTP 源, 总大小 {} 字节",
            locator.file_name, total
        );
        Ok((source, total))
    }

    async fn resolve_object_store(
        &self,
        locator: &FileLocator,
    ) -> Result<(ResolvedSource, u64), DownloadError> {
        let key = locator.object_key.as_deref().ok_or_else(|| {
            DownloadError::SourceUnavailable(format!(
                "文件 {} 未提供对象存储键",
                locator.file_name
            ))
        })?;

        let store = self.build_store()?;
        let source = ResolvedSource::ObjectStore {
            store,
            key: ObjectPath::from(key),
        };
        let total = source.probe_size().await?;
        debug!(
            "文件 {} 解析为对象存储源, 总大小 {} 字节",
            locator.file_name, total
        );
        Ok((source, total))
    }

    /// 构建匿名访问的对象存储客户端
    ///
    /// 公共桶不需要凭据，跳过签名
    fn build_store(&self) -> Result<Arc<AmazonS3>, DownloadError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&self.object_cfg.bucket)
            .with_region(&self.object_cfg.region)
            .with_skip_signature(true);

        if let Some(endpoint) = &self.object_cfg.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| DownloadError::SourceUnavailable(format!("对象存储配置无效: {}", e)))?;
        Ok(Arc::new(store))
    }
}
