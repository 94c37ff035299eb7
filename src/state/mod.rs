//! 任务状态持久化
//!
//! 每个任务一个 JSON 记录文件，在每次分片状态迁移和任务状态迁移后落盘。
//! 写入采用"临时文件 + 原子重命名"：崩溃砸在写入中途时，
//! 磁盘上要么是旧的完整记录、要么是新的完整记录，绝不会有能被读成
//! 合法状态的半截文件。
//!
//! 存储放在一个小接口后面，换成嵌入式 KV 不需要动任务编排逻辑。

pub mod recovery;

pub use recovery::{scan_resumable, JobSummary};

use crate::downloader::chunk::ChunkStatus;
use crate::downloader::job::{DownloadJob, FileStatus};
use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, error, warn};

/// 任务状态存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 持久化一份任务记录
    async fn save(&self, job: &DownloadJob) -> Result<(), DownloadError>;

    /// 加载任务记录；不存在返回 None，无法解析返回 `StateCorruption`
    ///
    /// 返回前做归一化：持久化的 InProgress 分片一律还原为 Pending——
    /// 崩溃时在途的写入不可信，续传必须重新抓取
    async fn load(&self, job_id: &str) -> Result<Option<DownloadJob>, DownloadError>;

    /// 列出所有持久化的任务 ID
    async fn list(&self) -> Result<Vec<String>, DownloadError>;

    /// 删除任务记录（显式清理时调用）
    async fn delete(&self, job_id: &str) -> Result<(), DownloadError>;
}

/// JSON 文件存储
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }

    fn temp_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", job_id))
    }
}

/// 加载后的归一化：在途分片还原为待调度，重算派生字节数
///
/// 文件级的 Running 同样不可信，一并还原为 Pending
pub fn normalize_loaded(job: &mut DownloadJob) {
    for file in &mut job.files {
        let mut reverted = 0usize;
        for chunk in &mut file.chunks {
            if chunk.status == ChunkStatus::InProgress {
                chunk.status = ChunkStatus::Pending;
                reverted += 1;
            }
        }
        if reverted > 0 {
            debug!(
                "文件 {} 有 {} 个在途分片还原为待调度",
                file.file_name, reverted
            );
        }
        if file.status == FileStatus::Running {
            file.status = FileStatus::Pending;
        }
        file.recompute_downloaded();
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn save(&self, job: &DownloadJob) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.dir).await?;

        let content = serde_json::to_vec_pretty(job)
            .map_err(|e| DownloadError::StateCorruption(format!("序列化任务记录失败: {}", e)))?;

        // 先写临时文件再原子重命名
        let temp = self.temp_path(&job.job_id);
        let path = self.record_path(&job.job_id);
        fs::write(&temp, &content).await?;
        fs::rename(&temp, &path).await?;

        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<DownloadJob>, DownloadError> {
        let path = self.record_path(job_id);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut job: DownloadJob = serde_json::from_str(&content).map_err(|e| {
            // 状态损坏意味着引擎缺陷或磁盘层问题，必须大声记录
            error!("任务 {} 的状态记录无法解析，任务只能重新开始: {}", job_id, e);
            DownloadError::StateCorruption(format!("任务 {} 状态记录无法解析: {}", job_id, e))
        })?;

        normalize_loaded(&mut job);
        Ok(Some(job))
    }

    async fn list(&self) -> Result<Vec<String>, DownloadError> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // `.json.tmp` 是没写完的残留，不算记录
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            } else if name.ends_with(".json.tmp") {
                warn!("发现未完成的临时状态文件: {}", name);
            }
        }

        Ok(ids)
    }

    async fn delete(&self, job_id: &str) -> Result<(), DownloadError> {
        for path in [self.record_path(job_id), self.temp_path(job_id)] {
            match fs::remove_file(&path).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::chunk::plan_chunks;
    use crate::source::{FileLocator, SourcePreference};
    use tempfile::tempdir;

    fn sample_job() -> DownloadJob {
        let mut job = DownloadJob::new(
            "obs_42".to_string(),
            vec![FileLocator {
                file_name: "obs_42_drz.fits".to_string(),
                portal_url: "https://archive.example.org/download?id=obs_42".to_string(),
                object_key: Some("hst/public/obs_42_drz.fits".to_string()),
            }],
            SourcePreference::Auto,
        );
        job.files[0].total_bytes = 1000;
        job.files[0].chunks = plan_chunks(1000, 300).unwrap();
        job
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().to_path_buf());

        let mut job = sample_job();
        job.files[0].mark_chunk_done(0, 1);
        store.save(&job).await.unwrap();

        let loaded = store.load(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.source_id, "obs_42");
        assert_eq!(loaded.files[0].chunks.len(), 4);
        assert_eq!(loaded.files[0].downloaded_bytes, 300);
        assert_eq!(
            loaded.files[0].object_key.as_deref(),
            Some("hst/public/obs_42_drz.fits")
        );
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().to_path_buf());
        assert!(store.load("no-such-job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_normalizes_in_progress() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().to_path_buf());

        let mut job = sample_job();
        job.files[0].mark_chunk_done(0, 1);
        job.files[0].mark_chunk_in_progress(1);
        job.files[0].status = FileStatus::Running;
        store.save(&job).await.unwrap();

        let loaded = store.load(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.files[0].chunks[0].status, ChunkStatus::Done);
        assert_eq!(loaded.files[0].chunks[1].status, ChunkStatus::Pending);
        assert_eq!(loaded.files[0].status, FileStatus::Pending);
        // 派生字节数只算 Done 分片
        assert_eq!(loaded.files[0].downloaded_bytes, 300);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_loud_error() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().to_path_buf());

        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(dir.path().join("broken.json"), b"{ not valid json")
            .await
            .unwrap();

        let err = store.load("broken").await.unwrap_err();
        assert!(matches!(err, DownloadError::StateCorruption(_)));
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().to_path_buf());

        let job = sample_job();
        store.save(&job).await.unwrap();
        store.save(&job).await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![job.job_id.clone()]);
        assert!(!dir
            .path()
            .join(format!("{}.json.tmp", job.job_id))
            .exists());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().to_path_buf());

        let job_a = sample_job();
        let job_b = sample_job();
        store.save(&job_a).await.unwrap();
        store.save(&job_b).await.unwrap();

        let mut ids = store.list().await.unwrap();
        ids.sort();
        let mut expected = vec![job_a.job_id.clone(), job_b.job_id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        store.delete(&job_a.job_id).await.unwrap();
        assert!(store.load(&job_a.job_id).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap(), vec![job_b.job_id.clone()]);

        // 删除不存在的记录是幂等的
        store.delete(&job_a.job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_empty_dir() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("not-created-yet"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
