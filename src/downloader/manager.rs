//! 任务编排
//!
//! JobManager 是引擎的编排面：创建、轮询、暂停、取消、续传、清理任务。
//! 由组合根构造一次并注入调用方，不做进程级单例。
//! 单个任务的状态变更全部经过该任务的互斥锁串行化，并发到达的分片完成
//! 回调不会让外部读者观察到被破坏的不变量；不相关任务互不争用。

use crate::config::AppConfig;
use crate::downloader::chunk::{plan_chunks, ChunkStatus};
use crate::downloader::fetcher::{fetch_chunk_with_retry, FetchOutcome};
use crate::downloader::job::{DownloadJob, FileStatus, JobStatus};
use crate::downloader::limiter::ConcurrencyLimiter;
use crate::downloader::progress::{snapshot_job, ProgressSnapshot, SpeedCalculator};
use crate::error::DownloadError;
use crate::source::{FileLocator, ResolvedSource, SourcePreference, SourceResolver};
use crate::state::{scan_resumable, JobSummary, StateStore};
use anyhow::Context;
use dashmap::DashMap;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 心跳落盘间隔：长分片下载期间也要定期刷新 `updated_at`，
/// 否则恢复扫描会把活着的任务误判为进程孤儿
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// 任务编排器运行参数
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub download_dir: PathBuf,
    pub chunk_size: u64,
    pub max_concurrent_files: usize,
    pub max_chunks_per_file: usize,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub default_preference: SourcePreference,
    pub heartbeat_stale: chrono::Duration,
}

impl JobManagerConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            download_dir: cfg.download.download_dir.clone(),
            chunk_size: cfg.download.chunk_size_bytes(),
            max_concurrent_files: cfg.download.max_concurrent_files,
            max_chunks_per_file: cfg.download.max_chunks_per_file,
            max_retries: cfg.download.max_retries,
            request_timeout: Duration::from_secs(cfg.download.request_timeout_secs),
            default_preference: cfg.source.preference,
            heartbeat_stale: chrono::Duration::seconds(cfg.state.heartbeat_stale_secs as i64),
        }
    }
}

/// 创建下载任务的请求
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StartRequest {
    /// 逻辑分组标识（通常是一次观测的标识符）
    pub source_id: String,
    /// 要导入的文件定位符列表，由检索组件提供
    pub files: Vec<FileLocator>,
    /// 源选择偏好；缺省用配置里的全局偏好
    #[serde(default)]
    pub preference: Option<SourcePreference>,
}

/// 任务运行时句柄
///
/// 内存态的任务共享点：状态互斥锁、取消令牌、暂停标记、速度窗口
struct JobHandle {
    job: Arc<Mutex<DownloadJob>>,
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    speed: Arc<parking_lot::Mutex<SpeedCalculator>>,
}

impl JobHandle {
    fn new(job: DownloadJob) -> Self {
        Self {
            job: Arc::new(Mutex::new(job)),
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
            speed: Arc::new(parking_lot::Mutex::new(SpeedCalculator::default())),
        }
    }
}

/// 把任务当前状态落盘
///
/// 锁内只做克隆，磁盘写入在锁外进行；落盘失败记录错误但不打断下载——
/// 下一次状态迁移会再试
async fn persist(store: &dyn StateStore, handle: &JobHandle) {
    let snapshot = {
        let mut job = handle.job.lock().await;
        job.touch();
        job.clone()
    };
    if let Err(e) = store.save(&snapshot).await {
        error!("任务 {} 状态落盘失败: {}", snapshot.job_id, e);
    }
}

/// 任务编排器
pub struct JobManager {
    config: JobManagerConfig,
    resolver: SourceResolver,
    store: Arc<dyn StateStore>,
    /// 内存中的活跃任务表（job_id -> 句柄）
    jobs: DashMap<String, Arc<JobHandle>>,
}

impl JobManager {
    pub fn new(app_cfg: &AppConfig, store: Arc<dyn StateStore>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("skyfetch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("构建 HTTP 客户端失败")?;

        let config = JobManagerConfig::from_app_config(app_cfg);
        let resolver = SourceResolver::new(
            client,
            app_cfg.source.object_store.clone(),
            config.request_timeout,
        );

        Ok(Self {
            config,
            resolver,
            store,
            jobs: DashMap::new(),
        })
    }

    /// 创建并启动一个下载任务，返回任务 ID
    pub async fn start(&self, req: StartRequest) -> Result<String, DownloadError> {
        if req.files.is_empty() {
            return Err(DownloadError::InvalidRequest(
                "任务不包含任何文件".to_string(),
            ));
        }
        for locator in &req.files {
            validate_file_name(&locator.file_name)?;
        }

        let preference = req.preference.unwrap_or(self.config.default_preference);
        let mut job = DownloadJob::new(req.source_id, req.files, preference);
        let job_id = job.job_id.clone();

        // 创建即落盘：进程在启动后任何时刻崩溃，任务都在恢复扫描的视野里
        job.touch();
        self.store.save(&job).await?;

        info!(
            "创建下载任务 {} (来源 {}, 文件数 {})",
            job_id,
            job.source_id,
            job.files.len()
        );

        let handle = Arc::new(JobHandle::new(job));
        self.jobs.insert(job_id.clone(), handle.clone());
        self.spawn_runner(handle);

        Ok(job_id)
    }

    /// 读取任务进度快照
    pub async fn poll(&self, job_id: &str) -> Result<ProgressSnapshot, DownloadError> {
        if let Some(handle) = self.jobs.get(job_id).map(|h| Arc::clone(h.value())) {
            let job = handle.job.lock().await;
            let speed = if job.status == JobStatus::Running {
                handle.speed.lock().speed_bytes_per_sec()
            } else {
                0
            };
            return Ok(snapshot_job(&job, speed));
        }

        // 不在内存中（进程重启后未续传的任务），从持久化记录读
        let job = self
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| DownloadError::JobNotFound(job_id.to_string()))?;
        Ok(snapshot_job(&job, 0))
    }

    /// 暂停任务：停止调度新分片，在途分片收尾后状态转为 Paused 并落盘
    pub async fn pause(&self, job_id: &str) -> Result<(), DownloadError> {
        let handle = self
            .jobs
            .get(job_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| DownloadError::JobNotFound(job_id.to_string()))?;

        {
            let job = handle.job.lock().await;
            if !matches!(job.status, JobStatus::Running | JobStatus::Pending) {
                return Err(DownloadError::InvalidRequest(format!(
                    "任务当前状态 {} 不能暂停",
                    job.status
                )));
            }
        }

        handle.pause.store(true, Ordering::SeqCst);
        info!("任务 {} 暂停请求已受理，等待在途分片收尾", job_id);
        Ok(())
    }

    /// 取消任务
    ///
    /// 协作式：取消信号在发起新范围请求前和在途请求的流边界被观察到；
    /// 已完成分片的磁盘字节保持原样
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus, DownloadError> {
        if let Some(handle) = self.jobs.get(job_id).map(|h| Arc::clone(h.value())) {
            handle.cancel.cancel();
            let status = {
                let mut job = handle.job.lock().await;
                if !job.status.is_terminal() {
                    job.mark_cancelled();
                }
                job.status
            };
            persist(self.store.as_ref(), &handle).await;
            info!("任务 {} 已取消", job_id);
            return Ok(status);
        }

        // 不在内存中，直接改持久化记录
        let mut job = self
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| DownloadError::JobNotFound(job_id.to_string()))?;
        if !job.status.is_terminal() {
            job.mark_cancelled();
            job.touch();
            self.store.save(&job).await?;
        }
        Ok(job.status)
    }

    /// 续传任务
    ///
    /// 重新加载持久化状态（加载时在途分片已归一化），把失败分片也重置为
    /// 待调度，重新解析源后走与 Start 完全相同的调度路径；
    /// 已完成分片对应的磁盘字节原样保留，只抓取剩余分片
    pub async fn resume(&self, job_id: &str) -> Result<String, DownloadError> {
        if let Some(handle) = self.jobs.get(job_id).map(|h| Arc::clone(h.value())) {
            let job = handle.job.lock().await;
            if matches!(job.status, JobStatus::Running | JobStatus::Pending) {
                return Err(DownloadError::InvalidRequest(
                    "任务正在运行，无需续传".to_string(),
                ));
            }
        }

        let mut job = self
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| DownloadError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            return Err(DownloadError::InvalidRequest(format!(
                "任务已处于终态 {}，不能续传",
                job.status
            )));
        }

        job.prepare_resume();
        job.touch();
        self.store.save(&job).await?;

        let pending: usize = job
            .files
            .iter()
            .flat_map(|f| &f.chunks)
            .filter(|c| c.status == ChunkStatus::Pending)
            .count();
        info!("续传任务 {} (待抓取分片 {})", job_id, pending);

        let handle = Arc::new(JobHandle::new(job));
        self.jobs.insert(job_id.to_string(), handle.clone());
        self.spawn_runner(handle);

        Ok(job_id.to_string())
    }

    /// 列出可续传任务（已暂停、已失败、心跳过期的 Running 孤儿）
    pub async fn list_resumable(&self) -> Result<Vec<JobSummary>, DownloadError> {
        scan_resumable(self.store.as_ref(), self.config.heartbeat_stale).await
    }

    /// 显式清理任务记录
    ///
    /// Running/Paused/Pending 状态受保护，先取消或等待结束；
    /// `delete_files` 为真时连同已下载的本地文件一起删除
    pub async fn delete(&self, job_id: &str, delete_files: bool) -> Result<(), DownloadError> {
        if let Some(handle) = self.jobs.get(job_id).map(|h| Arc::clone(h.value())) {
            let status = handle.job.lock().await.status;
            if !status.is_cleanable() {
                return Err(DownloadError::InvalidRequest(format!(
                    "任务状态 {} 受保护，先取消或等待结束",
                    status
                )));
            }
        }

        let job = self
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| DownloadError::JobNotFound(job_id.to_string()))?;
        if !job.status.is_cleanable() {
            return Err(DownloadError::InvalidRequest(format!(
                "任务状态 {} 受保护，先取消或等待结束",
                job.status
            )));
        }

        self.jobs.remove(job_id);
        self.store.delete(job_id).await?;

        if delete_files {
            for file in &job.files {
                let path = self.config.download_dir.join(&file.file_name);
                match tokio::fs::remove_file(&path).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("删除文件 {:?} 失败: {}", path, e),
                }
            }
        }

        info!("任务 {} 已清理", job_id);
        Ok(())
    }

    fn spawn_runner(&self, handle: Arc<JobHandle>) {
        let runner = JobRunner {
            config: self.config.clone(),
            resolver: self.resolver.clone(),
            store: self.store.clone(),
            handle,
        };
        tokio::spawn(async move { runner.run().await });
    }
}

fn validate_file_name(name: &str) -> Result<(), DownloadError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(DownloadError::InvalidRequest(format!(
            "非法文件名: {:?}",
            name
        )));
    }
    Ok(())
}

/// 单个任务的执行器
///
/// Start 和 Resume 共用同一条执行路径：解析源 → 规划分片 →
/// 文件级信号量 + 分片级信号量并发调度 → 聚合终态
#[derive(Clone)]
struct JobRunner {
    config: JobManagerConfig,
    resolver: SourceResolver,
    store: Arc<dyn StateStore>,
    handle: Arc<JobHandle>,
}

impl JobRunner {
    async fn run(self) {
        let job_id = { self.handle.job.lock().await.job_id.clone() };

        // 心跳：分片很大时两次状态迁移之间可能隔很久，定期刷新 updated_at
        let heartbeat = {
            let store = self.store.clone();
            let handle = self.handle.clone();
            let cancel = self.handle.cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => persist(store.as_ref(), &handle).await,
                    }
                }
            })
        };

        let result = self.run_inner().await;
        heartbeat.abort();

        if let Err(e) = result {
            if e.is_cancelled() {
                info!("任务 {} 在调度前被取消", job_id);
            } else {
                error!("任务 {} 执行失败: {}", job_id, e);
                {
                    let mut job = self.handle.job.lock().await;
                    if !job.status.is_terminal() {
                        job.mark_failed(e.to_string());
                    }
                }
            }
            persist(self.store.as_ref(), &self.handle).await;
        }
    }

    async fn run_inner(&self) -> Result<(), DownloadError> {
        let cancel = self.handle.cancel.clone();

        // 1. 解析源、规划分片、预分配目标文件
        let sources = self.resolve_and_plan().await?;

        // 2. 进入 Running
        {
            let mut job = self.handle.job.lock().await;
            if job.status.is_terminal() {
                return Ok(());
            }
            job.mark_running();
        }
        persist(self.store.as_ref(), &self.handle).await;

        // 3. 并发调度文件：文件额度限制同时活跃的文件数
        let limiter = Arc::new(ConcurrencyLimiter::new(
            self.config.max_concurrent_files,
            self.config.max_chunks_per_file,
        ));
        let mut join_set = JoinSet::new();
        for (file_index, source) in sources {
            let runner = self.clone();
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = match limiter.acquire_file(&cancel).await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                runner.run_file(file_index, source, &limiter).await;
            });
        }
        while let Some(res) = join_set.join_next().await {
            if let Err(e) = res {
                error!("文件下载任务异常退出: {}", e);
            }
        }

        // 4. 聚合终态：显式取消短路；失败文件不连累兄弟文件已写的字节
        {
            let mut job = self.handle.job.lock().await;
            if !job.status.is_terminal() {
                if cancel.is_cancelled() {
                    job.mark_cancelled();
                } else {
                    job.finalize_from_files();
                }
            }
        }
        persist(self.store.as_ref(), &self.handle).await;

        let job = self.handle.job.lock().await;
        match job.status {
            JobStatus::Completed => info!(
                "✅ 任务 {} 下载完成: {} 字节",
                job.job_id,
                job.downloaded_bytes()
            ),
            JobStatus::Cancelled => info!("任务 {} 已取消", job.job_id),
            JobStatus::Paused => info!("任务 {} 已暂停 ({:.1}%)", job.job_id, job.percent()),
            JobStatus::Failed => warn!(
                "任务 {} 失败: {}",
                job.job_id,
                job.error.as_deref().unwrap_or("未知错误")
            ),
            _ => {}
        }
        Ok(())
    }

    /// 解析每个未完成文件的源；首次解析时确定总大小、规划分片、预分配文件
    ///
    /// 任何一个文件源不可用都立即终止整个任务（SourceUnavailable 不重试）
    async fn resolve_and_plan(&self) -> Result<Vec<(usize, ResolvedSource)>, DownloadError> {
        let (preference, files): (SourcePreference, Vec<(usize, FileLocator, bool)>) = {
            let job = self.handle.job.lock().await;
            (
                job.preference,
                job.files
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (i, f.locator(), f.status == FileStatus::Completed))
                    .collect(),
            )
        };

        let mut sources = Vec::new();
        for (index, locator, completed) in files {
            if completed {
                continue;
            }
            if self.handle.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let (source, total) = self.resolver.resolve(&locator, preference).await?;

            {
                let mut job = self.handle.job.lock().await;
                let file = &mut job.files[index];
                if file.chunks.is_empty() {
                    file.total_bytes = total;
                    file.chunks = plan_chunks(total, self.config.chunk_size)?;
                    debug!(
                        "文件 {} 总大小 {} 字节，规划 {} 个分片",
                        file.file_name,
                        total,
                        file.chunks.len()
                    );
                } else if file.total_bytes != total {
                    // 续传时远端文件变了，旧的分片划分作废，只能重新开始
                    return Err(DownloadError::StateCorruption(format!(
                        "文件 {} 大小与持久化记录不一致: 远端 {} != 记录 {}",
                        file.file_name, total, file.total_bytes
                    )));
                }
                file.source_kind = Some(source.kind());
            }

            self.prepare_dest_file(&locator.file_name, total).await?;
            sources.push((index, source));
        }

        persist(self.store.as_ref(), &self.handle).await;
        Ok(sources)
    }

    /// 预分配目标文件
    ///
    /// 占位到目标大小，各分片工作者直接对各自偏移做定位写；
    /// 续传时文件已是目标大小，不截断已有数据
    async fn prepare_dest_file(&self, file_name: &str, total: u64) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let path = self.config.download_dir.join(file_name);
        let file = tokio::fs::File::options()
            .create(true)
            .write(true)
            .open(&path)
            .await?;
        if file.metadata().await?.len() != total {
            file.set_len(total).await?;
        }
        Ok(())
    }

    /// 单个文件的分片调度循环
    ///
    /// 分片额度信号量限制在途请求数；取消与暂停在取分片前和
    /// 拿到额度后各检查一次，保证有界时间内停止发起新请求
    async fn run_file(
        &self,
        file_index: usize,
        source: ResolvedSource,
        limiter: &ConcurrencyLimiter,
    ) {
        let cancel = &self.handle.cancel;
        let pause = &self.handle.pause;

        let (file_name, dest) = {
            let mut job = self.handle.job.lock().await;
            let file = &mut job.files[file_index];
            file.status = FileStatus::Running;
            (
                file.file_name.clone(),
                self.config.download_dir.join(&file.file_name),
            )
        };
        persist(self.store.as_ref(), &self.handle).await;
        info!("开始下载文件 {}", file_name);

        let slots = limiter.chunk_slots();
        let mut join_set: JoinSet<(usize, FetchOutcome)> = JoinSet::new();
        let mut file_failed = false;

        loop {
            // 先收割已完成的分片结果
            while let Some(res) = join_set.try_join_next() {
                self.on_chunk_result(file_index, res, &mut file_failed).await;
            }

            if cancel.is_cancelled() || pause.load(Ordering::SeqCst) || file_failed {
                break;
            }

            // 取下一个待调度分片并标记在途
            let next_chunk = {
                let mut job = self.handle.job.lock().await;
                let file = &mut job.files[file_index];
                file.next_pending_chunk().map(|i| {
                    file.mark_chunk_in_progress(i);
                    file.chunks[i].clone()
                })
            };

            match next_chunk {
                Some(chunk) => {
                    persist(self.store.as_ref(), &self.handle).await;

                    let permit = match ConcurrencyLimiter::acquire_chunk(&slots, cancel).await {
                        Ok(p) => p,
                        Err(_) => {
                            self.revert_in_progress(file_index, chunk.index).await;
                            break;
                        }
                    };
                    // 等额度期间可能来了暂停/取消请求，发请求前再看一眼
                    if cancel.is_cancelled() || pause.load(Ordering::SeqCst) {
                        self.revert_in_progress(file_index, chunk.index).await;
                        break;
                    }

                    let source = source.clone();
                    let dest = dest.clone();
                    let cancel = cancel.clone();
                    let max_retries = self.config.max_retries;
                    join_set.spawn(async move {
                        let outcome =
                            fetch_chunk_with_retry(&source, &chunk, &dest, &cancel, max_retries)
                                .await;
                        drop(permit);
                        (chunk.index, outcome)
                    });
                }
                None => {
                    // 没有待调度分片：等在途分片收尾，全部结束就退出
                    match join_set.join_next().await {
                        Some(res) => {
                            self.on_chunk_result(file_index, res, &mut file_failed).await
                        }
                        None => break,
                    }
                }
            }
        }

        // 等待在途分片收尾（取消时它们会在流边界很快返回）
        while let Some(res) = join_set.join_next().await {
            self.on_chunk_result(file_index, res, &mut file_failed).await;
        }

        // 文件终态
        {
            let mut job = self.handle.job.lock().await;
            let file = &mut job.files[file_index];
            if file_failed {
                file.status = FileStatus::Failed;
            } else if file.all_chunks_done() {
                file.status = FileStatus::Completed;
                info!(
                    "文件 {} 下载完成: {} 字节",
                    file.file_name, file.downloaded_bytes
                );
            } else {
                // 取消/暂停退出，剩余分片留给续传
                file.status = FileStatus::Pending;
            }
        }
        persist(self.store.as_ref(), &self.handle).await;
    }

    /// 处理单个分片的抓取结果
    async fn on_chunk_result(
        &self,
        file_index: usize,
        res: Result<(usize, FetchOutcome), tokio::task::JoinError>,
        file_failed: &mut bool,
    ) {
        let (chunk_index, outcome) = match res {
            Ok(pair) => pair,
            Err(e) => {
                error!("分片工作者异常退出: {}", e);
                *file_failed = true;
                return;
            }
        };

        match outcome {
            FetchOutcome::Done {
                bytes_written,
                attempts,
            } => {
                {
                    let mut job = self.handle.job.lock().await;
                    job.files[file_index].mark_chunk_done(chunk_index, attempts);
                }
                // 进度样本只在整分片完成时记录
                self.handle.speed.lock().record(bytes_written);
                persist(self.store.as_ref(), &self.handle).await;
            }
            FetchOutcome::Failed { error, attempts } => {
                {
                    let mut job = self.handle.job.lock().await;
                    let file = &mut job.files[file_index];
                    file.mark_chunk_failed(chunk_index, attempts);
                    file.error = Some(error.to_string());
                }
                *file_failed = true;
                persist(self.store.as_ref(), &self.handle).await;
            }
            FetchOutcome::Cancelled { attempts } => {
                {
                    let mut job = self.handle.job.lock().await;
                    job.files[file_index].revert_chunk_pending(chunk_index, attempts);
                }
                persist(self.store.as_ref(), &self.handle).await;
            }
        }
    }

    async fn revert_in_progress(&self, file_index: usize, chunk_index: usize) {
        let mut job = self.handle.job.lock().await;
        job.files[file_index].revert_chunk_pending(chunk_index, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JsonStateStore;
    use tempfile::tempdir;

    fn test_manager(dir: &std::path::Path) -> JobManager {
        let mut cfg = AppConfig::default();
        cfg.download.download_dir = dir.join("downloads");
        let store = Arc::new(JsonStateStore::new(dir.join("state")));
        JobManager::new(&cfg, store).unwrap()
    }

    fn locator(name: &str) -> FileLocator {
        FileLocator {
            file_name: name.to_string(),
            portal_url: format!("https://archive.example.org/download/{}", name),
            object_key: None,
        }
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("obs_001_drz.fits").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("a/b.fits").is_err());
        assert!(validate_file_name("a\\b.fits").is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_empty_file_list() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        let err = manager
            .start(StartRequest {
                source_id: "obs_1".to_string(),
                files: vec![],
                preference: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_poll_unknown_job() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        let err = manager.poll("no-such-id").await.unwrap_err();
        assert!(matches!(err, DownloadError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_persisted_job_without_handle() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        // 模拟上一个进程留下的暂停任务
        let mut job = DownloadJob::new(
            "obs_9".to_string(),
            vec![locator("x.fits")],
            SourcePreference::Auto,
        );
        job.mark_paused();
        manager.store.save(&job).await.unwrap();

        let status = manager.cancel(&job.job_id).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);

        // 取消是终态，幂等
        let status = manager.cancel(&job.job_id).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_resume_rejects_terminal_job() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        let mut job = DownloadJob::new(
            "obs_9".to_string(),
            vec![locator("x.fits")],
            SourcePreference::Auto,
        );
        job.mark_cancelled();
        manager.store.save(&job).await.unwrap();

        let err = manager.resume(&job.job_id).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_protects_paused_job() {
        let dir = tempdir().unwrap();
        let manager = test_manager(dir.path());

        let mut job = DownloadJob::new(
            "obs_9".to_string(),
            vec![locator("x.fits")],
            SourcePreference::Auto,
        );
        job.mark_paused();
        manager.store.save(&job).await.unwrap();

        let err = manager.delete(&job.job_id, false).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidRequest(_)));

        // 取消后可以清理
        manager.cancel(&job.job_id).await.unwrap();
        manager.delete(&job.job_id, false).await.unwrap();
        assert!(manager.store.load(&job.job_id).await.unwrap().is_none());
    }
}
