//! 启动恢复扫描
//!
//! 找出磁盘上可以续传的任务：已暂停的、已失败的，
//! 以及状态是 Running 但心跳早已过期的——后者说明拥有它的进程没了。

use crate::downloader::job::{DownloadJob, JobStatus};
use crate::error::DownloadError;
use crate::state::StateStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info};

/// 可续传任务摘要
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub percent: f64,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

impl JobSummary {
    fn from_job(job: &DownloadJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            source_id: job.source_id.clone(),
            status: job.status,
            percent: job.percent(),
            total_bytes: job.total_bytes(),
            downloaded_bytes: job.downloaded_bytes(),
            updated_at: job.updated_at,
        }
    }
}

/// 任务是否可续传
///
/// Running 任务按心跳判定：`updated_at` 在每次落盘时刷新，
/// 超过阈值没动静的 Running 记录属于进程孤儿
fn is_resumable(job: &DownloadJob, stale_after: Duration) -> bool {
    match job.status {
        JobStatus::Paused | JobStatus::Failed => true,
        JobStatus::Running => Utc::now() - job.updated_at > stale_after,
        _ => false,
    }
}

/// 扫描持久化记录，返回可续传任务摘要（按最近更新排序）
///
/// 损坏的记录跳过并大声记录，不让一条坏记录挡住其余任务的恢复
pub async fn scan_resumable(
    store: &dyn StateStore,
    stale_after: Duration,
) -> Result<Vec<JobSummary>, DownloadError> {
    let mut summaries = Vec::new();

    for job_id in store.list().await? {
        match store.load(&job_id).await {
            Ok(Some(job)) => {
                if is_resumable(&job, stale_after) {
                    summaries.push(JobSummary::from_job(&job));
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("任务 {} 状态记录损坏，跳过恢复: {}", job_id, e);
            }
        }
    }

    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    if !summaries.is_empty() {
        info!("发现 {} 个可续传任务", summaries.len());
    }
    Ok(summaries)
}
