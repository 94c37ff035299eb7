//! 进度聚合
//!
//! 完成的分片把字节数推进滚动窗口；速度取自最近窗口内的吞吐，
//! 不用任务生命周期均值，这样反映的是当前而不是历史。
//! 进度只在整分片粒度上更新，聚合读取廉价且无须细粒度锁。

use crate::downloader::job::{DownloadJob, FileStatus, JobStatus};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 默认速度窗口：10 秒
const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// 速度计算器
///
/// 记录最近窗口内各分片完成时的 (时刻, 字节数) 样本，
/// 速度 = 窗口字节总量 / 窗口跨度（跨度不足 1 秒按 1 秒计，避免除零与早期虚高）
#[derive(Debug)]
pub struct SpeedCalculator {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// 记录一个分片完成（整分片粒度）
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.prune(now);
        self.samples.push_back((now, bytes));
    }

    /// 当前速度（字节/秒）；窗口内没有样本时为 0
    pub fn speed_bytes_per_sec(&mut self) -> u64 {
        let now = Instant::now();
        self.prune(now);

        let Some(&(oldest, _)) = self.samples.front() else {
            return 0;
        };

        let total: u64 = self.samples.iter().map(|(_, b)| b).sum();
        let elapsed = now.duration_since(oldest).as_secs_f64().max(1.0);
        (total as f64 / elapsed) as u64
    }

    /// 淘汰窗口外的样本
    fn prune(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// 单个文件的进度视图
#[derive(Debug, Clone, Serialize)]
pub struct FileProgress {
    pub file_name: String,
    pub status: FileStatus,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub percent: f64,
}

/// 任务进度快照
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// 进度百分比，[0, 100]
    pub percent: f64,
    /// 当前速度（字节/秒），基于最近完成分片的滚动窗口
    pub speed_bytes_per_sec: u64,
    /// 预计剩余秒数；速度为 0（尚无完成分片或已暂停）时缺省
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// 任务级错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub per_file: Vec<FileProgress>,
}

/// 从任务状态和当前速度生成进度快照
pub fn snapshot_job(job: &DownloadJob, speed_bytes_per_sec: u64) -> ProgressSnapshot {
    let total_bytes = job.total_bytes();
    let downloaded_bytes = job.downloaded_bytes();

    let eta_secs = if speed_bytes_per_sec > 0 && downloaded_bytes < total_bytes {
        Some((total_bytes - downloaded_bytes) / speed_bytes_per_sec)
    } else {
        None
    };

    let per_file = job
        .files
        .iter()
        .map(|f| {
            let percent = if f.total_bytes == 0 {
                if f.status == FileStatus::Completed {
                    100.0
                } else {
                    0.0
                }
            } else {
                (f.downloaded_bytes as f64 / f.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
            };
            FileProgress {
                file_name: f.file_name.clone(),
                status: f.status,
                total_bytes: f.total_bytes,
                downloaded_bytes: f.downloaded_bytes,
                percent,
            }
        })
        .collect();

    ProgressSnapshot {
        job_id: job.job_id.clone(),
        source_id: job.source_id.clone(),
        status: job.status,
        total_bytes,
        downloaded_bytes,
        percent: job.percent(),
        speed_bytes_per_sec,
        eta_secs,
        error: job.error.clone(),
        per_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::chunk::plan_chunks;
    use crate::source::{FileLocator, SourcePreference};

    #[test]
    fn test_speed_zero_without_samples() {
        let mut calc = SpeedCalculator::default();
        assert_eq!(calc.speed_bytes_per_sec(), 0);
    }

    #[test]
    fn test_speed_from_recent_samples() {
        let mut calc = SpeedCalculator::default();
        calc.record(4 * 1024 * 1024);
        // 窗口跨度不足 1 秒按 1 秒计：4MB 样本 ⇒ 4MB/s
        assert_eq!(calc.speed_bytes_per_sec(), 4 * 1024 * 1024);

        calc.record(2 * 1024 * 1024);
        assert_eq!(calc.speed_bytes_per_sec(), 6 * 1024 * 1024);
    }

    #[test]
    fn test_stale_samples_pruned() {
        let mut calc = SpeedCalculator::new(Duration::from_millis(50));
        calc.record(1024);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(calc.speed_bytes_per_sec(), 0);
    }

    fn snapshot_fixture() -> DownloadJob {
        let mut job = DownloadJob::new(
            "obs_777".to_string(),
            vec![FileLocator {
                file_name: "x.fits".to_string(),
                portal_url: "https://archive.example.org/x".to_string(),
                object_key: None,
            }],
            SourcePreference::Auto,
        );
        job.files[0].total_bytes = 1000;
        job.files[0].chunks = plan_chunks(1000, 250).unwrap();
        job
    }

    #[test]
    fn test_eta_absent_when_speed_zero() {
        let job = snapshot_fixture();
        let snap = snapshot_job(&job, 0);
        assert!(snap.eta_secs.is_none());
        assert_eq!(snap.speed_bytes_per_sec, 0);
    }

    #[test]
    fn test_eta_from_remaining_bytes() {
        let mut job = snapshot_fixture();
        job.files[0].mark_chunk_done(0, 1);
        job.files[0].mark_chunk_done(1, 1);

        // 剩余 500 字节，速度 100 B/s ⇒ 5 秒
        let snap = snapshot_job(&job, 100);
        assert_eq!(snap.eta_secs, Some(5));
        assert_eq!(snap.downloaded_bytes, 500);
        assert!((snap.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eta_absent_when_complete() {
        let mut job = snapshot_fixture();
        for i in 0..4 {
            job.files[0].mark_chunk_done(i, 1);
        }
        let snap = snapshot_job(&job, 100);
        assert!(snap.eta_secs.is_none());
        assert!((snap.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_per_file_progress() {
        let mut job = snapshot_fixture();
        job.files[0].mark_chunk_done(0, 1);
        let snap = snapshot_job(&job, 0);
        assert_eq!(snap.per_file.len(), 1);
        assert_eq!(snap.per_file[0].downloaded_bytes, 250);
        assert!((snap.per_file[0].percent - 25.0).abs() < f64::EPSILON);
    }
}
