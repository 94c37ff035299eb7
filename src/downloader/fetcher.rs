//! 范围读取器
//!
//! 对已解析的源执行单个分片的范围读取：流式写入目标文件的对应偏移，
//! 校验收到的字节数与范围长度完全一致，带指数退避的有限次重试。
//! 同一文件的各分片工作者各自持有句柄、各写各的不相交区间，写路径无锁。

use crate::downloader::chunk::Chunk;
use crate::error::DownloadError;
use crate::source::ResolvedSource;
use futures::StreamExt;
use rand::Rng;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 重试退避基准间隔
const RETRY_BASE_DELAY_MS: u64 = 500;

/// 退避上限
const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// 分片抓取结果
///
/// 尝试次数随结果带回，由任务状态侧累加到分片的 `attempts` 上
#[derive(Debug)]
pub enum FetchOutcome {
    /// 分片全部字节已校验落盘
    Done { bytes_written: u64, attempts: u32 },
    /// 重试预算耗尽
    Failed {
        error: DownloadError,
        attempts: u32,
    },
    /// 协作式取消
    Cancelled { attempts: u32 },
}

/// 执行一次范围读取并写入目标文件对应偏移
///
/// 字节数校验是硬性的：短读和超读都按失败处理，绝不接受部分成功。
/// 取消在发请求前和每次流迭代边界检查
async fn fetch_once(
    source: &ResolvedSource,
    chunk: &Chunk,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let expected = chunk.len();
    let mut stream = source.fetch_range(chunk.start_byte..chunk.end_byte).await?;

    // 定位写：打开独立句柄并 seek 到分片起点，
    // 不同分片的写入区间不相交，无需加锁
    let mut file = File::options().write(true).open(dest).await?;
    file.seek(std::io::SeekFrom::Start(chunk.start_byte)).await?;

    let mut written = 0u64;
    loop {
        let piece = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            piece = stream.next() => piece,
        };
        let Some(piece) = piece else { break };
        let data = piece?;

        written += data.len() as u64;
        if written > expected {
            // 服务器返回了超出请求范围的数据，按瞬时错误重试
            return Err(DownloadError::TransientNetwork(format!(
                "收到超出范围的数据: {} > {} 字节",
                written, expected
            )));
        }
        file.write_all(&data).await?;
    }

    file.flush().await?;

    if written != expected {
        return Err(DownloadError::ShortRead {
            expected,
            received: written,
        });
    }

    Ok(written)
}

/// 带重试的分片抓取
///
/// 瞬时网络错误与短读在这里消化，不向上冒泡；重试预算耗尽才报告分片失败。
/// 退避曲线：500ms 起步、每次翻倍、上限 10s，带 ±25% 随机抖动
pub async fn fetch_chunk_with_retry(
    source: &ResolvedSource,
    chunk: &Chunk,
    dest: &Path,
    cancel: &CancellationToken,
    max_retries: u32,
) -> FetchOutcome {
    let max_attempts = max_retries.max(1);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match fetch_once(source, chunk, dest, cancel).await {
            Ok(bytes_written) => {
                debug!(
                    "✓ 分片 #{} 下载完成: {} 字节 (第 {} 次尝试)",
                    chunk.index, bytes_written, attempts
                );
                return FetchOutcome::Done {
                    bytes_written,
                    attempts,
                };
            }
            Err(DownloadError::Cancelled) => {
                debug!("分片 #{} 下载被取消", chunk.index);
                return FetchOutcome::Cancelled { attempts };
            }
            Err(e) if e.is_retryable() && attempts < max_attempts => {
                let delay = backoff_delay(attempts);
                warn!(
                    "⚠ 分片 #{} 第 {}/{} 次尝试失败，{}ms 后重试: {}",
                    chunk.index,
                    attempts,
                    max_attempts,
                    delay.as_millis(),
                    e
                );
                // 退避等待期间同样响应取消
                tokio::select! {
                    _ = cancel.cancelled() => return FetchOutcome::Cancelled { attempts },
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(
                    "分片 #{} 下载失败，重试预算耗尽 ({} 次尝试): {}",
                    chunk.index, attempts, e
                );
                return FetchOutcome::Failed { error: e, attempts };
            }
        }
    }
}

/// 指数退避延迟，带 ±25% 抖动
fn backoff_delay(attempt: u32) -> Duration {
    let exp = (attempt.saturating_sub(1)).min(6);
    let base = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << exp);
    let capped = base.min(RETRY_MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        for _ in 0..20 {
            let d1 = backoff_delay(1).as_millis() as f64;
            let d2 = backoff_delay(2).as_millis() as f64;
            let d10 = backoff_delay(10).as_millis() as f64;

            // 抖动范围内：500ms * [0.75, 1.25]
            assert!((375.0..=625.0).contains(&d1), "d1={}", d1);
            assert!((750.0..=1250.0).contains(&d2), "d2={}", d2);
            // 上限 10s * 1.25
            assert!(d10 <= 12_500.0, "d10={}", d10);
        }
    }
}
