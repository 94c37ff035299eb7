//! 日志系统配置
//!
//! 控制台输出 + 文件持久化，按文件大小滚动，启动时清理过期日志

use crate::config::LogConfig;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_PREFIX: &str = "skyfetch";

/// 滚动日志写入器
///
/// 单个文件写满 `max_file_size` 后滚动到带序号的新文件；
/// 文件名以服务启动时间戳区分：skyfetch.YYYY-MM-DD-HHMMSS[_N].log
struct RollingWriter {
    log_dir: PathBuf,
    start_timestamp: String,
    max_file_size: u64,
    current: Option<File>,
    current_index: u32,
    written: u64,
}

impl RollingWriter {
    fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut writer = Self {
            log_dir,
            start_timestamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            max_file_size,
            current: None,
            current_index: 0,
            written: 0,
        };
        writer.open_next()?;
        Ok(writer)
    }

    fn file_path(&self, index: u32) -> PathBuf {
        let name = if index == 0 {
            format!("{}.{}.log", LOG_PREFIX, self.start_timestamp)
        } else {
            format!("{}.{}_{}.log", LOG_PREFIX, self.start_timestamp, index)
        };
        self.log_dir.join(name)
    }

    fn open_next(&mut self) -> io::Result<()> {
        let path = self.file_path(self.current_index);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.current = Some(file);
        self.written = 0;
        Ok(())
    }

    fn write_rolling(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.current.take() {
                file.flush()?;
            }
            self.current_index += 1;
            self.open_next()?;
        }

        let file = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 线程安全包装，作为 tracing-appender 的写入目标
#[derive(Clone)]
pub struct LogWriter {
    inner: Arc<Mutex<RollingWriter>>,
}

impl LogWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingWriter::new(log_dir, max_file_size)?)),
        })
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().write_rolling(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(file) = inner.current.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// 日志系统守卫
/// 必须保持存活，否则后台写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// 文件层初始化失败时回退为仅控制台输出，不阻止服务启动
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    let writer = fs::create_dir_all(&config.log_dir)
        .map_err(|e| io::Error::new(e.kind(), format!("创建日志目录失败: {}", e)))
        .and_then(|_| LogWriter::new(config.log_dir.clone(), config.max_file_size));

    match writer {
        Ok(writer) => {
            let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
                .with_ansi(false)
                .with_writer(non_blocking);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();

            info!(
                "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}",
                config.log_dir, config.retention_days, config.level
            );

            cleanup_old_logs(&config.log_dir, config.retention_days);

            LogGuard {
                _file_guard: Some(file_guard),
            }
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .init();
            tracing::warn!("日志文件层初始化失败，回退仅控制台输出: {}", e);
            LogGuard { _file_guard: None }
        }
    }
}

/// 按修改时间清理过期日志文件
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) {
    let retention = chrono::Duration::days(retention_days as i64);
    let now = chrono::Utc::now();

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return;
        }
    };

    let mut deleted = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.starts_with(LOG_PREFIX) || !name.ends_with(".log") {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| {
                let modified: chrono::DateTime<chrono::Utc> = modified.into();
                now.signed_duration_since(modified) > retention
            })
            .unwrap_or(false);

        if expired {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e);
            } else {
                deleted += 1;
            }
        }
    }

    if deleted > 0 {
        info!("已清理 {} 个过期日志文件", deleted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rolling_writer_rotates_on_size() {
        let dir = tempdir().unwrap();
        let mut writer = RollingWriter::new(dir.path().to_path_buf(), 64).unwrap();

        // 两次 48 字节写入超过 64 字节上限，触发滚动
        writer.write_rolling(&[b'a'; 48]).unwrap();
        writer.write_rolling(&[b'b'; 48]).unwrap();

        let logs: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().map(|x| x == "log").unwrap_or(false))
            .collect();
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn test_file_name_format() {
        let dir = tempdir().unwrap();
        let writer = RollingWriter::new(dir.path().to_path_buf(), 1024).unwrap();
        let base = writer.file_path(0);
        let rolled = writer.file_path(3);

        let base_name = base.file_name().unwrap().to_str().unwrap();
        let rolled_name = rolled.file_name().unwrap().to_str().unwrap();
        assert!(base_name.starts_with("skyfetch."));
        assert!(base_name.ends_with(".log"));
        assert!(rolled_name.contains("_3.log"));
    }
}
