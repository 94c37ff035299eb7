pub mod chunk;
pub mod fetcher;
pub mod job;
pub mod limiter;
pub mod manager;
pub mod progress;

pub use chunk::{plan_chunks, Chunk, ChunkStatus, DEFAULT_CHUNK_SIZE};
pub use fetcher::{fetch_chunk_with_retry, FetchOutcome};
pub use job::{DownloadJob, FileDownloadState, FileStatus, JobStatus};
pub use limiter::ConcurrencyLimiter;
pub use manager::{JobManager, JobManagerConfig, StartRequest};
pub use progress::{snapshot_job, FileProgress, ProgressSnapshot, SpeedCalculator};
