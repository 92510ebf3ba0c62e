pub mod http_pool;
pub mod manager;
pub mod naming;
pub mod store;

use serde::{Deserialize, Serialize};
use crate::api::{DownloadFormat, Programme};
use crate::errors::Result;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::{Path, PathBuf};

pub use http_pool::HttpTransfer;
pub use manager::DownloadManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadStatus {
    Active,
    Finished,
    Aborted,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadStatus::Active)
    }
}

/// Programme identity captured when the job is created, so later guide
/// changes cannot alter the job's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgrammeSnapshot {
    pub programme_id: i64,
    pub title: String,
    pub channel_name: String,
    pub start_time: NaiveDateTime,
}

impl ProgrammeSnapshot {
    pub fn capture(programme: &Programme, channel_name: &str) -> Self {
        Self {
            programme_id: programme.id,
            title: programme.title.trim().to_string(),
            channel_name: channel_name.trim().to_string(),
            start_time: programme.start_time,
        }
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} ({}, {})",
            self.title,
            self.channel_name,
            self.start_time.format("%Y-%m-%d %H:%M")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadJob {
    pub id: JobId,
    pub programme: ProgrammeSnapshot,
    pub format: DownloadFormat,
    pub source_url: String,
    pub destination: PathBuf,
    pub status: DownloadStatus,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadJob {
    pub fn new(
        programme: ProgrammeSnapshot,
        format: DownloadFormat,
        source_url: String,
        destination: PathBuf,
    ) -> Self {
        Self {
            id: JobId::new(),
            programme,
            format,
            source_url,
            destination,
            status: DownloadStatus::Active,
            error: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    /// Where the transfer writes until it completes.
    pub fn partial_path(&self) -> PathBuf {
        partial_path_for(&self.destination)
    }
}

pub(crate) fn partial_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Best-effort byte counters for a running transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub bytes_total: Option<u64>,
}

impl TransferProgress {
    pub fn percentage(&self) -> Option<f32> {
        match self.bytes_total {
            Some(total) if total > 0 => Some((self.bytes_transferred as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}

/// Published after a job reaches a terminal state and the job list is updated.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Finished { id: JobId, destination: PathBuf },
    Failed { id: JobId, error: String },
    Aborted { id: JobId },
}

impl DownloadEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            DownloadEvent::Finished { id, .. }
            | DownloadEvent::Failed { id, .. }
            | DownloadEvent::Aborted { id } => *id,
        }
    }
}

/// Progress callback handed to a transfer: bytes written so far and the
/// expected total when the server announced one.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Streams a remote resource into an open file.
///
/// Implementations write every received chunk to `file` and report progress,
/// returning the number of bytes written. They do not retry and do not need
/// to handle cancellation: the manager drops the future to cancel it.
#[async_trait::async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(&self, url: &str, file: &mut tokio::fs::File, progress: &ProgressFn) -> Result<u64>;
    fn get_name(&self) -> &str;
}
