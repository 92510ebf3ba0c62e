// Persistence of the download list in a single JSON file.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{DownloadJob, DownloadStatus};
use crate::errors::Result;
use crate::utils::write_atomic;

const FORMAT_VERSION: u32 = 1;
pub(crate) const RESTART_ERROR: &str = "Interrupted: the application exited during the download";

#[derive(Debug, Serialize, Deserialize)]
struct JobFile {
    version: u32,
    jobs: Vec<DownloadJob>,
}

#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, jobs: &[DownloadJob]) -> Result<()> {
        let file = JobFile {
            version: FORMAT_VERSION,
            jobs: jobs.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &data)?;
        info!("Saved {} download(s) to {:?}", jobs.len(), self.path);
        Ok(())
    }

    /// Reads the saved list. A missing or unreadable file yields an empty list.
    /// Jobs saved while still active could not have survived the restart, so
    /// they come back as failed; their partial files stay on disk.
    pub fn load(&self) -> Vec<DownloadJob> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read download list {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        let file: JobFile = match serde_json::from_slice(&data) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring corrupt download list {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        if file.version != FORMAT_VERSION {
            warn!(
                "Ignoring download list {:?} with unsupported version {}",
                self.path, file.version
            );
            return Vec::new();
        }

        file.jobs
            .into_iter()
            .map(|mut job| {
                if job.status == DownloadStatus::Active {
                    warn!("Download {} was interrupted by a restart", job.id);
                    job.status = DownloadStatus::Failed;
                    job.error = Some(RESTART_ERROR.to_string());
                }
                job
            })
            .collect()
    }
}
