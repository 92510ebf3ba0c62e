use crate::api::{DownloadFormat, Programme};
use crate::config::DownloadConfig;
use crate::downloader::naming::FilenameTemplate;
use crate::downloader::store::JobStore;
use crate::downloader::{
    DownloadEvent, DownloadJob, DownloadStatus, JobId, ProgrammeSnapshot, Transfer, TransferProgress,
};
use crate::errors::{AppError, Result};
use crate::security::InputValidator;
use crate::utils::ensure_dir_exists;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 64;
const UNKNOWN_TOTAL: u64 = u64::MAX;

#[derive(Debug)]
struct ProgressCounters {
    transferred: AtomicU64,
    total: AtomicU64,
}

impl ProgressCounters {
    fn new() -> Self {
        Self {
            transferred: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN_TOTAL),
        }
    }

    fn update(&self, transferred: u64, total: Option<u64>) {
        self.transferred.store(transferred, Ordering::Relaxed);
        self.total.store(total.unwrap_or(UNKNOWN_TOTAL), Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransferProgress {
        let total = self.total.load(Ordering::Relaxed);
        TransferProgress {
            bytes_transferred: self.transferred.load(Ordering::Relaxed),
            bytes_total: (total != UNKNOWN_TOTAL).then_some(total),
        }
    }
}

struct JobSlot {
    job: DownloadJob,
    progress: Arc<ProgressCounters>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl JobSlot {
    fn restored(job: DownloadJob) -> Self {
        Self {
            job,
            progress: Arc::new(ProgressCounters::new()),
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

type JobList = Arc<Mutex<Vec<JobSlot>>>;

/// Owns the download list, runs transfers in the background and persists
/// the list on request.
///
/// Rows are positions in the list. They shift when a job is removed, while a
/// job's [`JobId`] never changes. Every transfer runs in its own tokio task;
/// at most `max_concurrent_downloads` of them move data at once and the rest
/// wait, still `Active`, for a free slot.
pub struct DownloadManager {
    jobs: JobList,
    transfer: Arc<dyn Transfer>,
    slots: Arc<Semaphore>,
    events: broadcast::Sender<DownloadEvent>,
    shutdown: CancellationToken,
    store: JobStore,
    persist: Mutex<()>,
    template: FilenameTemplate,
    directory: PathBuf,
    validator: InputValidator,
}

impl DownloadManager {
    pub fn new(config: &DownloadConfig, transfer: Arc<dyn Transfer>) -> Self {
        let max_concurrent = config.max_concurrent_downloads.max(1);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "Download manager using {} transfer, {} concurrent download(s), directory {:?}",
            transfer.get_name(),
            max_concurrent,
            config.directory
        );

        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            transfer,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            events,
            shutdown: CancellationToken::new(),
            store: JobStore::new(config.jobs_file.clone()),
            persist: Mutex::new(()),
            template: FilenameTemplate::new(config.filename_template.clone()),
            directory: config.directory.clone(),
            validator: InputValidator::new(),
        }
    }

    /// Receives an event each time a job reaches a terminal state. Events are
    /// sent after the job list reflects the new state.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Creates an `Active` job for `programme` and starts its transfer in the
    /// background. Returns the job's row without waiting for the transfer.
    pub async fn download(
        &self,
        programme: &Programme,
        format: DownloadFormat,
        channel_name: &str,
        url: &str,
    ) -> Result<usize> {
        self.validator.validate_submission(programme, channel_name, url)?;

        let snapshot = ProgrammeSnapshot::capture(programme, channel_name);
        let name = self.template.render(&snapshot, format);
        self.validator.validate_relative_name(&name)?;
        let destination = self.directory.join(&name);

        let mut jobs = self.jobs.lock().await;

        let claimed = jobs.iter().any(|slot| {
            slot.job.status == DownloadStatus::Active && slot.job.destination == destination
        });
        if claimed || tokio::fs::try_exists(&destination).await? {
            return Err(AppError::Validation(format!(
                "Destination already exists: {:?}",
                destination
            )));
        }

        if let Some(parent) = destination.parent() {
            ensure_dir_exists(parent).await?;
        }

        let job = DownloadJob::new(snapshot, format, url.to_string(), destination);
        let mut slot = JobSlot {
            progress: Arc::new(ProgressCounters::new()),
            cancel: self.shutdown.child_token(),
            task: None,
            job,
        };

        let task = TransferTask {
            id: slot.job.id,
            url: slot.job.source_url.clone(),
            partial: slot.job.partial_path(),
            destination: slot.job.destination.clone(),
            jobs: Arc::clone(&self.jobs),
            transfer: Arc::clone(&self.transfer),
            slots: Arc::clone(&self.slots),
            events: self.events.clone(),
            progress: Arc::clone(&slot.progress),
            cancel: slot.cancel.clone(),
        };

        info!(
            "Queued download {}: {} -> {:?}",
            slot.job.id,
            slot.job.programme.display_name(),
            slot.job.destination
        );

        slot.task = Some(tokio::spawn(task.run()));
        jobs.push(slot);
        Ok(jobs.len() - 1)
    }

    /// Cancels an `Active` job, waits for its partial file to be removed and
    /// marks it `Aborted`. Returns `false` without effect on terminal jobs.
    pub async fn abort_download(&self, row: usize) -> Result<bool> {
        let aborted = {
            let mut jobs = self.jobs.lock().await;
            let slot = jobs.get_mut(row).ok_or_else(|| AppError::no_row(row))?;
            begin_abort(slot)
        };

        let Some((id, task)) = aborted else {
            debug!("Download at row {} is not active, nothing to abort", row);
            return Ok(false);
        };

        join_task(id, task).await;
        info!("Aborted download {}", id);
        self.publish(DownloadEvent::Aborted { id });
        Ok(true)
    }

    /// Aborts every `Active` job, queued ones included, and returns how many
    /// were aborted.
    pub async fn abort_all_downloads(&self) -> usize {
        let aborted: Vec<(JobId, Option<JoinHandle<()>>)> = {
            let mut jobs = self.jobs.lock().await;
            jobs.iter_mut().filter_map(begin_abort).collect()
        };

        let ids = join_all(aborted.into_iter().map(|(id, task)| async move {
            join_task(id, task).await;
            id
        }))
        .await;

        if !ids.is_empty() {
            info!("Aborted {} active download(s)", ids.len());
        }
        for &id in &ids {
            self.publish(DownloadEvent::Aborted { id });
        }
        ids.len()
    }

    /// Removes a finished, aborted or failed job from the list and from the
    /// saved list. Active jobs are refused; abort them first.
    pub async fn remove_download(&self, row: usize) -> Result<DownloadJob> {
        let _persist = self.persist.lock().await;

        let (id, remaining) = {
            let jobs = self.jobs.lock().await;
            let slot = jobs.get(row).ok_or_else(|| AppError::no_row(row))?;

            if slot.job.status == DownloadStatus::Active {
                return Err(AppError::JobActive(row));
            }

            let remaining: Vec<DownloadJob> = jobs
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != row)
                .map(|(_, slot)| slot.job.clone())
                .collect();
            (slot.job.id, remaining)
        };

        self.write_store(remaining).await?;

        // Terminal jobs never change state, and removals are serialized by
        // `persist`, so the job is still in the list; only its row may move.
        let mut jobs = self.jobs.lock().await;
        let index = jobs
            .iter()
            .position(|slot| slot.job.id == id)
            .ok_or_else(|| AppError::InvalidState(format!("download {} vanished during removal", id)))?;
        let removed = jobs.remove(index).job;
        info!("Removed download {} ({})", removed.id, removed.programme.display_name());
        Ok(removed)
    }

    pub async fn status(&self, row: usize) -> Option<DownloadStatus> {
        self.jobs.lock().await.get(row).map(|slot| slot.job.status)
    }

    pub async fn filename(&self, row: usize) -> Option<PathBuf> {
        self.jobs.lock().await.get(row).map(|slot| slot.job.destination.clone())
    }

    pub async fn job(&self, row: usize) -> Option<DownloadJob> {
        self.jobs.lock().await.get(row).map(|slot| slot.job.clone())
    }

    pub async fn jobs(&self) -> Vec<DownloadJob> {
        self.jobs.lock().await.iter().map(|slot| slot.job.clone()).collect()
    }

    pub async fn progress(&self, row: usize) -> Option<TransferProgress> {
        self.jobs.lock().await.get(row).map(|slot| slot.progress.snapshot())
    }

    /// Current row of the job with `id`, if it is still in the list.
    pub async fn row_of(&self, id: JobId) -> Option<usize> {
        self.jobs.lock().await.iter().position(|slot| slot.job.id == id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    pub async fn has_unfinished_downloads(&self) -> bool {
        self.jobs
            .lock()
            .await
            .iter()
            .any(|slot| slot.job.status == DownloadStatus::Active)
    }

    pub async fn save(&self) -> Result<()> {
        let _persist = self.persist.lock().await;
        let jobs = self.jobs().await;
        self.write_store(jobs).await
    }

    /// Replaces the list with the saved one and returns the number of jobs
    /// restored. Refused while any job is active.
    pub async fn load(&self) -> Result<usize> {
        let _persist = self.persist.lock().await;

        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| AppError::Download(format!("Failed to read the download list: {}", e)))?;

        let mut jobs = self.jobs.lock().await;
        if jobs.iter().any(|slot| slot.job.status == DownloadStatus::Active) {
            return Err(AppError::InvalidState(
                "cannot load the download list while downloads are active".to_string(),
            ));
        }

        *jobs = saved.into_iter().map(JobSlot::restored).collect();
        info!("Loaded {} download(s) from {:?}", jobs.len(), self.store.path());
        Ok(jobs.len())
    }

    /// Aborts all active downloads and saves the list. Call once before exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.abort_all_downloads().await;
        self.save().await
    }

    /// Writes `jobs` on a blocking thread. Callers hold `persist` so writes
    /// land in the order their snapshots were taken.
    async fn write_store(&self, jobs: Vec<DownloadJob>) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&jobs))
            .await
            .map_err(|e| AppError::Download(format!("Failed to write the download list: {}", e)))?
    }

    fn publish(&self, event: DownloadEvent) {
        if self.events.send(event).is_err() {
            debug!("No download event subscribers");
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn begin_abort(slot: &mut JobSlot) -> Option<(JobId, Option<JoinHandle<()>>)> {
    if slot.job.status != DownloadStatus::Active {
        return None;
    }
    slot.job.status = DownloadStatus::Aborted;
    slot.job.completed_at = Some(chrono::Utc::now());
    slot.cancel.cancel();
    Some((slot.job.id, slot.task.take()))
}

async fn join_task(id: JobId, task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            warn!("Transfer task for download {} ended abnormally: {}", id, e);
        }
    }
}

async fn discard_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {:?}: {}", path, e),
    }
}

/// Everything one background transfer needs, detached from the manager.
struct TransferTask {
    id: JobId,
    url: String,
    partial: PathBuf,
    destination: PathBuf,
    jobs: JobList,
    transfer: Arc<dyn Transfer>,
    slots: Arc<Semaphore>,
    events: broadcast::Sender<DownloadEvent>,
    progress: Arc<ProgressCounters>,
    cancel: CancellationToken,
}

impl TransferTask {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Download {} cancelled while queued", self.id);
                return;
            }
            permit = Arc::clone(&self.slots).acquire_owned() => permit,
        };

        let outcome = match permit {
            Ok(_permit) => {
                debug!("Download {} started", self.id);
                // The create runs on a blocking thread that a dropped future
                // cannot stop, so it stays outside the cancellable section.
                match tokio::fs::File::create(&self.partial).await {
                    Ok(mut file) => tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => None,
                        result = self.write_partial(&mut file) => Some(result),
                    },
                    Err(e) => Some(Err(e.into())),
                }
            }
            Err(e) => Some(Err(AppError::Download(format!("Download slots unavailable: {}", e)))),
        };

        match outcome {
            Some(result) => self.finish(result).await,
            None => {
                discard_file(&self.partial).await;
                debug!("Download {} cancelled during transfer", self.id);
            }
        }
    }

    async fn write_partial(&self, file: &mut tokio::fs::File) -> Result<u64> {
        let progress = Arc::clone(&self.progress);
        let report = move |transferred: u64, total: Option<u64>| progress.update(transferred, total);

        let bytes = self.transfer.fetch(&self.url, file, &report).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(bytes)
    }

    /// Moves the finished file into place, then applies the outcome unless
    /// the job stopped being `Active` meanwhile. An abort that wins that race
    /// waits for this task, so the file it would leave behind is removed
    /// before the abort returns.
    async fn finish(&self, result: Result<u64>) {
        let result = match result {
            Ok(bytes) => tokio::fs::rename(&self.partial, &self.destination)
                .await
                .map(|()| bytes)
                .map_err(AppError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            discard_file(&self.partial).await;
        }

        let moved = result.is_ok();
        let event = {
            let mut jobs = self.jobs.lock().await;
            jobs.iter_mut()
                .find(|slot| slot.job.id == self.id && slot.job.status == DownloadStatus::Active)
                .map(|slot| {
                    slot.task = None;
                    slot.job.completed_at = Some(chrono::Utc::now());

                    match result {
                        Ok(bytes) => {
                            slot.job.status = DownloadStatus::Finished;
                            info!("Finished download {}: {} bytes to {:?}", self.id, bytes, self.destination);
                            DownloadEvent::Finished {
                                id: self.id,
                                destination: self.destination.clone(),
                            }
                        }
                        Err(e) => {
                            let message = e.to_string();
                            error!("Download {} failed: {}", self.id, message);
                            slot.job.status = DownloadStatus::Failed;
                            slot.job.error = Some(message.clone());
                            DownloadEvent::Failed {
                                id: self.id,
                                error: message,
                            }
                        }
                    }
                })
        };

        let Some(event) = event else {
            if moved {
                discard_file(&self.destination).await;
            }
            debug!("Download {} was aborted while finishing", self.id);
            return;
        };

        if self.events.send(event).is_err() {
            debug!("No download event subscribers");
        }
    }
}
