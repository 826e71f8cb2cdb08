use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use modelget_core::core::events::{FileProgressInfo, JobInfo, JobStatus, StrategyKind};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::errors::{DownloadError, DownloadResult};
use crate::core::progress::{self, format_eta, format_speed};

#[derive(Debug, Clone, Default)]
pub struct FileProgress {
    pub name: String,
    pub size: u64,
    pub downloaded: u64,
    pub complete: bool,
    pub error: Option<String>,
}

impl FileProgress {
    fn finalized(&self) -> bool {
        self.complete || self.error.is_some()
    }

    pub fn to_info(&self) -> FileProgressInfo {
        FileProgressInfo {
            name: self.name.clone(),
            size: self.size,
            downloaded: self.downloaded,
            percent: progress::percent(self.downloaded, self.size),
            complete: self.complete,
            error: self.error.clone(),
        }
    }
}

pub struct Job {
    pub id: Uuid,
    pub repository: String,
    pub status: JobStatus,
    pub strategy: StrategyKind,
    pub cancel_token: CancellationToken,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub progress: f64,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub current_file: Option<String>,
    pub current_file_index: usize,
    pub total_files: usize,
    pub diagnostic_output: Vec<String>,
    /// Keyed by manifest index so iteration follows manifest order.
    pub files: BTreeMap<usize, FileProgress>,
}

impl Job {
    fn new(repository: String, total_files: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository,
            status: JobStatus::Pending,
            strategy: StrategyKind::Undetermined,
            cancel_token: CancellationToken::new(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            progress: 0.0,
            bytes_downloaded: 0,
            bytes_total: 0,
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            current_file: None,
            current_file_index: 0,
            total_files,
            diagnostic_output: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn to_info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            repository: self.repository.clone(),
            status: self.status,
            strategy: self.strategy,
            progress: self.progress,
            bytes_downloaded: self.bytes_downloaded,
            bytes_total: self.bytes_total,
            speed: format_speed(self.speed_bytes_per_sec),
            eta: format_eta(self.eta_seconds),
            speed_bytes_per_sec: self.speed_bytes_per_sec,
            eta_seconds: self.eta_seconds,
            current_file: self.current_file.clone(),
            current_file_index: self.current_file_index,
            total_files: self.total_files,
            diagnostic_output: self.diagnostic_output.clone(),
            files: self.files.values().map(FileProgress::to_info).collect(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    fn refresh_totals(&mut self) {
        let (downloaded, total) =
            progress::aggregate(self.files.values().map(|f| (f.downloaded, f.size)));
        self.bytes_downloaded = downloaded;
        self.bytes_total = total;
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.speed_bytes_per_sec = 0.0;
        self.eta_seconds = None;
    }
}

fn lock(job: &Mutex<Job>) -> MutexGuard<'_, Job> {
    job.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory job table. The outer map lock is held only long enough to
/// find an entry; each job carries its own lock.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: Uuid) -> DownloadResult<Arc<Mutex<Job>>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id).cloned().ok_or(DownloadError::JobNotFound(id))
    }

    fn with_job<T>(&self, id: Uuid, f: impl FnOnce(&mut Job) -> T) -> DownloadResult<T> {
        let entry = self.entry(id)?;
        let mut job = lock(&entry);
        Ok(f(&mut job))
    }

    pub fn create(&self, repository: impl Into<String>, total_files: usize) -> (Uuid, CancellationToken) {
        let job = Job::new(repository.into(), total_files);
        let id = job.id;
        let token = job.cancel_token.clone();
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(id, Arc::new(Mutex::new(job)));
        tracing::debug!("[jobs] created {}", id);
        (id, token)
    }

    /// PENDING -> DOWNLOADING. A job cancelled before it started reports
    /// `Cancelled`.
    pub fn start(&self, id: Uuid, strategy: StrategyKind) -> DownloadResult<JobInfo> {
        self.with_job(id, |job| match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Downloading;
                job.strategy = strategy;
                Ok(job.to_info())
            }
            JobStatus::Cancelled => Err(DownloadError::Cancelled),
            status => Err(DownloadError::AlreadyStarted { id, status }),
        })?
    }

    pub fn begin_file(&self, id: Uuid, index: usize, name: &str) -> DownloadResult<()> {
        self.with_job(id, |job| {
            job.current_file = Some(name.to_string());
            job.current_file_index = index;
            job.files.entry(index).or_insert_with(|| FileProgress {
                name: name.to_string(),
                ..FileProgress::default()
            });
        })
    }

    /// Applies one progress tick. Returns `None` once the job is terminal so
    /// late ticks from an unwinding transfer are dropped.
    pub fn update_file(
        &self,
        id: Uuid,
        index: usize,
        downloaded: u64,
        total: u64,
        speed_bps: f64,
    ) -> DownloadResult<Option<JobInfo>> {
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                return None;
            }
            let entry = job.files.entry(index).or_default();
            if entry.finalized() {
                return None;
            }
            if total > 0 {
                entry.size = total;
            }
            entry.downloaded = if entry.size > 0 {
                downloaded.min(entry.size)
            } else {
                downloaded
            };
            let fraction = progress::percent(entry.downloaded, entry.size) / 100.0;
            let remaining = entry.size.saturating_sub(entry.downloaded);

            job.current_file_index = index;
            job.progress = progress::overall_percent(index, fraction, job.total_files);
            job.speed_bytes_per_sec = speed_bps;
            job.eta_seconds = progress::eta_seconds(remaining, speed_bps);
            job.refresh_totals();
            Some(job.to_info())
        })
    }

    pub fn finish_file(&self, id: Uuid, index: usize, size: u64) -> DownloadResult<JobInfo> {
        self.with_job(id, |job| {
            let entry = job.files.entry(index).or_default();
            if !entry.finalized() {
                entry.size = size;
                entry.downloaded = size;
                entry.complete = true;
            }
            if !job.status.is_terminal() {
                job.progress = progress::overall_percent(index + 1, 0.0, job.total_files);
            }
            job.refresh_totals();
            job.to_info()
        })
    }

    pub fn fail_file(&self, id: Uuid, index: usize, error: &str) -> DownloadResult<()> {
        self.with_job(id, |job| {
            let entry = job.files.entry(index).or_default();
            if !entry.finalized() {
                entry.error = Some(error.to_string());
            }
        })
    }

    pub fn push_diagnostic(&self, id: Uuid, line: impl Into<String>) -> DownloadResult<()> {
        let line = line.into();
        self.with_job(id, |job| job.diagnostic_output.push(line))
    }

    /// DOWNLOADING -> COMPLETED. `None` when the job already left
    /// DOWNLOADING (e.g. it was cancelled while the last file finished).
    pub fn complete(&self, id: Uuid) -> DownloadResult<Option<JobInfo>> {
        self.with_job(id, |job| {
            if job.status != JobStatus::Downloading {
                return None;
            }
            job.progress = 100.0;
            job.current_file = None;
            job.finish(JobStatus::Completed);
            Some(job.to_info())
        })
    }

    pub fn fail(&self, id: Uuid, message: impl Into<String>) -> DownloadResult<Option<JobInfo>> {
        let message = message.into();
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                return None;
            }
            job.error = Some(message);
            job.finish(JobStatus::Failed);
            Some(job.to_info())
        })
    }

    /// Used by the running transfer when it observes cancellation. `None`
    /// when `cancel` already recorded the transition.
    pub fn mark_cancelled(&self, id: Uuid) -> DownloadResult<Option<JobInfo>> {
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                return None;
            }
            job.cancel_token.cancel();
            job.finish(JobStatus::Cancelled);
            Some(job.to_info())
        })
    }

    pub fn cancel(&self, id: Uuid) -> DownloadResult<JobInfo> {
        self.with_job(id, |job| match job.status {
            JobStatus::Pending | JobStatus::Downloading => {
                job.cancel_token.cancel();
                job.finish(JobStatus::Cancelled);
                tracing::info!("[jobs] cancelled {}", id);
                Ok(job.to_info())
            }
            status => Err(DownloadError::CannotCancel { id, status }),
        })?
    }

    /// Cancels every job that has not reached a terminal state.
    pub fn cancel_all(&self) -> Vec<JobInfo> {
        self.entries()
            .iter()
            .filter_map(|entry| {
                let mut job = lock(entry);
                if job.status.is_terminal() {
                    return None;
                }
                job.cancel_token.cancel();
                job.finish(JobStatus::Cancelled);
                Some(job.to_info())
            })
            .collect()
    }

    pub fn get(&self, id: Uuid) -> DownloadResult<JobInfo> {
        self.with_job(id, |job| job.to_info())
    }

    fn entries(&self) -> Vec<Arc<Mutex<Job>>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self.entries().iter().map(|e| lock(e).to_info()).collect();
        infos.sort_by_key(|j| j.created_at);
        infos
    }

    /// Drops terminal jobs whose completion is older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let job = lock(entry);
            match (job.status.is_terminal(), job.completed_at) {
                (true, Some(done)) => {
                    now.signed_duration_since(done).to_std().unwrap_or_default() <= max_age
                }
                _ => true,
            }
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!("[jobs] cleaned up {} finished jobs", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
