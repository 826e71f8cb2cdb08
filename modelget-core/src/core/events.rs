use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    /// Reserved; no transition leads here yet.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which engine a job runs through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Built-in resumable HTTP fetcher.
    Primary,
    /// Out-of-process helper tool.
    Secondary,
    Undetermined,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Primary => "primary",
            StrategyKind::Secondary => "secondary",
            StrategyKind::Undetermined => "undetermined",
        };
        f.write_str(s)
    }
}

/// How a file reached its final name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileCompletion {
    Downloaded,
    /// Final file was already on disk at full size.
    Skipped,
    /// A full-length partial file was promoted without a transfer.
    FromPartial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileProgressInfo {
    pub name: String,
    pub size: u64,
    pub downloaded: u64,
    pub percent: f64,
    pub complete: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub repository: String,
    pub status: JobStatus,
    pub strategy: StrategyKind,
    pub progress: f64,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
    pub speed: String,
    pub eta: String,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub current_file: Option<String>,
    pub current_file_index: usize,
    pub total_files: usize,
    pub diagnostic_output: Vec<String>,
    pub files: Vec<FileProgressInfo>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DownloadEvent {
    Started(JobInfo),
    Progress(JobInfo),
    FileComplete {
        job: JobInfo,
        file: String,
        size: u64,
        completion: FileCompletion,
    },
    Complete(JobInfo),
    Failed(JobInfo),
    Cancelled(JobInfo),
}

impl DownloadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DownloadEvent::Started(_) => "started",
            DownloadEvent::Progress(_) => "progress",
            DownloadEvent::FileComplete { .. } => "file_complete",
            DownloadEvent::Complete(_) => "complete",
            DownloadEvent::Failed(_) => "failed",
            DownloadEvent::Cancelled(_) => "cancelled",
        }
    }

    pub fn job(&self) -> &JobInfo {
        match self {
            DownloadEvent::Started(job)
            | DownloadEvent::Progress(job)
            | DownloadEvent::Complete(job)
            | DownloadEvent::Failed(job)
            | DownloadEvent::Cancelled(job) => job,
            DownloadEvent::FileComplete { job, .. } => job,
        }
    }
}

/// Synchronous hook through which lifecycle events leave the engine.
/// Implementations must not block; fan-out belongs to the transport.
pub trait EventEmitter: Send + Sync + 'static {
    fn emit(&self, event: &DownloadEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: &DownloadEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> JobInfo {
        JobInfo {
            id: Uuid::nil(),
            repository: "org/model".into(),
            status: JobStatus::Downloading,
            strategy: StrategyKind::Primary,
            progress: 42.0,
            bytes_downloaded: 42,
            bytes_total: 100,
            speed: "42 B/s".into(),
            eta: "00:01".into(),
            speed_bytes_per_sec: 42.0,
            eta_seconds: Some(1.4),
            current_file: Some("model.bin".into()),
            current_file_index: 0,
            total_files: 1,
            diagnostic_output: Vec::new(),
            files: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn event_serializes_with_snake_case_tag() {
        let event = DownloadEvent::FileComplete {
            job: sample_job(),
            file: "model.bin".into(),
            size: 100,
            completion: FileCompletion::FromPartial,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_complete");
        assert_eq!(json["data"]["completion"], "from_partial");
        assert_eq!(json["data"]["job"]["status"], "downloading");
        assert_eq!(event.name(), "file_complete");
    }

    #[test]
    fn event_name_matches_serde_tag() {
        let events = [
            DownloadEvent::Started(sample_job()),
            DownloadEvent::Progress(sample_job()),
            DownloadEvent::Complete(sample_job()),
            DownloadEvent::Failed(sample_job()),
            DownloadEvent::Cancelled(sample_job()),
        ];
        for event in &events {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["type"], event.name());
            assert_eq!(event.job().repository, "org/model");
        }
    }
}
