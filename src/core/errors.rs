use modelget_core::core::events::JobStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no download strategy available: {0}")]
    CapabilityUnavailable(String),

    #[error("download job {0} not found")]
    JobNotFound(Uuid),

    #[error("cannot cancel {status} download {id}")]
    CannotCancel { id: Uuid, status: JobStatus },

    #[error("download {id} is already {status}")]
    AlreadyStarted { id: Uuid, status: JobStatus },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("network error for {file}: {source}")]
    Network {
        file: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} while downloading {file}")]
    HttpStatus { file: String, status: u16 },

    #[error("request for {file} timed out after {secs}s")]
    Timeout { file: String, secs: u64 },

    #[error("transfer of {file} ended early: {received} of {expected} bytes")]
    Incomplete {
        file: String,
        received: u64,
        expected: u64,
    },

    #[error("{file} is {received} bytes on disk but the server reported {expected}")]
    SizeMismatch {
        file: String,
        received: u64,
        expected: u64,
    },

    #[error("disk error on {path}: {source}")]
    Disk {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("helper exited with {code} for {file}: {stderr}")]
    DelegateExit {
        file: String,
        code: String,
        stderr: String,
    },

    #[error("helper failed for {file}: {message}")]
    Delegate { file: String, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("download task stopped unexpectedly: {0}")]
    Task(String),
}

impl DownloadError {
    pub fn disk(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        DownloadError::Disk {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    /// Whether the failure goes back through the retry loop. Any HTTP status
    /// counts; it only becomes fatal once the attempts are used up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::Network { .. }
                | DownloadError::HttpStatus { .. }
                | DownloadError::Timeout { .. }
                | DownloadError::Incomplete { .. }
                | DownloadError::SizeMismatch { .. }
        )
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
