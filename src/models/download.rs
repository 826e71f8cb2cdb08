use std::path::PathBuf;

use modelget_core::core::events::{FileCompletion, StrategyKind};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub path: String,
    pub destination: PathBuf,
    pub size: u64,
    pub strategy: StrategyKind,
    pub completion: FileCompletion,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub job_id: Uuid,
    pub repository: String,
    pub files: Vec<FileResult>,
    pub total_size: u64,
    pub duration_ms: u64,
}
