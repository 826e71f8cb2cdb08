use std::path::PathBuf;

use async_trait::async_trait;
use modelget_core::core::events::{FileCompletion, StrategyKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::errors::DownloadResult;
use crate::models::manifest::FileTarget;

/// Per-file telemetry flowing from an engine to the orchestrator.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    FileStarted {
        index: usize,
        name: String,
    },
    Progress {
        index: usize,
        downloaded: u64,
        total: u64,
        speed_bps: f64,
    },
    FileDone {
        index: usize,
        size: u64,
        completion: FileCompletion,
    },
    FileFailed {
        index: usize,
        error: String,
    },
    Diagnostic(String),
}

/// What an engine gets for one file: a bounded event channel (a full
/// channel stalls the engine) and the job's cancellation token.
#[derive(Clone)]
pub struct FetchContext {
    pub events: mpsc::Sender<FetchEvent>,
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub async fn progress(&self, index: usize, downloaded: u64, total: u64, speed_bps: f64) {
        let _ = self
            .events
            .send(FetchEvent::Progress {
                index,
                downloaded,
                total,
                speed_bps,
            })
            .await;
    }

    pub async fn diagnostic(&self, line: impl Into<String>) {
        let _ = self.events.send(FetchEvent::Diagnostic(line.into())).await;
    }
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub size: u64,
    pub completion: FileCompletion,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn kind(&self) -> StrategyKind;
    async fn fetch(&self, target: &FileTarget, ctx: &FetchContext) -> DownloadResult<FetchedFile>;
}
