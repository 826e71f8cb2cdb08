use std::io::Write;
use std::sync::Arc;

use modelget_core::core::events::{DownloadEvent, EventEmitter, FileCompletion, JobInfo};
use tokio::sync::mpsc;

/// Turns job transitions into outbound events. The core only ever talks to
/// this type; the transport sits behind `EventEmitter`.
#[derive(Clone)]
pub struct NotificationBridge {
    emitter: Arc<dyn EventEmitter>,
}

impl NotificationBridge {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self { emitter }
    }

    fn send(&self, event: DownloadEvent) {
        tracing::trace!("[notify] {} {}", event.name(), event.job().id);
        self.emitter.emit(&event);
    }

    pub fn started(&self, job: JobInfo) {
        self.send(DownloadEvent::Started(job));
    }

    pub fn progress(&self, job: JobInfo) {
        self.send(DownloadEvent::Progress(job));
    }

    pub fn file_complete(&self, job: JobInfo, file: &str, size: u64, completion: FileCompletion) {
        self.send(DownloadEvent::FileComplete {
            job,
            file: file.to_string(),
            size,
            completion,
        });
    }

    pub fn complete(&self, job: JobInfo) {
        self.send(DownloadEvent::Complete(job));
    }

    pub fn failed(&self, job: JobInfo) {
        self.send(DownloadEvent::Failed(job));
    }

    pub fn cancelled(&self, job: JobInfo) {
        self.send(DownloadEvent::Cancelled(job));
    }
}

/// Writes every event as one JSON line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesEmitter;

impl EventEmitter for JsonLinesEmitter {
    fn emit(&self, event: &DownloadEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", line);
        }
    }
}

/// Logs lifecycle events; progress is left to the caller's sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmitter;

impl EventEmitter for LogEmitter {
    fn emit(&self, event: &DownloadEvent) {
        let job = event.job();
        match event {
            DownloadEvent::Progress(_) => {}
            DownloadEvent::FileComplete {
                file, completion, ..
            } => tracing::info!("[notify] {} {} ({:?})", job.repository, file, completion),
            DownloadEvent::Failed(_) => tracing::warn!(
                "[notify] {} failed: {}",
                job.repository,
                job.error.as_deref().unwrap_or("unknown error")
            ),
            _ => tracing::info!("[notify] {} {}", job.repository, event.name()),
        }
    }
}

/// Forwards events into an unbounded channel. Never blocks the caller.
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: &DownloadEvent) {
        let _ = self.tx.send(event.clone());
    }
}
