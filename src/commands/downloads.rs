use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::core::manager::DownloadManager;
use crate::core::progress::{format_eta, format_size, format_speed, ProgressTick};
use crate::core::verify::{self, FileCheck, InstalledAsset};
use crate::models::download::DownloadOutcome;
use crate::models::manifest::{DownloadRequest, ManifestEntry};

/// Builds a request from CLI input. `manifest` points at a JSON array of
/// entries; plain `files` are appended after it.
pub fn build_request(
    repository: &str,
    files: &[String],
    manifest: Option<&Path>,
    dest: Option<PathBuf>,
    revision: Option<String>,
) -> anyhow::Result<DownloadRequest> {
    let mut entries: Vec<ManifestEntry> = match manifest {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading manifest {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing manifest {}", path.display()))?
        }
        None => Vec::new(),
    };
    entries.extend(files.iter().map(ManifestEntry::new));

    let mut request = DownloadRequest::new(repository, entries);
    request.dest = dest;
    request.revision = revision;
    Ok(request)
}

pub fn render_tick(tick: &ProgressTick) -> String {
    format!(
        "[{}/{}] {} {:.1}% | {:.1}% total | {} / {} | {} | ETA {}",
        tick.file_index + 1,
        tick.total_files,
        tick.file,
        tick.file_percent,
        tick.overall_percent,
        format_size(tick.bytes_downloaded),
        format_size(tick.bytes_total),
        format_speed(tick.speed_bytes_per_sec),
        format_eta(tick.eta_seconds),
    )
}

/// Message shown beside the bar; the bar itself carries the byte counts.
pub fn bar_message(tick: &ProgressTick) -> String {
    format!(
        "[{}/{}] {} | {:.1}% total | {} | ETA {}",
        tick.file_index + 1,
        tick.total_files,
        tick.file,
        tick.overall_percent,
        format_speed(tick.speed_bytes_per_sec),
        format_eta(tick.eta_seconds),
    )
}

/// How progress reaches the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressView {
    /// Redrawn bar on an interactive stderr.
    Bar,
    /// One `render_tick` line per tick, for logs and JSON consumers.
    Lines,
}

impl ProgressView {
    pub fn detect(json: bool) -> Self {
        if !json && std::io::stderr().is_terminal() {
            ProgressView::Bar
        } else {
            ProgressView::Lines
        }
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Runs one download, showing progress on stderr. When `interrupt`
/// resolves first the job is cancelled and the cancellation is returned.
pub async fn download_model<F>(
    manager: &DownloadManager,
    request: DownloadRequest,
    view: ProgressView,
    interrupt: F,
) -> anyhow::Result<DownloadOutcome>
where
    F: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::channel::<ProgressTick>(32);
    let progress_forwarder = tokio::spawn(async move {
        let bar = (view == ProgressView::Bar).then(progress_bar);
        while let Some(tick) = rx.recv().await {
            match &bar {
                Some(pb) => {
                    pb.set_length(tick.bytes_total);
                    pb.set_position(tick.bytes_downloaded);
                    pb.set_message(bar_message(&tick));
                }
                None => eprintln!("{}", render_tick(&tick)),
            }
        }
        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
    });

    let (id, mut handle) = manager.start(request, Some(tx)).await?;

    tokio::pin!(interrupt);
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = &mut interrupt => {
            tracing::info!("interrupted, cancelling {}", id);
            if let Err(e) = manager.cancel(id) {
                tracing::debug!("cancel after interrupt: {}", e);
            }
            handle.await
        }
    };
    let _ = progress_forwarder.await;

    let outcome = joined.context("download task panicked")??;
    Ok(outcome)
}

pub fn render_outcome(outcome: &DownloadOutcome) -> String {
    let mut lines: Vec<String> = outcome
        .files
        .iter()
        .map(|f| {
            format!(
                "{:<40} {:>10}  {} ({:?})",
                f.path,
                format_size(f.size),
                f.strategy,
                f.completion
            )
        })
        .collect();
    lines.push(format!(
        "{}: {} files, {} in {:.1}s",
        outcome.repository,
        outcome.files.len(),
        format_size(outcome.total_size),
        outcome.duration_ms as f64 / 1000.0
    ));
    lines.join("\n")
}

pub async fn list_installed(root: &Path) -> anyhow::Result<Vec<InstalledAsset>> {
    Ok(verify::list_installed(root).await?)
}

pub async fn verify_files(paths: &[PathBuf]) -> Vec<FileCheck> {
    verify::verify_files(paths).await
}
