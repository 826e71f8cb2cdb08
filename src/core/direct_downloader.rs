use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use modelget_core::core::events::{FileCompletion, StrategyKind};
use modelget_core::models::settings::DownloadSettings;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::core::errors::{DownloadError, DownloadResult};
use crate::core::progress::{ProgressThrottle, SpeedWindow};
use crate::core::traits::{FetchContext, FetchedFile, Fetcher};
use crate::models::manifest::FileTarget;

pub const PART_SUFFIX: &str = ".part";
const WRITE_BUFFER: usize = 256 * 1024;
const LINKED_SIZE: &str = "x-linked-size";

pub fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(PART_SUFFIX);
    PathBuf::from(part)
}

/// Length of the file at `path`, or `None` when it does not exist.
pub async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

fn header_u64(headers: &HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// The complete length after `/` in `Content-Range`. Both `bytes 0-9/100`
/// and the 416 form `bytes */100` carry it.
pub fn range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.rsplit('/').next())
        .and_then(|t| t.trim().parse::<u64>().ok())
}

/// Full size of the resource behind a GET response: the total after `/` in
/// `Content-Range`, else `Content-Length` plus the bytes already held.
pub fn content_total(headers: &HeaderMap, offset: u64) -> Option<u64> {
    range_total(headers)
        .or_else(|| header_u64(headers, CONTENT_LENGTH).map(|len| len + offset))
}

async fn discard_partial(part_path: &Path) {
    match tokio::fs::remove_file(part_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "[direct] could not remove partial file {}: {}",
            part_path.display(),
            e
        ),
    }
}

/// Replaces whatever sits at `dest` with `part`. The stale file goes first
/// so a failed rename never leaves a short file under the final name.
pub async fn promote(part: &Path, dest: &Path) -> DownloadResult<()> {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(DownloadError::disk(dest, e)),
    }
    tokio::fs::rename(part, dest)
        .await
        .map_err(|e| DownloadError::disk(part, e))
}

/// Built-in single-stream fetcher with `.part` resume and a bounded retry
/// loop around probe, transfer and promotion.
pub struct DirectFetcher {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
    request_timeout: Duration,
    progress_interval_ms: u64,
}

impl DirectFetcher {
    pub fn new(client: reqwest::Client, settings: &DownloadSettings) -> Self {
        Self {
            client,
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            request_timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
            progress_interval_ms: settings.progress_interval_ms,
        }
    }

    async fn send(
        &self,
        target: &FileTarget,
        request: reqwest::RequestBuilder,
    ) -> DownloadResult<reqwest::Response> {
        match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(DownloadError::Network {
                file: target.name.clone(),
                source,
            }),
            Err(_) => Err(DownloadError::Timeout {
                file: target.name.clone(),
                secs: self.request_timeout.as_secs(),
            }),
        }
    }

    async fn probe_size(&self, target: &FileTarget) -> DownloadResult<u64> {
        let response = self.send(target, self.client.head(&target.url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                file: target.name.clone(),
                status: status.as_u16(),
            });
        }
        let headers = response.headers();
        Ok(header_u64(headers, LINKED_SIZE)
            .or_else(|| header_u64(headers, CONTENT_LENGTH))
            .unwrap_or(0))
    }

    async fn attempt(
        &self,
        target: &FileTarget,
        part_path: &Path,
        ctx: &FetchContext,
    ) -> DownloadResult<FetchedFile> {
        // Re-read every attempt so bytes from a dropped connection are kept.
        let resume_offset = file_len(part_path).await.unwrap_or(0);
        if resume_offset > 0 {
            tracing::debug!("[direct] {} has {} bytes on disk", target.name, resume_offset);
        }

        let total = self.probe_size(target).await?;

        if total > 0 {
            if let Some(existing) = file_len(&target.destination).await {
                if existing >= total {
                    tracing::info!("[direct] {} already complete, skipping", target.name);
                    ctx.progress(target.index, existing, existing, 0.0).await;
                    return Ok(FetchedFile {
                        path: target.destination.clone(),
                        size: existing,
                        completion: FileCompletion::Skipped,
                    });
                }
            }
            if resume_offset >= total {
                return promote_partial(target, part_path, resume_offset, ctx).await;
            }
        }

        self.transfer(target, part_path, resume_offset, total, ctx)
            .await
    }

    async fn transfer(
        &self,
        target: &FileTarget,
        part_path: &Path,
        resume_offset: u64,
        probed_total: u64,
        ctx: &FetchContext,
    ) -> DownloadResult<FetchedFile> {
        let mut request = self.client.get(&target.url);
        if resume_offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", resume_offset));
        }
        let response = self.send(target, request).await?;
        let status = response.status();

        let mut offset = resume_offset;
        if resume_offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            match range_total(response.headers()) {
                // Size was unknown up front and the partial already holds it all.
                Some(total) if total == resume_offset => {
                    return promote_partial(target, part_path, resume_offset, ctx).await;
                }
                Some(total) if total > resume_offset => {
                    tracing::warn!(
                        "[direct] {} refused range at {} of {}, keeping partial",
                        target.name,
                        resume_offset,
                        total
                    );
                }
                _ => {
                    tracing::warn!(
                        "[direct] {} refused range at {}, discarding partial",
                        target.name,
                        resume_offset
                    );
                    discard_partial(part_path).await;
                }
            }
            return Err(DownloadError::HttpStatus {
                file: target.name.clone(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                file: target.name.clone(),
                status: status.as_u16(),
            });
        }
        if resume_offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            tracing::warn!("[direct] server ignored range for {}, restarting", target.name);
            offset = 0;
        }

        let total = content_total(response.headers(), offset)
            .filter(|t| *t > 0)
            .unwrap_or(probed_total);

        let file = if offset > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(part_path)
                .await
        } else {
            tokio::fs::File::create(part_path).await
        }
        .map_err(|e| DownloadError::disk(part_path, e))?;
        let mut file = tokio::io::BufWriter::with_capacity(WRITE_BUFFER, file);

        tracing::info!(
            "[direct] fetching {} from byte {} of {}",
            target.name,
            offset,
            total
        );
        ctx.progress(target.index, offset, total, 0.0).await;

        let mut downloaded = offset;
        let mut throttle = ProgressThrottle::new(self.progress_interval_ms);
        throttle.should_emit();
        let mut window = SpeedWindow::new(offset);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    file.flush().await.map_err(|e| DownloadError::disk(part_path, e))?;
                    return Err(DownloadError::Cancelled);
                }
                next = tokio::time::timeout(self.request_timeout, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(chunk))) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| DownloadError::disk(part_path, e))?;
                    downloaded += chunk.len() as u64;
                    if throttle.should_emit() {
                        let speed = window.tick(downloaded);
                        ctx.progress(target.index, downloaded, total, speed).await;
                    }
                }
                Ok(Some(Err(source))) => {
                    file.flush().await.map_err(|e| DownloadError::disk(part_path, e))?;
                    return Err(DownloadError::Network {
                        file: target.name.clone(),
                        source,
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    file.flush().await.map_err(|e| DownloadError::disk(part_path, e))?;
                    return Err(DownloadError::Timeout {
                        file: target.name.clone(),
                        secs: self.request_timeout.as_secs(),
                    });
                }
            }
        }

        file.flush().await.map_err(|e| DownloadError::disk(part_path, e))?;
        drop(file);

        let received = file_len(part_path).await.unwrap_or(downloaded);
        if total > 0 && received < total {
            return Err(DownloadError::Incomplete {
                file: target.name.clone(),
                received,
                expected: total,
            });
        }
        if total > 0 && received > total {
            discard_partial(part_path).await;
            return Err(DownloadError::SizeMismatch {
                file: target.name.clone(),
                received,
                expected: total,
            });
        }

        promote(part_path, &target.destination).await?;
        let speed = window.tick(received);
        ctx.progress(target.index, received, received, speed).await;

        Ok(FetchedFile {
            path: target.destination.clone(),
            size: received,
            completion: FileCompletion::Downloaded,
        })
    }
}

async fn promote_partial(
    target: &FileTarget,
    part_path: &Path,
    size: u64,
    ctx: &FetchContext,
) -> DownloadResult<FetchedFile> {
    tracing::info!("[direct] {} complete in partial file, promoting", target.name);
    promote(part_path, &target.destination).await?;
    ctx.progress(target.index, size, size, 0.0).await;
    Ok(FetchedFile {
        path: target.destination.clone(),
        size,
        completion: FileCompletion::FromPartial,
    })
}

#[async_trait]
impl Fetcher for DirectFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Primary
    }

    async fn fetch(&self, target: &FileTarget, ctx: &FetchContext) -> DownloadResult<FetchedFile> {
        if let Some(parent) = target.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::disk(parent, e))?;
        }
        let part_path = part_path_for(&target.destination);
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            if ctx.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            if attempt > 1 {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
                }
            }

            match self.attempt(target, &part_path, ctx).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "[direct] attempt {}/{} for {} failed: {}",
                        attempt,
                        self.max_attempts,
                        target.name,
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(DownloadError::Incomplete {
            file: target.name.clone(),
            received: 0,
            expected: 0,
        }))
    }
}
