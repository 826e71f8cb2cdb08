use std::sync::Arc;
use std::time::{Duration, Instant};

use modelget_core::core::events::{EventEmitter, JobInfo};
use modelget_core::models::settings::{AppSettings, DownloadSettings, HelperSettings};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::delegate::DelegateFetcher;
use crate::core::dependencies::{CapabilityProber, DependencyStatus};
use crate::core::direct_downloader::DirectFetcher;
use crate::core::errors::{DownloadError, DownloadResult};
use crate::core::http_client::{build_client, endpoint_usable};
use crate::core::hub_api::list_repo_files;
use crate::core::jobs::JobRegistry;
use crate::core::notify::NotificationBridge;
use crate::core::progress::ProgressTick;
use crate::core::strategy::{select_strategy, Strategy};
use crate::core::traits::{FetchContext, FetchEvent, Fetcher};
use crate::models::download::{DownloadOutcome, FileResult};
use crate::models::manifest::{resolve_targets, DownloadRequest, FileTarget, ManifestEntry};

/// Capacity of the engine -> orchestrator channel. A slow consumer stalls
/// the transfer once this many events are queued.
const EVENT_BUFFER: usize = 64;

pub type ProgressSink = mpsc::Sender<ProgressTick>;

/// Entry point for downloads: owns the job table, the prober and the
/// engines, and drives each job's manifest on its own task.
pub struct DownloadManager {
    settings: DownloadSettings,
    helper: HelperSettings,
    registry: Arc<JobRegistry>,
    prober: Arc<CapabilityProber>,
    bridge: NotificationBridge,
    client: reqwest::Client,
    direct: Arc<DirectFetcher>,
}

impl DownloadManager {
    pub fn new(settings: &AppSettings, emitter: Arc<dyn EventEmitter>) -> DownloadResult<Self> {
        let native =
            settings.download.native_enabled && endpoint_usable(&settings.download.endpoint);
        let prober = CapabilityProber::new(settings.helper.clone(), native);
        Self::with_prober(settings, Arc::new(prober), emitter)
    }

    pub fn with_prober(
        settings: &AppSettings,
        prober: Arc<CapabilityProber>,
        emitter: Arc<dyn EventEmitter>,
    ) -> DownloadResult<Self> {
        let client = build_client(&settings.download, &settings.proxy)?;
        Ok(Self {
            settings: settings.download.clone(),
            helper: settings.helper.clone(),
            registry: Arc::new(JobRegistry::new()),
            prober,
            bridge: NotificationBridge::new(emitter),
            direct: Arc::new(DirectFetcher::new(client.clone(), &settings.download)),
            client,
        })
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Appends the hub's file list for whole-repository requests, after the
    /// entries the caller named explicitly.
    async fn expand_whole_repo(
        &self,
        mut request: DownloadRequest,
    ) -> DownloadResult<DownloadRequest> {
        if !request.whole_repo {
            return Ok(request);
        }
        let revision = request
            .revision
            .clone()
            .unwrap_or_else(|| self.settings.revision.clone());
        let listed = list_repo_files(
            &self.client,
            &self.settings.endpoint,
            &request.repository,
            &revision,
            Duration::from_secs(self.settings.request_timeout_secs.max(1)),
        )
        .await?;
        tracing::info!("[jobs] {} lists {} files", request.repository, listed.len());

        for path in listed {
            if !request.files.iter().any(|e| e.path == path) {
                request.files.push(ManifestEntry::new(path));
            }
        }
        request.whole_repo = false;
        Ok(request)
    }

    /// Creates a job and starts it in the background. Errors returned here
    /// mean the job never reached DOWNLOADING.
    pub async fn start(
        &self,
        request: DownloadRequest,
        sink: Option<ProgressSink>,
    ) -> DownloadResult<(Uuid, JoinHandle<DownloadResult<DownloadOutcome>>)> {
        let request = self.expand_whole_repo(request).await?;
        let targets = resolve_targets(&request, &self.settings)?;
        let (id, cancel) = self.registry.create(request.repository.clone(), targets.len());

        let caps = self.prober.capabilities().await;
        let strategy = select_strategy(self.settings.prefer_external_helper, &caps);
        tracing::info!(
            "[jobs] {} {} ({} files) via {}",
            id,
            request.repository,
            targets.len(),
            strategy.kind()
        );

        let fetcher: Arc<dyn Fetcher> = match &strategy {
            Strategy::Primary => self.direct.clone(),
            Strategy::Secondary => Arc::new(DelegateFetcher::new(
                self.helper.clone(),
                &self.settings,
                caps.registry_cli,
            )),
            Strategy::Unavailable(guidance) => {
                if let Ok(Some(info)) = self.registry.fail(id, guidance.clone()) {
                    self.bridge.failed(info);
                }
                return Err(DownloadError::CapabilityUnavailable(guidance.clone()));
            }
        };

        let info = self.registry.start(id, strategy.kind())?;
        self.bridge.started(info);

        let run = JobRun {
            id,
            repository: request.repository,
            targets,
            fetcher,
            registry: self.registry.clone(),
            bridge: self.bridge.clone(),
            sink,
            cancel,
        };
        Ok((id, tokio::spawn(run.run())))
    }

    /// Runs a download to its end.
    pub async fn download(
        &self,
        request: DownloadRequest,
        sink: Option<ProgressSink>,
    ) -> DownloadResult<DownloadOutcome> {
        let (_, handle) = self.start(request, sink).await?;
        handle
            .await
            .map_err(|e| DownloadError::Task(e.to_string()))?
    }

    pub fn status(&self, id: Uuid) -> DownloadResult<JobInfo> {
        self.registry.get(id)
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.registry.list()
    }

    pub fn cancel(&self, id: Uuid) -> DownloadResult<JobInfo> {
        let info = self.registry.cancel(id)?;
        self.bridge.cancelled(info.clone());
        Ok(info)
    }

    pub fn cancel_all(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        let count = cancelled.len();
        for info in cancelled {
            self.bridge.cancelled(info);
        }
        count
    }

    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.registry.cleanup(max_age)
    }

    /// Periodically drops finished jobs older than the configured retention.
    pub fn spawn_janitor(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let max_age = Duration::from_secs(self.settings.job_retention_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.cleanup(max_age);
                    }
                }
            }
        })
    }

    pub async fn check_dependencies(&self) -> Vec<DependencyStatus> {
        let caps = self.prober.capabilities().await;
        let mut report = vec![DependencyStatus {
            name: "native http".into(),
            installed: caps.native,
            version: caps.native.then(|| self.settings.endpoint.clone()),
        }];
        report.extend(self.prober.dependency_report().await);
        report
    }
}

struct JobRun {
    id: Uuid,
    repository: String,
    targets: Vec<FileTarget>,
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<JobRegistry>,
    bridge: NotificationBridge,
    sink: Option<ProgressSink>,
    cancel: CancellationToken,
}

impl JobRun {
    async fn run(self) -> DownloadResult<DownloadOutcome> {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let names = self.targets.iter().map(|t| t.name.clone()).collect();
        let forwarder = tokio::spawn(forward_events(
            self.id,
            names,
            rx,
            self.registry.clone(),
            self.bridge.clone(),
            self.sink.clone(),
        ));

        let result = self.fetch_all(tx).await;
        // All senders are gone once fetch_all returns; wait for the drain so
        // the terminal event is the last one out.
        let _ = forwarder.await;

        match result {
            Ok(files) => match self.registry.complete(self.id)? {
                Some(info) => {
                    self.bridge.complete(info);
                    let total_size = files.iter().map(|f| f.size).sum();
                    let duration_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        "[jobs] {} finished {} files in {} ms",
                        self.id,
                        files.len(),
                        duration_ms
                    );
                    Ok(DownloadOutcome {
                        job_id: self.id,
                        repository: self.repository,
                        files,
                        total_size,
                        duration_ms,
                    })
                }
                None => Err(DownloadError::Cancelled),
            },
            Err(e) if e.is_cancelled() => {
                if let Some(info) = self.registry.mark_cancelled(self.id)? {
                    self.bridge.cancelled(info);
                }
                tracing::info!("[jobs] {} cancelled", self.id);
                Err(e)
            }
            Err(e) => {
                tracing::error!("[jobs] {} failed: {}", self.id, e);
                match self.registry.fail(self.id, e.to_string())? {
                    Some(info) => {
                        self.bridge.failed(info);
                        Err(e)
                    }
                    None if self.cancel.is_cancelled() => Err(DownloadError::Cancelled),
                    None => Err(e),
                }
            }
        }
    }

    /// Manifest order, one file at a time; the first failure ends the job.
    async fn fetch_all(&self, tx: mpsc::Sender<FetchEvent>) -> DownloadResult<Vec<FileResult>> {
        let mut results = Vec::with_capacity(self.targets.len());
        let strategy = self.fetcher.kind();

        for target in &self.targets {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let _ = tx
                .send(FetchEvent::FileStarted {
                    index: target.index,
                    name: target.name.clone(),
                })
                .await;

            let ctx = FetchContext {
                events: tx.clone(),
                cancel: self.cancel.clone(),
            };
            match self.fetcher.fetch(target, &ctx).await {
                Ok(fetched) => {
                    let _ = tx
                        .send(FetchEvent::FileDone {
                            index: target.index,
                            size: fetched.size,
                            completion: fetched.completion,
                        })
                        .await;
                    results.push(FileResult {
                        path: target.name.clone(),
                        destination: fetched.path,
                        size: fetched.size,
                        strategy,
                        completion: fetched.completion,
                    });
                }
                Err(e) => {
                    if !e.is_cancelled() {
                        let _ = tx
                            .send(FetchEvent::FileFailed {
                                index: target.index,
                                error: e.to_string(),
                            })
                            .await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}

/// Single writer for a job's progress: applies engine events to the
/// registry, then notifies observers and the caller's sink.
async fn forward_events(
    id: Uuid,
    names: Vec<String>,
    mut rx: mpsc::Receiver<FetchEvent>,
    registry: Arc<JobRegistry>,
    bridge: NotificationBridge,
    sink: Option<ProgressSink>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FetchEvent::FileStarted { index, name } => {
                let _ = registry.begin_file(id, index, &name);
            }
            FetchEvent::Progress {
                index,
                downloaded,
                total,
                speed_bps,
            } => {
                let Ok(Some(info)) = registry.update_file(id, index, downloaded, total, speed_bps)
                else {
                    continue;
                };
                if let Some(sink) = &sink {
                    let _ = sink.send(progress_tick(&info, index)).await;
                }
                bridge.progress(info);
            }
            FetchEvent::FileDone {
                index,
                size,
                completion,
            } => {
                if let Ok(info) = registry.finish_file(id, index, size) {
                    let name = names.get(index).map(String::as_str).unwrap_or_default();
                    bridge.file_complete(info, name, size, completion);
                }
            }
            FetchEvent::FileFailed { index, error } => {
                let _ = registry.fail_file(id, index, &error);
            }
            FetchEvent::Diagnostic(line) => {
                let _ = registry.push_diagnostic(id, line);
            }
        }
    }
}

fn progress_tick(info: &JobInfo, index: usize) -> ProgressTick {
    let file = info.files.get(index);
    ProgressTick {
        job_id: info.id,
        file: file.map(|f| f.name.clone()).unwrap_or_default(),
        file_index: index,
        total_files: info.total_files,
        file_percent: file.map(|f| f.percent).unwrap_or(0.0),
        overall_percent: info.progress,
        bytes_downloaded: info.bytes_downloaded,
        bytes_total: info.bytes_total,
        speed_bytes_per_sec: info.speed_bytes_per_sec,
        eta_seconds: info.eta_seconds,
    }
}
