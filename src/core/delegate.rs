use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use modelget_core::core::events::{FileCompletion, StrategyKind};
use modelget_core::models::settings::{DownloadSettings, HelperSettings};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::direct_downloader::file_len;
use crate::core::errors::{DownloadError, DownloadResult};
use crate::core::progress::{ProgressThrottle, SpeedWindow};
use crate::core::traits::{FetchContext, FetchedFile, Fetcher};
use crate::models::manifest::FileTarget;

const STDERR_KEEP: usize = 200;

/// Program run by the interpreter when no helper script is configured.
/// Speaks the same line protocol as an external helper script.
const EMBEDDED_HELPER: &str = r#"
import argparse, json, os, sys

def emit(kind, **data):
    print(json.dumps({"type": kind, "data": data}), flush=True)

p = argparse.ArgumentParser()
p.add_argument("--repo-id", required=True)
p.add_argument("--filename", required=True)
p.add_argument("--revision", default="main")
p.add_argument("--dest", required=True)
p.add_argument("--cache-dir")
a = p.parse_args()

try:
    from huggingface_hub import hf_hub_download
except ImportError:
    emit("error", message="huggingface_hub is not installed", code="ImportError")
    sys.exit(2)

emit("start", repo_id=a.repo_id, filename=a.filename, revision=a.revision)
try:
    path = hf_hub_download(
        repo_id=a.repo_id,
        filename=a.filename,
        revision=a.revision,
        local_dir=a.dest,
        cache_dir=a.cache_dir,
        token=os.environ.get("HF_TOKEN") or None,
    )
except Exception as e:
    emit("error", message=str(e), code=type(e).__name__)
    sys.exit(1)

size = os.path.getsize(path)
emit("progress", current=size, total=size)
emit("complete", file_path=path, file_size=size)
"#;

#[derive(Debug, Clone, PartialEq)]
pub enum HelperMessage {
    Start,
    Progress { current: u64, total: u64 },
    Complete { file_path: Option<PathBuf>, file_size: u64 },
    Error { message: String },
}

/// Parses one `{"type": ..., "data": {...}}` line. Anything else is log
/// chatter and yields `None`.
pub fn parse_message(line: &str) -> Option<HelperMessage> {
    let json: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let kind = json.get("type").and_then(|v| v.as_str())?;
    let data = json.get("data").cloned().unwrap_or(serde_json::Value::Null);
    let num = |key: &str| data.get(key).and_then(|v| v.as_u64()).unwrap_or(0);

    match kind {
        "start" => Some(HelperMessage::Start),
        "progress" => Some(HelperMessage::Progress {
            current: num("current"),
            total: num("total"),
        }),
        "complete" => Some(HelperMessage::Complete {
            file_path: data
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(PathBuf::from),
            file_size: num("file_size"),
        }),
        "error" => Some(HelperMessage::Error {
            message: data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("helper reported an error")
                .to_string(),
        }),
        _ => None,
    }
}

/// Secondary strategy: one helper process per file.
pub struct DelegateFetcher {
    helper: HelperSettings,
    auth_token: Option<String>,
    cache_dir: Option<PathBuf>,
    registry_cli_available: bool,
    progress_interval_ms: u64,
}

impl DelegateFetcher {
    pub fn new(
        helper: HelperSettings,
        settings: &DownloadSettings,
        registry_cli_available: bool,
    ) -> Self {
        Self {
            helper,
            auth_token: settings.auth_token.clone(),
            cache_dir: settings.cache_dir.clone(),
            registry_cli_available,
            progress_interval_ms: settings.progress_interval_ms,
        }
    }

    fn hub_command(&self, target: &FileTarget) -> tokio::process::Command {
        let mut cmd = crate::core::process::command(&self.helper.interpreter);
        match &self.helper.helper_script {
            Some(script) => {
                cmd.arg(script);
            }
            None => {
                cmd.args(["-c", EMBEDDED_HELPER]);
            }
        }
        cmd.arg("--repo-id")
            .arg(&target.repository)
            .arg("--filename")
            .arg(&target.name)
            .arg("--revision")
            .arg(&target.revision)
            .arg("--dest")
            .arg(&target.dest_dir);
        if let Some(cache) = &self.cache_dir {
            cmd.arg("--cache-dir").arg(cache);
        }
        // Passed through the environment so it stays out of process listings.
        if let Some(token) = self.auth_token.as_deref().filter(|t| !t.is_empty()) {
            cmd.env("HF_TOKEN", token);
        }
        cmd
    }

    fn registry_command(&self, registry_id: &str, target: &FileTarget) -> tokio::process::Command {
        let mut cmd = crate::core::process::command(&self.helper.registry_cli);
        cmd.arg("download")
            .arg("--model")
            .arg(registry_id)
            .arg(&target.name)
            .arg("--local_dir")
            .arg(&target.dest_dir);
        cmd
    }

    fn command_for(&self, target: &FileTarget) -> tokio::process::Command {
        match target.registry_id.as_deref() {
            Some(id) if self.registry_cli_available => self.registry_command(id, target),
            _ => self.hub_command(target),
        }
    }

    async fn run(
        &self,
        mut cmd: tokio::process::Command,
        target: &FileTarget,
        ctx: &FetchContext,
    ) -> DownloadResult<FetchedFile> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DownloadError::Delegate {
                file: target.name.clone(),
                message: format!("could not start helper: {}", e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DownloadError::Delegate {
            file: target.name.clone(),
            message: "helper has no stdout".into(),
        })?;
        let stderr = child.stderr.take();

        let stderr_task = tokio::spawn(async move {
            let mut kept = VecDeque::with_capacity(STDERR_KEEP);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if kept.len() == STDERR_KEEP {
                        kept.pop_front();
                    }
                    kept.push_back(line);
                }
            }
            Vec::from(kept)
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut throttle = ProgressThrottle::new(self.progress_interval_ms);
        let mut window = SpeedWindow::new(0);
        let mut completed: Option<(Option<PathBuf>, u64)> = None;
        let mut reported_error: Option<String> = None;

        loop {
            let line = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(DownloadError::Cancelled);
                }
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => match parse_message(&line) {
                    Some(HelperMessage::Start) => {
                        ctx.progress(target.index, 0, 0, 0.0).await;
                    }
                    Some(HelperMessage::Progress { current, total }) => {
                        if throttle.should_emit() {
                            let speed = window.tick(current);
                            ctx.progress(target.index, current, total, speed).await;
                        }
                    }
                    Some(HelperMessage::Complete {
                        file_path,
                        file_size,
                    }) => {
                        completed = Some((file_path, file_size));
                    }
                    Some(HelperMessage::Error { message }) => {
                        ctx.diagnostic(format!("{}: {}", target.name, message))
                            .await;
                        reported_error = Some(message);
                    }
                    None => tracing::trace!("[delegate] {}", line),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("[delegate] unreadable helper output: {}", e);
                    break;
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DownloadError::Cancelled);
            }
            status = child.wait() => status.map_err(|e| DownloadError::Delegate {
                file: target.name.clone(),
                message: format!("helper did not exit cleanly: {}", e),
            })?,
        };
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if !status.success() || reported_error.is_some() {
            for line in &stderr_lines {
                ctx.diagnostic(line.clone()).await;
            }
        }

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            let stderr = if stderr_lines.is_empty() {
                reported_error.unwrap_or_default()
            } else {
                stderr_lines.join("\n")
            };
            return Err(DownloadError::DelegateExit {
                file: target.name.clone(),
                code,
                stderr,
            });
        }
        if let Some(message) = reported_error {
            return Err(DownloadError::Delegate {
                file: target.name.clone(),
                message,
            });
        }

        let (reported_path, reported_size) = completed.unwrap_or((None, 0));
        let path = reported_path.unwrap_or_else(|| target.destination.clone());
        let size = match file_len(&path).await {
            Some(len) => len,
            None => {
                return Err(DownloadError::Delegate {
                    file: target.name.clone(),
                    message: format!("helper exited cleanly but {} is missing", path.display()),
                })
            }
        };
        if reported_size > 0 && reported_size != size {
            tracing::warn!(
                "[delegate] {} reported {} bytes, found {}",
                target.name,
                reported_size,
                size
            );
        }

        let speed = window.tick(size);
        ctx.progress(target.index, size, size, speed).await;
        Ok(FetchedFile {
            path,
            size,
            completion: FileCompletion::Downloaded,
        })
    }
}

#[async_trait]
impl Fetcher for DelegateFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Secondary
    }

    async fn fetch(&self, target: &FileTarget, ctx: &FetchContext) -> DownloadResult<FetchedFile> {
        if ctx.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tokio::fs::create_dir_all(&target.dest_dir)
            .await
            .map_err(|e| DownloadError::disk(&target.dest_dir, e))?;
        tracing::info!("[delegate] fetching {} via helper", target.name);
        let cmd = self.command_for(target);
        self.run(cmd, target, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_messages() {
        assert_eq!(
            parse_message(r#"{"type":"start","data":{"repo_id":"a/b"}}"#),
            Some(HelperMessage::Start)
        );
        assert_eq!(
            parse_message(r#"{"type":"progress","data":{"current":10,"total":40}}"#),
            Some(HelperMessage::Progress {
                current: 10,
                total: 40
            })
        );
        assert_eq!(
            parse_message(r#"{"type":"complete","data":{"file_path":"/m/a.bin","file_size":40}}"#),
            Some(HelperMessage::Complete {
                file_path: Some(PathBuf::from("/m/a.bin")),
                file_size: 40
            })
        );
        assert_eq!(
            parse_message(r#"{"type":"error","data":{"message":"404","code":"EntryNotFoundError"}}"#),
            Some(HelperMessage::Error {
                message: "404".into()
            })
        );
    }

    #[test]
    fn ignores_non_protocol_lines() {
        assert_eq!(parse_message("Downloading model.bin: 45%"), None);
        assert_eq!(parse_message(""), None);
        assert_eq!(parse_message(r#"{"type":"mystery"}"#), None);
        assert_eq!(parse_message(r#"[1,2,3]"#), None);
    }

    #[test]
    fn progress_without_data_defaults_to_zero() {
        assert_eq!(
            parse_message(r#"{"type":"progress"}"#),
            Some(HelperMessage::Progress {
                current: 0,
                total: 0
            })
        );
    }

    #[test]
    fn registry_entries_use_cli_only_when_available() {
        let settings = DownloadSettings::with_models_dir("/models".into());
        let target = FileTarget {
            index: 0,
            total_files: 1,
            name: "model.bin".into(),
            repository: "org/model".into(),
            revision: "main".into(),
            url: "http://x/model.bin".into(),
            registry_id: Some("ms/model".into()),
            dest_dir: "/models/org--model".into(),
            destination: "/models/org--model/model.bin".into(),
        };

        let with_cli = DelegateFetcher::new(HelperSettings::default(), &settings, true);
        let cmd = with_cli.command_for(&target);
        assert_eq!(cmd.as_std().get_program(), "modelscope");

        let without_cli = DelegateFetcher::new(HelperSettings::default(), &settings, false);
        let cmd = without_cli.command_for(&target);
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert!(args.iter().any(|a| *a == "--repo-id"));
        assert!(args.iter().any(|a| *a == "org/model"));
    }
}
