use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::direct_downloader::PART_SUFFIX;
use crate::core::errors::{DownloadError, DownloadResult};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileCheck {
    pub path: PathBuf,
    pub exists: bool,
    pub size: u64,
    /// Present as a regular file with at least one byte.
    pub ok: bool,
}

/// Existence and non-zero size only; contents are not hashed.
pub async fn verify_files(paths: &[PathBuf]) -> Vec<FileCheck> {
    let mut checks = Vec::with_capacity(paths.len());
    for path in paths {
        let check = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => FileCheck {
                path: path.clone(),
                exists: true,
                size: meta.len(),
                ok: meta.len() > 0,
            },
            _ => FileCheck {
                path: path.clone(),
                exists: false,
                size: 0,
                ok: false,
            },
        };
        if !check.ok {
            tracing::debug!("[verify] {} failed check", path.display());
        }
        checks.push(check);
    }
    checks
}

pub fn all_ok(checks: &[FileCheck]) -> bool {
    checks.iter().all(|c| c.ok)
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledAsset {
    pub repository: String,
    pub path: PathBuf,
    pub file_count: usize,
    pub size: u64,
    pub partial_files: usize,
}

/// One entry per repository directory under `root`, sorted by name.
/// A missing root lists nothing.
pub async fn list_installed(root: &Path) -> DownloadResult<Vec<InstalledAsset>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DownloadError::disk(root, e)),
    };

    let mut assets = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DownloadError::disk(root, e))?
    {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        let (file_count, size, partial_files) = dir_stats(&path).await?;
        if file_count == 0 && partial_files == 0 {
            continue;
        }
        assets.push(InstalledAsset {
            repository: name.replace("--", "/"),
            path,
            file_count,
            size,
            partial_files,
        });
    }
    assets.sort_by(|a, b| a.repository.cmp(&b.repository));
    Ok(assets)
}

async fn dir_stats(dir: &Path) -> DownloadResult<(usize, u64, usize)> {
    let mut files = 0;
    let mut size = 0;
    let mut partial = 0;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| DownloadError::disk(&current, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::disk(&current, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if name.ends_with(PART_SUFFIX) {
                partial += 1;
            } else if meta.is_file() {
                files += 1;
                size += meta.len();
            }
        }
    }
    Ok((files, size, partial))
}
