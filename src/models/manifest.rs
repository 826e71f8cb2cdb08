use std::path::{Component, Path, PathBuf};

use modelget_core::models::settings::DownloadSettings;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DownloadError, DownloadResult};

/// One file the caller wants fetched. Only `path` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub registry_id: Option<String>,
    #[serde(default)]
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub repository: String,
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub revision: Option<String>,
    /// Globs a path must match (any of) to be fetched. Empty keeps everything.
    #[serde(default)]
    pub allow_patterns: Vec<String>,
    /// Globs that drop a path even when an allow pattern matched it.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Append every file the hub lists for the repository.
    #[serde(default)]
    pub whole_repo: bool,
}

impl DownloadRequest {
    pub fn new(repository: impl Into<String>, files: Vec<ManifestEntry>) -> Self {
        Self {
            repository: repository.into(),
            files,
            dest: None,
            revision: None,
            allow_patterns: Vec::new(),
            ignore_patterns: Vec::new(),
            whole_repo: false,
        }
    }
}

/// Allow/ignore globs in hub semantics: `*` also crosses `/`, and a
/// trailing `/` selects everything below that directory.
#[derive(Debug, Default)]
pub struct FileFilter {
    allow: Vec<glob::Pattern>,
    ignore: Vec<glob::Pattern>,
}

fn compile(patterns: &[String]) -> DownloadResult<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|raw| {
            let raw = if raw.ends_with('/') {
                format!("{}*", raw)
            } else {
                raw.clone()
            };
            glob::Pattern::new(&raw).map_err(|e| {
                DownloadError::InvalidManifest(format!("bad file pattern {:?}: {}", raw, e))
            })
        })
        .collect()
}

impl FileFilter {
    pub fn new(allow: &[String], ignore: &[String]) -> DownloadResult<Self> {
        Ok(Self {
            allow: compile(allow)?,
            ignore: compile(ignore)?,
        })
    }

    pub fn keeps(&self, path: &str) -> bool {
        (self.allow.is_empty() || self.allow.iter().any(|p| p.matches(path)))
            && !self.ignore.iter().any(|p| p.matches(path))
    }
}

/// A manifest entry with every override resolved.
#[derive(Debug, Clone)]
pub struct FileTarget {
    pub index: usize,
    pub total_files: usize,
    pub name: String,
    pub repository: String,
    pub revision: String,
    pub url: String,
    pub registry_id: Option<String>,
    pub dest_dir: PathBuf,
    pub destination: PathBuf,
}

pub fn repo_dir_name(repository: &str) -> String {
    repository.trim_matches('/').replace('/', "--")
}

fn is_relative_clean(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Percent-encodes each `/`-separated segment, dropping empty ones.
pub fn encode_segments(path: &str) -> String {
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_file_url(endpoint: &str, repository: &str, revision: &str, path: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        endpoint.trim_end_matches('/'),
        encode_segments(repository),
        urlencoding::encode(revision),
        encode_segments(path)
    )
}

/// Validates the request and resolves each entry's URL and destination.
/// Entries rejected by the request's patterns are dropped first.
/// Destination directory precedence: entry override, request override,
/// then `<models_dir>/<org>--<name>`.
pub fn resolve_targets(
    request: &DownloadRequest,
    settings: &DownloadSettings,
) -> DownloadResult<Vec<FileTarget>> {
    if request.repository.trim().is_empty() {
        return Err(DownloadError::InvalidManifest(
            "repository reference is empty".into(),
        ));
    }
    if request.files.is_empty() {
        return Err(DownloadError::InvalidManifest("manifest has no files".into()));
    }

    let filter = FileFilter::new(&request.allow_patterns, &request.ignore_patterns)?;
    let entries: Vec<&ManifestEntry> = request
        .files
        .iter()
        .filter(|entry| filter.keeps(&entry.path))
        .collect();
    if entries.is_empty() {
        return Err(DownloadError::InvalidManifest(
            "no file matches the allow/ignore patterns".into(),
        ));
    }

    let revision = request
        .revision
        .clone()
        .unwrap_or_else(|| settings.revision.clone());
    let total_files = entries.len();

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            if !is_relative_clean(&entry.path) {
                return Err(DownloadError::InvalidManifest(format!(
                    "file path {:?} must be relative without '..'",
                    entry.path
                )));
            }
            let repository = entry
                .repository
                .clone()
                .unwrap_or_else(|| request.repository.clone());
            let dest_dir = entry
                .dest
                .clone()
                .or_else(|| request.dest.clone())
                .unwrap_or_else(|| settings.models_dir.join(repo_dir_name(&repository)));
            let url = match &entry.url {
                Some(url) => url.clone(),
                None => build_file_url(&settings.endpoint, &repository, &revision, &entry.path),
            };
            Ok(FileTarget {
                index,
                total_files,
                name: entry.path.clone(),
                destination: dest_dir.join(&entry.path),
                dest_dir,
                repository,
                revision: revision.clone(),
                url,
                registry_id: entry.registry_id.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DownloadSettings {
        DownloadSettings::with_models_dir(PathBuf::from("/models"))
    }

    #[test]
    fn url_encodes_each_segment() {
        let url = build_file_url(
            "https://huggingface.co/",
            "org/My Model",
            "main",
            "onnx/model q4.onnx",
        );
        assert_eq!(
            url,
            "https://huggingface.co/org/My%20Model/resolve/main/onnx/model%20q4.onnx"
        );
    }

    #[test]
    fn default_destination_uses_repo_dir() {
        let req = DownloadRequest::new("org/model", vec![ManifestEntry::new("weights/a.bin")]);
        let targets = resolve_targets(&req, &settings()).unwrap();
        assert_eq!(targets[0].dest_dir, PathBuf::from("/models/org--model"));
        assert_eq!(
            targets[0].destination,
            PathBuf::from("/models/org--model/weights/a.bin")
        );
        assert_eq!(targets[0].revision, "main");
        assert_eq!(targets[0].total_files, 1);
    }

    #[test]
    fn entry_overrides_take_precedence() {
        let mut req = DownloadRequest::new(
            "org/model",
            vec![
                ManifestEntry {
                    path: "a.bin".into(),
                    url: Some("http://mirror/a.bin".into()),
                    dest: Some(PathBuf::from("/elsewhere")),
                    repository: Some("other/repo".into()),
                    registry_id: Some("ms/model".into()),
                },
                ManifestEntry::new("b.bin"),
            ],
        );
        req.dest = Some(PathBuf::from("/shared"));
        req.revision = Some("v2".into());

        let targets = resolve_targets(&req, &settings()).unwrap();
        assert_eq!(targets[0].url, "http://mirror/a.bin");
        assert_eq!(targets[0].dest_dir, PathBuf::from("/elsewhere"));
        assert_eq!(targets[0].repository, "other/repo");
        assert_eq!(targets[0].registry_id.as_deref(), Some("ms/model"));
        assert_eq!(targets[1].dest_dir, PathBuf::from("/shared"));
        assert_eq!(
            targets[1].url,
            "https://huggingface.co/org/model/resolve/v2/b.bin"
        );
        assert_eq!(targets[1].index, 1);
    }

    #[test]
    fn rejects_escaping_paths() {
        for bad in ["../a.bin", "/etc/passwd", "a/../../b", ""] {
            let req = DownloadRequest::new("org/model", vec![ManifestEntry::new(bad)]);
            assert!(
                matches!(
                    resolve_targets(&req, &settings()),
                    Err(DownloadError::InvalidManifest(_))
                ),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn patterns_filter_the_manifest() {
        let mut req = DownloadRequest::new(
            "org/model",
            ["config.json", "model.safetensors", "onnx/model.onnx", "onnx/model_q4.onnx"]
                .into_iter()
                .map(ManifestEntry::new)
                .collect(),
        );
        req.allow_patterns = vec!["*.json".into(), "onnx/".into()];
        req.ignore_patterns = vec!["*q4*".into()];

        let targets = resolve_targets(&req, &settings()).unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["config.json", "onnx/model.onnx"]);
        assert_eq!(targets[1].index, 1);
        assert_eq!(targets[1].total_files, 2);
    }

    #[test]
    fn star_crosses_directories() {
        let filter = FileFilter::new(&["*.onnx".into()], &[]).unwrap();
        assert!(filter.keeps("onnx/model.onnx"));
        assert!(!filter.keeps("model.safetensors"));
    }

    #[test]
    fn nothing_matching_is_rejected() {
        let mut req = DownloadRequest::new("org/model", vec![ManifestEntry::new("a.bin")]);
        req.allow_patterns = vec!["*.gguf".into()];
        assert!(matches!(
            resolve_targets(&req, &settings()),
            Err(DownloadError::InvalidManifest(_))
        ));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(FileFilter::new(&["[".into()], &[]).is_err());
    }

    #[test]
    fn rejects_empty_manifest() {
        let req = DownloadRequest::new("org/model", Vec::new());
        assert!(resolve_targets(&req, &settings()).is_err());
    }
}
