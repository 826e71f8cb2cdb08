use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fs_paths::{AppPaths, DesktopPaths};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    pub download: DownloadSettings,
    #[serde(default)]
    pub helper: HelperSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub models_dir: PathBuf,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Route jobs through the helper tool when it is fully available.
    #[serde(default)]
    pub prefer_external_helper: bool,
    #[serde(default = "default_true")]
    pub native_enabled: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperSettings {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Script run by the interpreter; the embedded program is used when unset.
    #[serde(default)]
    pub helper_script: Option<PathBuf>,
    #[serde(default = "default_registry_cli")]
    pub registry_cli: String,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            helper_script: None,
            registry_cli: default_registry_cli(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub fn default_endpoint() -> String {
    "https://huggingface.co".into()
}

fn default_revision() -> String {
    "main".into()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_interpreter() -> String {
    if cfg!(target_os = "windows") {
        "python".into()
    } else {
        "python3".into()
    }
}

fn default_registry_cli() -> String {
    "modelscope".into()
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

impl DownloadSettings {
    pub fn with_models_dir(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            endpoint: default_endpoint(),
            revision: default_revision(),
            prefer_external_helper: false,
            native_enabled: true,
            auth_token: None,
            cache_dir: None,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            job_retention_secs: default_job_retention_secs(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            download: DownloadSettings::with_models_dir(DesktopPaths.models_dir()),
            helper: HelperSettings::default(),
            proxy: ProxySettings::default(),
        }
    }
}
