use std::path::{Path, PathBuf};

use anyhow::Context;
use modelget_core::fs_paths::{AppPaths, DesktopPaths};
use modelget_core::models::settings::AppSettings;

const STORE_PATH: &str = "settings.json";
const STORE_KEY: &str = "app_settings";

pub fn settings_path() -> PathBuf {
    DesktopPaths.data_dir().join(STORE_PATH)
}

/// Reads the store at `path`. A missing or unreadable store yields defaults.
pub fn load_settings_from(path: &Path) -> AppSettings {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return AppSettings::default(),
    };
    let store: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("[config] ignoring unreadable {}: {}", path.display(), e);
            return AppSettings::default();
        }
    };
    match store.get(STORE_KEY) {
        Some(val) => serde_json::from_value::<AppSettings>(val.clone()).unwrap_or_else(|e| {
            tracing::warn!("[config] invalid settings in {}: {}", path.display(), e);
            AppSettings::default()
        }),
        None => AppSettings::default(),
    }
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = serde_json::json!({ STORE_KEY: settings });
    let raw = serde_json::to_string_pretty(&store)?;
    std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Stored settings with environment overrides applied.
pub fn load_settings() -> AppSettings {
    let mut settings = load_settings_from(&settings_path());
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn save_settings(settings: &AppSettings) -> anyhow::Result<()> {
    save_settings_to(&settings_path(), settings)
}

/// Environment wins over the stored file. Empty values are ignored.
pub fn apply_env_overrides<F>(settings: &mut AppSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("HF_TOKEN") {
        settings.download.auth_token = Some(token);
    }
    if let Some(cache) = get("HF_HUB_CACHE").or_else(|| get("HUGGINGFACE_HUB_CACHE")) {
        settings.download.cache_dir = Some(PathBuf::from(cache));
    }
    if let Some(endpoint) = get("HF_ENDPOINT") {
        settings.download.endpoint = endpoint.trim_end_matches('/').to_string();
    }
}
