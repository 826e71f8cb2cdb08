use std::path::{Path, PathBuf};

use anyhow::Context;
use modelget_core::models::settings::AppSettings;

use crate::storage::config;

/// Effective settings, environment overrides included.
pub fn get_settings() -> AppSettings {
    config::load_settings()
}

pub fn settings_location() -> PathBuf {
    config::settings_path()
}

/// Merges a JSON patch into the stored settings and saves the result.
pub fn update_settings(partial: &str) -> anyhow::Result<AppSettings> {
    update_settings_at(&config::settings_path(), partial)
}

pub fn update_settings_at(path: &Path, partial: &str) -> anyhow::Result<AppSettings> {
    // Start from the file alone so environment overrides are never persisted.
    let current = config::load_settings_from(path);
    let patch: serde_json::Value = serde_json::from_str(partial).context("invalid JSON patch")?;
    let mut current_val = serde_json::to_value(&current)?;
    merge_json(&mut current_val, &patch);
    let updated: AppSettings =
        serde_json::from_value(current_val).context("patch does not fit the settings shape")?;
    config::save_settings_to(path, &updated)?;
    Ok(updated)
}

pub fn reset_settings() -> anyhow::Result<AppSettings> {
    let defaults = AppSettings::default();
    config::save_settings(&defaults)?;
    Ok(defaults)
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            let nested = value.is_object() && base_obj.get(key).is_some_and(|v| v.is_object());
            if !nested {
                base_obj.insert(key.clone(), value.clone());
            } else if let Some(existing) = base_obj.get_mut(key) {
                merge_json(existing, value);
            }
        }
    }
}
