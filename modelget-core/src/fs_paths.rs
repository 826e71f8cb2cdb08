use std::path::PathBuf;

pub trait AppPaths: Send + Sync {
    fn models_dir(&self) -> PathBuf;
    fn data_dir(&self) -> PathBuf;
    fn cache_dir(&self) -> PathBuf;
    fn bin_dir(&self) -> Option<PathBuf>;
}

pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn models_dir(&self) -> PathBuf {
        self.data_dir().join("models")
    }

    fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("MODELGET_DATA_DIR") {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .map(|d| d.join("modelget"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn cache_dir(&self) -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("modelget"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        Some(self.data_dir().join("bin"))
    }
}
