use modelget_core::fs_paths::{AppPaths, DesktopPaths};

fn enhanced_path() -> Option<String> {
    let bin_dir = DesktopPaths.bin_dir()?;
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// Builds a helper command with the managed bin dir on PATH and UTF-8 stdio
/// for Python-based helpers. The child is killed if its handle is dropped.
pub fn command<S: AsRef<std::ffi::OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = enhanced_path() {
        cmd.env("PATH", path);
    }
    cmd.env_remove("PYTHONHOME");
    cmd.env_remove("PYTHONPATH");
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.env("PYTHONUNBUFFERED", "1");
    cmd.kill_on_drop(true);
    cmd
}
