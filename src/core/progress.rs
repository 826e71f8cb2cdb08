use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Progress tick handed to the caller's sink.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressTick {
    pub job_id: Uuid,
    pub file: String,
    pub file_index: usize,
    pub total_files: usize,
    pub file_percent: f64,
    pub overall_percent: f64,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, SIZE_UNITS[unit])
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_size(bytes_per_sec as u64))
}

/// `mm:ss`, or `h:mm:ss` past an hour; `--:--` when the value is unusable.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--:--".to_string();
    }
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

pub fn format_eta(eta_seconds: Option<f64>) -> String {
    eta_seconds.map_or_else(|| "--:--".to_string(), format_duration)
}

/// Percentage of `downloaded` over `total`; 0 while the total is unknown.
pub fn percent(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (downloaded as f64 / total as f64 * 100.0).min(100.0)
}

/// `(file_index + file_fraction) / total_files * 100`.
pub fn overall_percent(file_index: usize, file_fraction: f64, total_files: usize) -> f64 {
    if total_files == 0 {
        return 0.0;
    }
    let fraction = file_fraction.clamp(0.0, 1.0);
    ((file_index as f64 + fraction) / total_files as f64 * 100.0).min(100.0)
}

pub fn eta_seconds(remaining: u64, bytes_per_sec: f64) -> Option<f64> {
    if bytes_per_sec > 0.0 && bytes_per_sec.is_finite() {
        Some(remaining as f64 / bytes_per_sec)
    } else {
        None
    }
}

/// Sums `(downloaded, size)` pairs. Unknown sizes count as zero, so the
/// total is a lower bound until every file has been probed.
pub fn aggregate<I>(entries: I) -> (u64, u64)
where
    I: IntoIterator<Item = (u64, u64)>,
{
    entries
        .into_iter()
        .fold((0, 0), |(dl, total), (d, s)| (dl + d, total + s))
}

pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_emit: None,
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Throughput over the window since the previous tick.
pub struct SpeedWindow {
    last_bytes: u64,
    last_time: Instant,
}

impl SpeedWindow {
    pub fn new(start_bytes: u64) -> Self {
        Self {
            last_bytes: start_bytes,
            last_time: Instant::now(),
        }
    }

    pub fn tick(&mut self, bytes: u64) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_time).as_secs_f64();
        let delta = bytes.saturating_sub(self.last_bytes);
        self.last_bytes = bytes;
        self.last_time = now;
        if dt > 0.0 {
            delta as f64 / dt
        } else {
            0.0
        }
    }
}
