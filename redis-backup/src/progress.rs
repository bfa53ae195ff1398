//! Key-level progress tracking for long-running backups and restores.

use std::time::{Duration, Instant};

/// Counts processed keys and decides when a progress report is due.
#[derive(Debug, Clone)]
pub struct KeyProgress {
    start_time: Instant,

    /// Keys processed so far
    processed: u64,

    /// Report every N keys; 0 disables periodic reports
    every: u64,
}

impl KeyProgress {
    pub fn new(every: u64) -> Self {
        Self {
            start_time: Instant::now(),
            processed: 0,
            every,
        }
    }

    /// Count one key. Returns true when a progress report is due.
    pub fn tick(&mut self) -> bool {
        self.processed += 1;
        self.every > 0 && self.processed % self.every == 0
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Get total elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average keys per second since start
    pub fn keys_per_second(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.processed as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
