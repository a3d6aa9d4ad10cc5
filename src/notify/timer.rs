//! Stage-aware elapsed timer
//!
//! Stage boundaries are timer boundaries: opening a new stage resets the
//! per-stage clock while the total keeps running. Uses monotonic clock
//! reads only.

use std::time::{Duration, Instant};

pub struct Timer {
    started: Instant,
    stage_started: Instant,
    stage: String,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            stage_started: now,
            stage: String::new(),
        }
    }

    /// Open a new timer stage, resetting the per-stage clock.
    pub fn start_stage(&mut self, name: impl Into<String>) {
        self.stage = name.into();
        self.stage_started = Instant::now();
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn stage_elapsed(&self) -> Duration {
        self.stage_started.elapsed()
    }

    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a duration the way the status lines do: fractional seconds under
/// a minute, then `XmYs`, then `XhYm`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m");
    }

    #[test]
    fn test_stage_reset() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(10));
        timer.start_stage("bootstrap");
        assert_eq!(timer.stage(), "bootstrap");
        assert!(timer.stage_elapsed() <= timer.total_elapsed());
    }
}
