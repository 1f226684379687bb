//! Progress throttling
//!
//! Transports may report thousands of byte counts per second. Only samples that
//! are both spaced by the configured interval and strictly ahead of the last
//! accepted one are republished; everything else is dropped.

use std::time::{Duration, Instant};

/// An accepted progress sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub bytes_written: u64,
    pub bytes_expected: u64,
    pub fraction: f64,
}

/// Rate limiter with a monotonic guard
#[derive(Debug, Clone)]
pub struct ProgressThrottler {
    interval: Duration,
    last: Option<(Instant, u64)>,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Forget the previous attempt.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn offer(&mut self, bytes_written: u64, bytes_expected: u64) -> Option<ProgressSample> {
        self.offer_at(Instant::now(), bytes_written, bytes_expected)
    }

    pub fn offer_at(
        &mut self,
        now: Instant,
        bytes_written: u64,
        bytes_expected: u64,
    ) -> Option<ProgressSample> {
        if let Some((at, written)) = self.last {
            if now.saturating_duration_since(at) < self.interval || bytes_written <= written {
                return None;
            }
        }

        self.last = Some((now, bytes_written));
        Some(ProgressSample {
            bytes_written,
            bytes_expected,
            fraction: progress_fraction(bytes_written, bytes_expected),
        })
    }
}

/// Completed share in `[0, 1]`; zero while the total is unknown.
pub fn progress_fraction(bytes_written: u64, bytes_expected: u64) -> f64 {
    if bytes_expected == 0 {
        return 0.0;
    }
    (bytes_written as f64 / bytes_expected as f64).clamp(0.0, 1.0)
}
