// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Rolling-window throughput estimation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window over which throughput is averaged
const WINDOW: Duration = Duration::from_secs(3);

/// Per-transfer byte counter with a rolling-window speed estimate.
///
/// Samples older than the window are discarded on every call, so the
/// reported speed reflects recent throughput rather than the lifetime
/// average.
pub struct SpeedTracker {
    samples: VecDeque<(Instant, u64)>,
    window_bytes: u64,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            window_bytes: 0,
        }
    }

    /// Record `bytes` transferred at this instant
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        self.window_bytes += bytes;
        self.evict(now);
    }

    /// Current throughput in bytes per second
    pub fn bytes_per_sec(&mut self) -> u64 {
        let now = Instant::now();
        self.evict(now);

        let Some((oldest, _)) = self.samples.front() else {
            return 0;
        };
        let elapsed = now.duration_since(*oldest).as_secs_f64();
        if elapsed <= 0.0 {
            // All samples landed within one clock tick
            return self.window_bytes;
        }
        (self.window_bytes as f64 / elapsed) as u64
    }

    fn evict(&mut self, now: Instant) {
        while let Some((t, bytes)) = self.samples.front() {
            if now.duration_since(*t) <= WINDOW {
                break;
            }
            self.window_bytes -= bytes;
            self.samples.pop_front();
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}
