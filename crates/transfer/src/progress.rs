use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 64;

/// Throughput of acknowledged chunks over a sliding time window.
///
/// One calculator lives for one upload attempt. [`start`](Self::start) opens
/// the window before the first chunk is sent; each acknowledgment is then
/// recorded with [`record`](Self::record).
#[derive(Debug)]
pub struct SpeedCalculator {
    window: Duration,
    max_samples: usize,
    /// `(acknowledged at, bytes)`. The oldest entry only marks where the
    /// window opens; its bytes moved before it.
    samples: VecDeque<(Instant, u64)>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            window,
            max_samples: max_samples.max(2),
            samples: VecDeque::new(),
        }
    }

    /// Opens the window now.
    pub fn start(&mut self) {
        self.record_at(0, Instant::now());
    }

    /// Records `bytes` acknowledged now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
        if let Some(cutoff) = now.checked_sub(self.window) {
            while self.samples.len() > 2 && self.samples[0].0 < cutoff {
                self.samples.pop_front();
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Bytes per second across the window; 0 until two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(first, _)), Some(&(last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = self.samples.iter().skip(1).map(|&(_, b)| b).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining_bytes` at the current rate, if there is one.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        (speed > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
