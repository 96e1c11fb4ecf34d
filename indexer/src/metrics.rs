use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Aggregate emitted every `status_every` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub count: u64,
    pub p99: Duration,
    pub p95: Duration,
    pub avg: Duration,
    /// Samples per second since the previous report.
    pub rate: f64,
}

struct Window {
    count: u64,
    timings: VecDeque<Duration>,
    last_status: Instant,
}

/// Latency recorder for a single handler.
///
/// Samples are kept in a rolling window of the last `status_every` timings.
/// A `status_every` of zero disables reporting, samples are still counted.
pub struct TimerMetrics {
    prefix: String,
    status_every: usize,
    window: Mutex<Window>,
}

impl TimerMetrics {
    pub fn new(status_every: usize, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            status_every,
            window: Mutex::new(Window {
                count: 0,
                timings: VecDeque::with_capacity(status_every),
                last_status: Instant::now(),
            }),
        }
    }

    /// Records the time elapsed since `start`.
    pub fn status(&self, start: Instant) -> Option<StatusReport> {
        self.record(start.elapsed())
    }

    pub fn record(&self, duration: Duration) -> Option<StatusReport> {
        let mut window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };

        window.count += 1;
        if self.status_every == 0 {
            return None;
        }

        window.timings.push_back(duration);
        if window.timings.len() > self.status_every {
            window.timings.pop_front();
        }

        if window.count % self.status_every as u64 != 0 {
            return None;
        }

        let now = Instant::now();
        let report = summarize(&window.timings, window.count, now - window.last_status);
        window.last_status = now;
        drop(window);

        info!(
            "{} finished {} - 99th: {:.2}ms - 95th: {:.2}ms - avg: {:.2}ms - {:.2}/s",
            self.prefix,
            report.count,
            millis(report.p99),
            millis(report.p95),
            millis(report.avg),
            report.rate
        );

        Some(report)
    }

    /// Total samples recorded so far.
    pub fn count(&self) -> u64 {
        match self.window.lock() {
            Ok(w) => w.count,
            Err(poisoned) => poisoned.into_inner().count,
        }
    }
}

fn summarize(timings: &VecDeque<Duration>, count: u64, since_last: Duration) -> StatusReport {
    let mut sorted = timings.iter().copied().collect::<Vec<_>>();
    sorted.sort();

    let total: Duration = sorted.iter().sum();
    let n = sorted.len().max(1);
    let secs = since_last.as_secs_f64();

    StatusReport {
        count,
        p99: percentile(&sorted, 0.99),
        p95: percentile(&sorted, 0.95),
        avg: total / n as u32,
        rate: if secs > 0.0 { sorted.len() as f64 / secs } else { 0.0 },
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len()) - 1;
    sorted[idx]
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
