//! Lock-free latency histogram.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bucket upper bounds in microseconds. In-process stores answer in single
/// digit microseconds, networked ones in milliseconds.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    5, 10, 50, 100, 500, 1_000, 5_000, 10_000, 50_000, 100_000,
];

/// Cumulative histogram with Prometheus exposition.
pub struct Histogram {
    sum_us: AtomicU64,
    count: AtomicU64,
    buckets: [AtomicU64; LATENCY_BUCKETS_US.len()],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Records one observation.
    #[inline]
    pub fn observe(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (bucket, &bound) in self.buckets.iter().zip(LATENCY_BUCKETS_US.iter()) {
            if us <= bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sum_us(&self) -> u64 {
        self.sum_us.load(Ordering::Relaxed)
    }

    /// Cumulative bucket counts, aligned with [`LATENCY_BUCKETS_US`].
    pub fn buckets(&self) -> [u64; LATENCY_BUCKETS_US.len()] {
        std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed))
    }

    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::with_capacity(768);
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for (count, bound) in self.buckets().iter().zip(LATENCY_BUCKETS_US) {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, count);
        }
        let count = self.count();
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(output, "{}_sum {}", name, self.sum_us());
        let _ = writeln!(output, "{}_count {}", name, count);
        output
    }
}
