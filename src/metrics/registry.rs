use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use super::Histogram;

/// Most sequences whose last issued value is tracked. Names beyond the cap
/// are still counted in the totals but get no gauge.
pub const MAX_TRACKED_SEQUENCES: usize = 1024;

/// Counters for the increment protocol.
#[derive(Default)]
pub struct SequenceMetrics {
    /// Successful increments
    pub increments_total: AtomicU64,
    /// Lost upsert races that were retried
    pub conflicts_retried_total: AtomicU64,
    /// Store errors surfaced to callers
    pub store_errors_total: AtomicU64,
    /// Last value issued per sequence, up to [`MAX_TRACKED_SEQUENCES`] names
    pub last_issued: DashMap<String, i64>,
    /// Latency of successful increments, retries included
    pub increment_latency_us: Histogram,
}

impl SequenceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_increment(&self, sequence: &str, value: i64, elapsed: Duration) {
        self.increments_total.fetch_add(1, Ordering::Relaxed);
        self.increment_latency_us.observe(elapsed);
        // Concurrent callers may finish out of order; keep the highest.
        let tracked = match self.last_issued.get_mut(sequence) {
            Some(mut last) => {
                *last = (*last).max(value);
                true
            }
            None => false,
        };
        if !tracked && self.last_issued.len() < MAX_TRACKED_SEQUENCES {
            self.last_issued
                .entry(sequence.to_string())
                .and_modify(|v| *v = (*v).max(value))
                .or_insert(value);
        }
    }

    /// Stops tracking a sequence, freeing a gauge slot.
    pub fn forget(&self, sequence: &str) -> Option<i64> {
        self.last_issued.remove(sequence).map(|(_, v)| v)
    }

    #[inline]
    pub fn record_conflict(&self) {
        self.conflicts_retried_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_error(&self) {
        self.store_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Last value issued for a sequence by this process.
    pub fn last_issued(&self, sequence: &str) -> Option<i64> {
        self.last_issued.get(sequence).map(|v| *v)
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        for (name, help, value) in [
            (
                "autoseq_increments_total",
                "Total successful sequence increments",
                &self.increments_total,
            ),
            (
                "autoseq_conflicts_retried_total",
                "Total duplicate-key conflicts retried",
                &self.conflicts_retried_total,
            ),
            (
                "autoseq_store_errors_total",
                "Total store errors returned to callers",
                &self.store_errors_total,
            ),
        ] {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value.load(Ordering::Relaxed));
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "# HELP autoseq_last_issued Last sequence value issued by this process"
        );
        let _ = writeln!(output, "# TYPE autoseq_last_issued gauge");
        let mut last: Vec<(String, i64)> = self
            .last_issued
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        last.sort();
        for (sequence, value) in last {
            let _ = writeln!(
                output,
                "autoseq_last_issued{{sequence=\"{}\"}} {}",
                sequence, value
            );
        }
        output.push('\n');

        output.push_str(&self.increment_latency_us.format_prometheus(
            "autoseq_increment_latency_us",
            "Histogram of increment latency in microseconds",
        ));

        output
    }
}
