//! Observability metrics for sequence generation.
//!
//! All metrics use lock-free atomics so recording stays off the
//! critical path of an increment.

pub mod histogram;
pub mod registry;

pub use histogram::{Histogram, LATENCY_BUCKETS_US};
pub use registry::{SequenceMetrics, MAX_TRACKED_SEQUENCES};
