use std::future::Future;

use crate::contracts::error::SequenceError;
use crate::generator::SequenceSettings;

/// Generates strictly increasing sequence numbers per named sequence.
///
/// # Invariants
/// - Successive values of one sequence differ by exactly its step
/// - No two callers receive the same value for the same counter
/// - Counters are created lazily with `seq == step`
pub trait SequenceGenerator: Send + Sync {
    /// Increments `sequence` and returns the new value.
    /// Assumes the store connection is already open.
    fn increment(
        &self,
        sequence: &str,
        field: Option<&str>,
    ) -> impl Future<Output = Result<i64, SequenceError>> + Send;

    /// Like [`SequenceGenerator::increment`], but first waits for a connecting
    /// store to open.
    fn get_next_sequence(
        &self,
        sequence: &str,
        field: Option<&str>,
    ) -> impl Future<Output = Result<i64, SequenceError>> + Send;

    /// Options used to resolve collection, field and step.
    fn settings(&self) -> &SequenceSettings;
}
